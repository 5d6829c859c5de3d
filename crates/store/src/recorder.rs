use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use sources_core::{EventRecord, EventRecorder};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `Kind namespace/name` of the object the event is about.
    pub regarding: String,
    pub event: EventRecord,
}

/// Keeps published events in memory, in order.
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event.reason).collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn publish(&self, regarding: &ObjectReference, event: EventRecord) {
        let regarding = format!(
            "{} {}/{}",
            regarding.kind.as_deref().unwrap_or(""),
            regarding.namespace.as_deref().unwrap_or(""),
            regarding.name.as_deref().unwrap_or("")
        );
        info!(regarding = %regarding, reason = %event.reason, note = %event.note, "event");
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent { regarding, event });
        }
    }
}
