use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::Client;
use sources_core::{EventRecord, EventRecorder, EventType};
use tracing::warn;

/// Publishes through the events.k8s.io API as `reporter`.
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter { controller: controller.to_string(), instance: std::env::var("POD_NAME").ok() };
        Self { client, reporter }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(&self, regarding: &ObjectReference, event: EventRecord) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), regarding.clone());
        let type_ = match event.type_ {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        };
        let res = recorder
            .publish(Event {
                type_,
                reason: event.reason.clone(),
                note: Some(event.note),
                action: "Reconcile".into(),
                secondary: None,
            })
            .await;
        if let Err(e) = res {
            warn!(error = %e, reason = %event.reason, "failed to publish event");
        }
    }
}
