//! Sink resolution and the sink -> owner index.

use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};
use sources_core::{AddressLookup, Destination, KReference, ObjectKey, SourceError, SourceResult};
use tracing::debug;

/// Turns a [`Destination`] into a URI. Side-effect free apart from
/// recording which owners depend on which sink objects.
pub struct SinkResolver {
    lookup: Arc<dyn AddressLookup>,
    tracker: Option<Arc<SinkTracker>>,
}

impl SinkResolver {
    pub fn new(lookup: Arc<dyn AddressLookup>) -> Self {
        Self { lookup, tracker: None }
    }

    pub fn with_tracker(mut self, tracker: Arc<SinkTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// A URI is returned unchanged; a reference is looked up in
    /// `namespace` unless it names its own.
    pub async fn resolve(&self, dest: &Destination, namespace: &str) -> SourceResult<String> {
        dest.validate().map_err(|e| SourceError::Validation(e.via_field("sink")))?;
        match &dest.reference {
            Some(r) => self.lookup.resolve(&with_namespace(r, namespace)).await,
            None => Ok(dest.uri.clone().unwrap_or_default()),
        }
    }

    /// Like [`resolve`](Self::resolve), first recording that `owner` of
    /// `owner_kind` depends on the referenced sink.
    pub async fn resolve_for(
        &self,
        dest: &Destination,
        namespace: &str,
        owner_kind: &'static str,
        owner: &ObjectKey,
    ) -> SourceResult<String> {
        match (&self.tracker, &dest.reference) {
            (Some(tracker), Some(r)) => tracker.track(&with_namespace(r, namespace), owner_kind, owner.clone()),
            (Some(tracker), None) => tracker.forget(owner_kind, owner),
            (None, _) => {}
        }
        self.resolve(dest, namespace).await
    }

    /// Stop tracking `owner`; its sink changes no longer concern anyone.
    pub fn forget(&self, owner_kind: &'static str, owner: &ObjectKey) {
        if let Some(tracker) = &self.tracker {
            tracker.forget(owner_kind, owner);
        }
    }
}

fn with_namespace(r: &KReference, namespace: &str) -> KReference {
    let mut r = r.clone();
    if r.namespace().is_empty() {
        r.namespace = Some(namespace.to_string());
    }
    r
}

type Owner = (&'static str, ObjectKey);

#[derive(Default)]
struct SinkIndex {
    owners: FxHashMap<KReference, FxHashSet<Owner>>,
    sinks: FxHashMap<Owner, KReference>,
}

impl SinkIndex {
    fn unlink(&mut self, owner: &Owner) {
        let Some(old) = self.sinks.remove(owner) else { return };
        if let Some(set) = self.owners.get_mut(&old) {
            set.remove(owner);
            if set.is_empty() {
                self.owners.remove(&old);
            }
        }
    }
}

/// Index of sink object -> owners that resolved it. Each owner is indexed
/// under its most recent sink only.
#[derive(Default)]
pub struct SinkTracker {
    index: Mutex<SinkIndex>,
}

impl SinkTracker {
    pub fn track(&self, sink: &KReference, owner_kind: &'static str, owner: ObjectKey) {
        let Ok(mut index) = self.index.lock() else { return };
        let key = (owner_kind, owner);
        if index.sinks.get(&key) == Some(sink) {
            return;
        }
        index.unlink(&key);
        debug!(sink = %sink, owner = %key.1, "tracking sink");
        index.owners.entry(sink.clone()).or_default().insert(key.clone());
        index.sinks.insert(key, sink.clone());
    }

    /// Drop `owner` from the index, e.g. once it is deleted or sinks to a URI.
    pub fn forget(&self, owner_kind: &'static str, owner: &ObjectKey) {
        if let Ok(mut index) = self.index.lock() {
            index.unlink(&(owner_kind, owner.clone()));
        }
    }

    /// Owners to re-enqueue when `sink` changes, sorted.
    pub fn owners_of(&self, sink: &KReference) -> Vec<(&'static str, ObjectKey)> {
        let mut out: Vec<_> = match self.index.lock() {
            Ok(index) => index.owners.get(sink).map(|s| s.iter().cloned().collect()).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        out.sort();
        out
    }
}
