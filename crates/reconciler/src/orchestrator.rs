//! The per-key reconcile loop shared by every source kind.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kube::Resource;
use sources_api::{Source, SourceStatus};
use sources_core::{
    AddressLookup, EventRecord, EventRecorder, ObjectKey, ResourceStore, SourceError, SourceResult,
};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::child::{ChildResourceManager, ChildStrategy};
use crate::sink::{SinkResolver, SinkTracker};

pub const REASON_SINK_MISSING: &str = "Missing";
pub const REASON_SINK_INVALID: &str = "Invalid";
pub const REASON_SINK_NOT_FOUND: &str = "NotFound";
pub const REASON_SINK_LOOKUP_FAILED: &str = "LookupFailed";

pub const EVENT_UPDATE_FAILED: &str = "UpdateFailed";
pub const EVENT_INTERNAL_ERROR: &str = "InternalError";

/// Anything that can reconcile a `namespace/name` key. Lets worker pools
/// drive reconcilers of different kinds.
#[async_trait]
pub trait KeyReconciler: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn reconcile(&self, key: &str) -> SourceResult<()>;
}

pub struct Reconciler<S: ChildStrategy> {
    sources: Arc<dyn ResourceStore<S::Owner>>,
    children: ChildResourceManager<S>,
    sinks: SinkResolver,
    recorder: Arc<dyn EventRecorder>,
}

impl<S: ChildStrategy> Reconciler<S> {
    pub fn new(
        strategy: S,
        sources: Arc<dyn ResourceStore<S::Owner>>,
        children: Arc<dyn ResourceStore<S::Child>>,
        lookup: Arc<dyn AddressLookup>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            sources,
            children: ChildResourceManager::new(strategy, children),
            sinks: SinkResolver::new(lookup),
            recorder,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<SinkTracker>) -> Self {
        self.sinks = self.sinks.with_tracker(tracker);
        self
    }

    /// Reconcile one key. Never-existing, deleted and malformed keys are
    /// successful no-ops; every returned error is worth a retry.
    pub async fn reconcile(&self, key: &str) -> SourceResult<()> {
        let span = info_span!("reconcile", kind = S::KIND, key = %key);
        async {
            let t0 = Instant::now();
            let res = self.reconcile_key(key).await;
            metrics::histogram!("sources_reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => S::KIND);
            let outcome = match &res {
                Ok(()) => "ok",
                Err(e) => e.label(),
            };
            metrics::counter!("sources_reconcile_total", 1u64, "kind" => S::KIND, "outcome" => outcome);
            debug!(took_ms = %t0.elapsed().as_millis(), outcome, "reconciled");
            res
        }
        .instrument(span)
        .await
    }

    async fn reconcile_key(&self, key: &str) -> SourceResult<()> {
        let Some(key) = ObjectKey::parse(key) else {
            error!("invalid resource key; dropping");
            return Ok(());
        };
        let Some(original) = self.sources.get(&key.namespace, &key.name).await? else {
            debug!("resource no longer exists");
            self.sinks.forget(S::KIND, &key);
            return Ok(());
        };
        if original.meta().deletion_timestamp.is_some() {
            debug!("resource is being deleted");
            self.sinks.forget(S::KIND, &key);
            return Ok(());
        }

        let mut resource = original.clone();
        let reconcile_err = self.reconcile_resource(&mut resource, &key).await;

        if original.status() != resource.status() {
            match self.sources.update_status(&resource).await {
                Ok(_) => {
                    metrics::counter!("sources_status_writes_total", 1u64, "kind" => S::KIND);
                }
                Err(e) => {
                    warn!(error = %e, "failed to update status");
                    let note = format!("Failed to update status for \"{}\": {}", key.name, e);
                    self.publish(&resource, EventRecord::warning(EVENT_UPDATE_FAILED, note)).await;
                    return Err(e);
                }
            }
        }

        match reconcile_err {
            Some(e) => {
                self.publish(&resource, EventRecord::warning(EVENT_INTERNAL_ERROR, e.to_string())).await;
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Mutates `resource` in place and returns the first error hit.
    async fn reconcile_resource(&self, resource: &mut S::Owner, key: &ObjectKey) -> Option<SourceError> {
        resource.status_mut().initialize_conditions();

        let mut first = self.reconcile_sink(resource, key).await.err();
        if first.is_none() {
            first = self.children.reconcile(resource).await.err();
        }

        let generation = resource.meta().generation;
        resource.status_mut().base_mut().observed_generation = generation;
        first
    }

    async fn reconcile_sink(&self, resource: &mut S::Owner, key: &ObjectKey) -> SourceResult<()> {
        if resource.status_mut().sink_locked() {
            debug!("sink is locked; keeping the captured sink");
            return Ok(());
        }
        let dest = resource.base_spec().sink.clone();
        match self.sinks.resolve_for(&dest, &key.namespace, S::KIND, key).await {
            Ok(uri) => {
                resource.status_mut().mark_sink(&uri);
                Ok(())
            }
            Err(e) => {
                let status = resource.status_mut();
                match &e {
                    SourceError::Validation(_) if dest.is_empty() => {
                        status.mark_no_sink(REASON_SINK_MISSING, "Sink missing from spec")
                    }
                    SourceError::Validation(fe) => status.mark_no_sink(REASON_SINK_INVALID, &fe.to_string()),
                    SourceError::NotFound(_) | SourceError::AddressUnresolvable(_) => {
                        status.mark_no_sink(REASON_SINK_NOT_FOUND, &format!("Could not resolve sink URI: {}", e))
                    }
                    _ => status.mark_sink_unknown(REASON_SINK_LOOKUP_FAILED, &format!("Failed to resolve sink URI: {}", e)),
                }
                warn!(error = %e, "sink not resolved");
                Err(e)
            }
        }
    }

    async fn publish(&self, resource: &S::Owner, event: EventRecord) {
        self.recorder.publish(&resource.object_ref(&()), event).await;
    }
}

#[async_trait]
impl<S: ChildStrategy> KeyReconciler for Reconciler<S> {
    fn kind(&self) -> &'static str {
        S::KIND
    }

    async fn reconcile(&self, key: &str) -> SourceResult<()> {
        Reconciler::<S>::reconcile(self, key).await
    }
}
