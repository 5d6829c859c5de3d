use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use sources_core::{AddressLookup, ObjectKey, SourceError};
use sources_reconciler::{ChildStrategy, Reconciler};
use tracing::{info, warn};

use crate::events::KubeEventRecorder;
use crate::store::KubeStore;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch a single namespace; all namespaces when unset.
    pub namespace: Option<String>,
    /// Successful reconciles are repeated after this long. Also picks up
    /// sink address changes, which are not watched.
    pub resync: Duration,
    pub error_requeue: Duration,
    /// Reporting controller name on published events.
    pub reporter: String,
}

struct Context<S: ChildStrategy> {
    reconciler: Reconciler<S>,
    resync: Duration,
    error_requeue: Duration,
}

async fn reconcile<S: ChildStrategy>(obj: Arc<S::Owner>, ctx: Arc<Context<S>>) -> Result<Action, SourceError> {
    let key = ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
    ctx.reconciler.reconcile(&key.to_string()).await?;
    Ok(Action::requeue(ctx.resync))
}

fn error_policy<S: ChildStrategy>(obj: Arc<S::Owner>, err: &SourceError, ctx: Arc<Context<S>>) -> Action {
    warn!(kind = S::KIND, name = %obj.name_any(), error = %err, reason = err.label(), "reconcile failed; requeueing");
    Action::requeue(ctx.error_requeue)
}

/// Watch owners of `S` and the children they own, reconciling until a
/// shutdown signal arrives.
pub async fn run<S>(
    client: Client,
    strategy: S,
    config: ControllerConfig,
    lookup: Arc<dyn AddressLookup>,
) -> anyhow::Result<()>
where
    S: ChildStrategy,
    S::Owner: kube::Resource<Scope = NamespaceResourceScope>,
    S::Child: kube::Resource<Scope = NamespaceResourceScope>,
{
    let (owners, children): (Api<S::Owner>, Api<S::Child>) = match &config.namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };
    let controller = Controller::new(owners, watcher::Config::default()).owns(children, watcher::Config::default());

    let sources = KubeStore::<S::Owner>::new(client.clone()).with_cache(controller.store());
    let recorder = KubeEventRecorder::new(client.clone(), &config.reporter);
    let reconciler = Reconciler::new(
        strategy,
        Arc::new(sources),
        Arc::new(KubeStore::<S::Child>::new(client.clone())),
        lookup,
        Arc::new(recorder),
    );
    let ctx = Arc::new(Context { reconciler, resync: config.resync, error_requeue: config.error_requeue });

    info!(kind = S::KIND, ns = ?config.namespace, "controller started");
    controller
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(kind = S::KIND, error = %e, "controller event");
            }
        })
        .await;
    info!(kind = S::KIND, "controller stopped");
    Ok(())
}
