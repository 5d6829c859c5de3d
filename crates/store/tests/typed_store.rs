#![forbid(unsafe_code)]

use kube::ResourceExt;
use sources_api::{JobSource, JobSourceSpec, KnativeService, Source, SourceStatus};
use sources_core::{AddressLookup, KReference, ResourceStore, SourceError};
use sources_store::{MemoryStore, Verb};

fn job_source(name: &str) -> JobSource {
    let mut js = JobSource::new(name, JobSourceSpec::default());
    js.metadata.namespace = Some("ns".into());
    js
}

#[tokio::test]
async fn typed_round_trip_through_cache() {
    let store = MemoryStore::new();
    store.insert(&job_source("a")).unwrap();

    let got: JobSource = ResourceStore::<JobSource>::get(&store, "ns", "a").await.unwrap().unwrap();
    assert_eq!(got.name_any(), "a");
    assert!(got.uid().is_some());
    assert_eq!(got.resource_version().as_deref(), Some("1"));
    assert_eq!(store.write_count(), 0, "seeding is not a write");

    let missing: Option<JobSource> = store.get("ns", "nope").await.unwrap();
    assert!(missing.is_none());
    assert_eq!(store.keys_of::<JobSource>().len(), 1);
}

#[tokio::test]
async fn status_write_is_guarded_by_resource_version() {
    let store = MemoryStore::new();
    store.insert(&job_source("a")).unwrap();
    let fetched: JobSource = store.get("ns", "a").await.unwrap().unwrap();

    let mut first = fetched.clone();
    first.status_mut().mark_sink("http://one");
    store.update_status(&first).await.unwrap();

    let mut stale = fetched;
    stale.status_mut().mark_sink("http://two");
    let err = store.update_status(&stale).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");

    let stored: JobSource = store.fetch("ns", "a").unwrap();
    assert_eq!(stored.status.unwrap().sink_uri(), Some("http://one"));
    assert_eq!(store.writes().iter().map(|w| w.verb).collect::<Vec<_>>(), vec![Verb::UpdateStatus]);
}

#[tokio::test]
async fn address_lookup_reads_status_address() {
    let store = MemoryStore::new();
    store
        .insert_raw(serde_json::json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": {"name": "svc", "namespace": "ns"},
            "spec": {},
            "status": {"address": {"url": "http://svc.ns.svc.cluster.local"}}
        }))
        .unwrap();
    let r = KReference::new("serving.knative.dev/v1", "Service", "svc").in_namespace("ns");
    assert_eq!(store.resolve(&r).await.unwrap(), "http://svc.ns.svc.cluster.local");

    let typed: Option<KnativeService> = store.get("ns", "svc").await.unwrap();
    assert!(typed.is_some());

    let gone = KReference::new("serving.knative.dev/v1", "Service", "gone").in_namespace("ns");
    assert!(matches!(store.resolve(&gone).await, Err(SourceError::NotFound(_))));
}
