#![forbid(unsafe_code)]

use std::sync::Arc;

use k8s_openapi::api::batch::v1::{CronJob, CronJobStatus};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use sources_api::cronjobsource::CRON_JOB_CREATED;
use sources_api::{CronJobSource, CronJobSourceSpec, CronJobState, Source, SourceStatus};
use sources_core::{Destination, ResourceStore, SourceError, READY};
use sources_reconciler::{CronJobStrategy, Reconciler};
use sources_store::{MemoryRecorder, MemoryStore, Verb};

fn setup() -> (Arc<MemoryStore>, Reconciler<CronJobStrategy>) {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(MemoryRecorder::default());
    let r = Reconciler::new(CronJobStrategy, store.clone(), store.clone(), store.clone(), recorder);
    (store, r)
}

fn cron_source(schedule: &str) -> CronJobSource {
    let mut spec = CronJobSourceSpec::default();
    spec.source.sink = Destination::from_uri("http://sink");
    spec.cron_job.schedule = schedule.into();
    let job = spec.cron_job.job_template.spec.get_or_insert_with(Default::default);
    job.template.spec = Some(PodSpec {
        containers: vec![Container { image: Some("busybox".into()), ..Default::default() }],
        ..Default::default()
    });
    let mut s = CronJobSource::new("cron", spec);
    s.metadata.namespace = Some("ns".into());
    s.set_defaults();
    s
}

#[tokio::test]
async fn creates_cron_job_and_becomes_ready() {
    let (store, r) = setup();
    store.insert(&cron_source("*/5 * * * *")).unwrap();

    r.reconcile("ns/cron").await.unwrap();

    let src: CronJobSource = store.fetch("ns", "cron").unwrap();
    let status = src.status.unwrap();
    assert_eq!(status.state(), CronJobState::ChildCreated);
    assert!(status.get_condition(READY).unwrap().is_true());

    let cj: CronJob = store.fetch("ns", "cron").unwrap();
    assert_eq!(cj.spec.as_ref().unwrap().schedule, "*/5 * * * *");
    let owner = &cj.metadata.owner_references.unwrap()[0];
    assert_eq!(owner.name, "cron");
    assert_eq!(owner.controller, Some(true));

    store.clear_writes();
    r.reconcile("ns/cron").await.unwrap();
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn schedule_change_updates_cron_job() {
    let (store, r) = setup();
    store.insert(&cron_source("*/5 * * * *")).unwrap();
    r.reconcile("ns/cron").await.unwrap();

    let mut src: CronJobSource = store.fetch("ns", "cron").unwrap();
    src.spec.cron_job.schedule = "0 * * * *".into();
    store.update(&src).await.unwrap();
    store.clear_writes();

    r.reconcile("ns/cron").await.unwrap();
    let cj: CronJob = store.fetch("ns", "cron").unwrap();
    assert_eq!(cj.spec.unwrap().schedule, "0 * * * *");
    let verbs: Vec<_> = store.writes().into_iter().map(|w| (w.verb, w.kind)).collect();
    assert_eq!(verbs, vec![(Verb::Update, "CronJob".to_string()), (Verb::UpdateStatus, "CronJobSource".to_string())]);
}

#[tokio::test]
async fn last_schedule_time_is_mirrored() {
    let (store, r) = setup();
    store.insert(&cron_source("*/5 * * * *")).unwrap();
    r.reconcile("ns/cron").await.unwrap();

    let mut cj: CronJob = store.fetch("ns", "cron").unwrap();
    let scheduled = Time(chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap().into());
    cj.status = Some(CronJobStatus { last_schedule_time: Some(scheduled.clone()), ..Default::default() });
    store.update_status(&cj).await.unwrap();

    r.reconcile("ns/cron").await.unwrap();
    let src: CronJobSource = store.fetch("ns", "cron").unwrap();
    assert_eq!(src.status.unwrap().cron_job.last_schedule_time, Some(scheduled));
}

#[tokio::test]
async fn update_failure_keeps_created_condition() {
    let (store, r) = setup();
    store.insert(&cron_source("*/5 * * * *")).unwrap();
    r.reconcile("ns/cron").await.unwrap();

    let mut src: CronJobSource = store.fetch("ns", "cron").unwrap();
    src.spec.cron_job.schedule = "0 * * * *".into();
    store.update(&src).await.unwrap();
    store.fail_next(Verb::Update, "CronJob", SourceError::Store("admission denied".into()));

    let err = r.reconcile("ns/cron").await.unwrap_err();
    assert!(matches!(err, SourceError::ChildMutation(_)), "{err}");
    let src: CronJobSource = store.fetch("ns", "cron").unwrap();
    assert!(src.status.unwrap().get_condition(CRON_JOB_CREATED).unwrap().is_true());
}

#[tokio::test]
async fn get_failure_before_creation_is_recorded() {
    let (store, r) = setup();
    store.insert(&cron_source("*/5 * * * *")).unwrap();
    store.fail_next(Verb::Get, "CronJob", SourceError::Store("connection refused".into()));

    assert!(r.reconcile("ns/cron").await.is_err());
    let src: CronJobSource = store.fetch("ns", "cron").unwrap();
    let status = src.status.unwrap();
    let cond = status.get_condition(CRON_JOB_CREATED).unwrap();
    assert!(cond.is_false());
    assert_eq!(cond.reason(), "FailedGet");
    assert!(!status.is_ready());
}
