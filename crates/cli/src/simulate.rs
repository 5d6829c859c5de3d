//! In-memory reconcile loop over manifest files.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sources_api::{CronJobSource, JobSource, ServiceSource, Source, SourceStatus};
use sources_core::{KReference, ObjectKey};
use sources_reconciler::{
    spawn_workers, CronJobStrategy, JobStrategy, KeyReconciler, Reconciler, ServiceStrategy, SinkTracker,
};
use sources_store::{KeyQueue, MemoryRecorder, MemoryStore, Verb};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub rounds: usize,
    pub failures: usize,
    pub sources: Vec<SourceRow>,
    pub writes: BTreeMap<String, usize>,
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    pub kind: String,
    pub key: String,
    pub condition: String,
    pub status: String,
    pub reason: String,
    pub sink_uri: Option<String>,
    pub detail: Json,
}

fn default_namespace(value: &mut Json, ns: &str) {
    if let Some(obj) = value.as_object_mut() {
        let meta = obj.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
        if let Some(meta) = meta.as_object_mut() {
            meta.entry("namespace").or_insert_with(|| Json::String(ns.to_string()));
        }
    }
}

/// Defaults and validates a source before it is stored, the way an
/// admission webhook would. Rejected sources are skipped.
fn admit<K: Source>(store: &MemoryStore, value: Json) -> Result<()> {
    let mut obj: K = match serde_json::from_value(value) {
        Ok(obj) => obj,
        Err(e) => {
            warn!(kind = %K::kind(&()), error = %e, "rejected: malformed");
            return Ok(());
        }
    };
    obj.set_defaults();
    if let Err(e) = obj.validate() {
        warn!(kind = %K::kind(&()), name = %obj.name_any(), error = %e, "rejected");
        return Ok(());
    }
    store.insert(&obj)?;
    Ok(())
}

pub fn load(store: &MemoryStore, text: &str, ns: &str) -> Result<usize> {
    let mut n = 0;
    for doc in serde_yaml::Deserializer::from_str(text) {
        let mut value = Json::deserialize(doc).context("parsing manifest document")?;
        if value.is_null() {
            continue;
        }
        default_namespace(&mut value, ns);
        match value.get("kind").and_then(|k| k.as_str()) {
            Some("JobSource") => admit::<JobSource>(store, value)?,
            Some("CronJobSource") => admit::<CronJobSource>(store, value)?,
            Some("ServiceSource") => admit::<ServiceSource>(store, value)?,
            _ => store.insert_raw(value)?,
        }
        n += 1;
    }
    Ok(n)
}

fn source_keys(store: &MemoryStore, kind: &str) -> Vec<ObjectKey> {
    match kind {
        JOB => store.keys_of::<JobSource>(),
        CRON_JOB => store.keys_of::<CronJobSource>(),
        SERVICE => store.keys_of::<ServiceSource>(),
        _ => Vec::new(),
    }
}

const JOB: &str = "jobsource";
const CRON_JOB: &str = "cronjobsource";
const SERVICE: &str = "servicesource";

/// Sinks whose status changed during a round, as references.
fn written_sinks(store: &MemoryStore, since: usize) -> Vec<KReference> {
    let api_version = format!("{}/{}", sources_api::GROUP, sources_api::VERSION);
    store
        .writes()
        .into_iter()
        .skip(since)
        .filter(|w| w.verb == Verb::UpdateStatus)
        .map(|w| KReference::new(&api_version, &w.kind, &w.name).in_namespace(&w.namespace))
        .collect()
}

pub async fn simulate(text: &str, ns: &str, workers: usize, rounds: usize) -> Result<Report> {
    let store = Arc::new(MemoryStore::new());
    let loaded = load(&store, text, ns)?;
    info!(documents = loaded, "manifests loaded");

    let tracker = Arc::new(SinkTracker::default());
    let recorder = Arc::new(MemoryRecorder::default());
    let reconcilers: Vec<Arc<dyn KeyReconciler>> = vec![
        Arc::new(
            Reconciler::new(JobStrategy, store.clone(), store.clone(), store.clone(), recorder.clone())
                .with_tracker(tracker.clone()),
        ),
        Arc::new(
            Reconciler::new(CronJobStrategy, store.clone(), store.clone(), store.clone(), recorder.clone())
                .with_tracker(tracker.clone()),
        ),
        Arc::new(
            Reconciler::new(ServiceStrategy, store.clone(), store.clone(), store.clone(), recorder.clone())
                .with_tracker(tracker.clone()),
        ),
    ];

    let mut failures = 0;
    let mut changed: Vec<KReference> = Vec::new();
    for round in 1..=rounds {
        let since = store.write_count();
        let mut pools = Vec::new();
        for reconciler in &reconcilers {
            let queue = Arc::new(KeyQueue::new(reconciler.kind()));
            for sink in &changed {
                for (kind, owner) in tracker.owners_of(sink) {
                    if kind == reconciler.kind() {
                        debug!(sink = %sink, owner = %owner, "sink changed; enqueue owner");
                        queue.add(&owner.to_string());
                    }
                }
            }
            for key in source_keys(&store, reconciler.kind()) {
                queue.add(&key.to_string());
            }
            queue.shut_down();
            pools.push(spawn_workers(queue, reconciler.clone(), workers));
        }
        let outcomes: Vec<_> = futures::future::join_all(pools.into_iter().map(|p| p.join())).await.into_iter().flatten().collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        failures = failed;
        changed = written_sinks(&store, since);
        info!(round, reconciled = outcomes.len(), failed, writes = store.write_count() - since, "round finished");
    }

    let mut sources = Vec::new();
    for key in store.keys_of::<JobSource>() {
        sources.extend(row::<JobSource>(&store, &key));
    }
    for key in store.keys_of::<CronJobSource>() {
        sources.extend(row::<CronJobSource>(&store, &key));
    }
    for key in store.keys_of::<ServiceSource>() {
        sources.extend(row::<ServiceSource>(&store, &key));
    }

    let mut writes = BTreeMap::new();
    for w in store.writes() {
        *writes.entry(format!("{:?} {}", w.verb, w.kind)).or_insert(0) += 1;
    }
    let events = recorder.events().into_iter().map(|e| format!("{} {}: {}", e.regarding, e.event.reason, e.event.note)).collect();

    Ok(Report { rounds, failures, sources, writes, events })
}

fn row<K: Source>(store: &MemoryStore, key: &ObjectKey) -> Option<SourceRow> {
    let obj: K = store.fetch(&key.namespace, &key.name)?;
    let status = obj.status().cloned().unwrap_or_default();
    let happy = status.happy_condition();
    Some(SourceRow {
        kind: K::kind(&()).to_string(),
        key: key.to_string(),
        condition: happy.map(|c| c.type_.clone()).unwrap_or_default(),
        status: happy.map(|c| c.status.to_string()).unwrap_or_else(|| "Unknown".into()),
        reason: happy.map(|c| c.reason().to_string()).unwrap_or_default(),
        sink_uri: status.sink_uri().map(str::to_string),
        detail: serde_json::to_value(obj.status()).unwrap_or(Json::Null),
    })
}

pub fn print_human(report: &Report) {
    println!("{:<14} {:<28} {:<10} {:<8} {:<22} SINK", "KIND", "NAME", "CONDITION", "STATUS", "REASON");
    for r in &report.sources {
        println!(
            "{:<14} {:<28} {:<10} {:<8} {:<22} {}",
            r.kind,
            r.key,
            r.condition,
            r.status,
            r.reason,
            r.sink_uri.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("writes after {} round(s):", report.rounds);
    for (what, n) in &report.writes {
        println!("  {:<32} {}", what, n);
    }
    if !report.events.is_empty() {
        println!("events:");
        for e in &report.events {
            println!("  {}", e);
        }
    }
    if report.failures > 0 {
        println!("{} reconcile(s) failed in the last round", report.failures);
    }
}
