//! Owned children: building the desired object, comparing it with the live
//! one, and folding the outcome back into the owner's status.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use sources_api::{Source, SourceStatus};
use sources_core::{OutputFormat, ResourceStore, SourceError, SourceResult};
use tracing::{debug, info, warn};

pub const LABEL_PREFIX: &str = "sources.knative.dev";
pub const ENV_SINK: &str = "K_SINK";
pub const ENV_OUTPUT_FORMAT: &str = "K_OUTPUT_FORMAT";

const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";
const MAX_NAME_LEN: usize = 63;

pub const REASON_FAILED_CREATE: &str = "FailedCreate";
pub const REASON_FAILED_GET: &str = "FailedGet";
pub const REASON_FAILED_UPDATE: &str = "FailedUpdate";

pub type StatusOf<S> = <<S as ChildStrategy>::Owner as Source>::Status;

/// Per-kind knowledge the generic child manager delegates to.
pub trait ChildStrategy: Send + Sync + 'static {
    type Owner: Source;
    type Child: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Lowercase owner kind. Used in logs, metric labels, the tracking label
    /// key and synthesized container names.
    const KIND: &'static str;

    fn child_name(&self, owner: &Self::Owner) -> String;

    /// Pure function of the owner (spec, metadata and captured sink).
    fn make_desired(&self, owner: &Self::Owner) -> Self::Child;

    /// Whether a missing child may be (re)created for this status. Owners in
    /// a terminal state keep their status instead.
    fn may_create(&self, _status: &StatusOf<Self>) -> bool {
        true
    }

    /// Whether a drifted child is brought back in line with an update.
    fn updates_in_place(&self) -> bool {
        true
    }

    fn diff(&self, desired: &Self::Child, live: &Self::Child) -> DiffSummary {
        spec_drift(&spec_of(desired), &spec_of(live))
    }

    /// Copy the desired spec onto the live object before updating it.
    fn apply_spec(&self, desired: &Self::Child, live: &mut Self::Child);

    fn mark_created(&self, status: &mut StatusOf<Self>, child: &Self::Child);

    fn mark_updated(&self, status: &mut StatusOf<Self>, child: &Self::Child) {
        self.mirror_status(status, child);
    }

    fn mark_failed(&self, status: &mut StatusOf<Self>, reason: &str, message: &str);

    /// Copy the child's observed status onto the owner. Never writes the child.
    fn mirror_status(&self, status: &mut StatusOf<Self>, child: &Self::Child);
}

/// Field counts by which a desired spec differs from the live one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Every field present in `desired` must equal the live field; fields the
/// server added on `live` are ignored. Arrays compare element-wise and
/// count length differences as adds (desired longer) or removes (live longer).
pub fn spec_drift(desired: &Json, live: &Json) -> DiffSummary {
    fn walk(d: &Json, l: &Json, s: &mut DiffSummary) {
        use serde_json::Value as V;
        match (d, l) {
            (V::Null, _) => {}
            (V::Object(dobj), V::Object(lobj)) => {
                for (k, dv) in dobj {
                    match lobj.get(k) {
                        Some(lv) => walk(dv, lv, s),
                        None if dv.is_null() => {}
                        None => s.adds += 1,
                    }
                }
            }
            (V::Array(da), V::Array(la)) => {
                for (dv, lv) in da.iter().zip(la) {
                    walk(dv, lv, s);
                }
                s.adds += da.len().saturating_sub(la.len());
                s.removes += la.len().saturating_sub(da.len());
            }
            (dv, lv) => {
                if dv != lv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(desired, live, &mut s);
    s
}

fn spec_of<K: Serialize>(obj: &K) -> Json {
    serde_json::to_value(obj).ok().and_then(|v| v.get("spec").cloned()).unwrap_or(Json::Null)
}

/// `<prefix>-<uid>`, with the prefix cut so the name stays a valid DNS label.
/// Without a uid the (cut) prefix alone is used.
pub fn fixed_name(prefix: &str, uid: &str) -> String {
    if uid.is_empty() {
        let prefix: String = prefix.chars().take(MAX_NAME_LEN).collect();
        return prefix.trim_end_matches('-').to_string();
    }
    let room = MAX_NAME_LEN.saturating_sub(uid.len() + 1);
    let prefix: String = prefix.chars().take(room).collect();
    format!("{}-{}", prefix.trim_end_matches('-'), uid)
}

pub fn tracking_label(kind: &str) -> String {
    format!("{}/{}", LABEL_PREFIX, kind)
}

/// Owner labels plus the tracking key pointing back at the owner.
pub fn owner_labels<O: Resource>(owner: &O, kind: &str) -> BTreeMap<String, String> {
    let mut labels = owner.labels().clone();
    labels.insert(tracking_label(kind), owner.name_any());
    labels
}

pub fn owner_annotations<O: Resource>(owner: &O) -> BTreeMap<String, String> {
    let mut annotations = owner.annotations().clone();
    annotations.remove(LAST_APPLIED);
    annotations
}

/// Child metadata: deterministic name, owner namespace, one controller
/// owner reference, tracking labels.
pub fn child_meta<O: Resource<DynamicType = ()>>(owner: &O, name: String, kind: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: owner.meta().namespace.clone(),
        labels: Some(owner_labels(owner, kind)),
        annotations: Some(owner_annotations(owner)).filter(|a| !a.is_empty()),
        owner_references: owner.controller_owner_ref(&()).map(|r: OwnerReference| vec![r]),
        ..Default::default()
    }
}

/// Label and annotate the pod template, name anonymous containers and
/// append the sink environment to every container.
pub fn prepare_template<'a, O: Resource>(
    template: &'a mut PodTemplateSpec,
    owner: &O,
    kind: &str,
    sink: &str,
    format: OutputFormat,
) -> &'a mut PodSpec {
    let meta = template.metadata.get_or_insert_with(Default::default);
    meta.labels.get_or_insert_with(Default::default).extend(owner_labels(owner, kind));
    let annotations = owner_annotations(owner);
    if !annotations.is_empty() {
        meta.annotations.get_or_insert_with(Default::default).extend(annotations);
    }
    let pod = template.spec.get_or_insert_with(Default::default);
    for (i, c) in pod.containers.iter_mut().enumerate() {
        if c.name.is_empty() {
            c.name = format!("{}{}", kind, i);
        }
        let env = c.env.get_or_insert_with(Vec::new);
        env.push(EnvVar { name: ENV_SINK.into(), value: Some(sink.to_string()), value_from: None });
        env.push(EnvVar { name: ENV_OUTPUT_FORMAT.into(), value: Some(format.to_string()), value_from: None });
    }
    pod
}

/// Captured sink and output format of an owner.
pub fn sink_env<O: Source>(owner: &O) -> (String, OutputFormat) {
    let sink = owner.status().and_then(|s| s.sink_uri()).unwrap_or("").to_string();
    (sink, owner.base_spec().output_format())
}

/// Gets, creates or updates the child of one owner and records the result
/// in the owner's status.
pub struct ChildResourceManager<S: ChildStrategy> {
    strategy: S,
    store: Arc<dyn ResourceStore<S::Child>>,
}

impl<S: ChildStrategy> ChildResourceManager<S> {
    pub fn new(strategy: S, store: Arc<dyn ResourceStore<S::Child>>) -> Self {
        Self { strategy, store }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub async fn reconcile(&self, owner: &mut S::Owner) -> SourceResult<()> {
        let name = self.strategy.child_name(owner);
        let namespace = owner.namespace().unwrap_or_default();
        let desired = self.strategy.make_desired(owner);
        let child_kind = <S::Child as Resource>::kind(&());

        let live = match self.store.get(&namespace, &name).await {
            Ok(live) => live,
            Err(e) => {
                warn!(child = %name, error = %e, "failed to get child");
                let msg = format!("Failed to get {} \"{}\": {}", child_kind, name, e);
                self.strategy.mark_failed(owner.status_mut(), REASON_FAILED_GET, &msg);
                return Err(e);
            }
        };

        let Some(mut live) = live else {
            if !self.strategy.may_create(owner.status_mut()) {
                debug!(child = %name, "child is gone and the owner is finished; not recreating");
                return Ok(());
            }
            return match self.store.create(&desired).await {
                Ok(created) => {
                    metrics::counter!("sources_child_writes_total", 1u64, "kind" => S::KIND, "verb" => "create");
                    info!(child = %name, "created {}", child_kind);
                    self.strategy.mark_created(owner.status_mut(), &created);
                    Ok(())
                }
                Err(e) => {
                    let msg = format!("Failed to create {} \"{}\": {}", child_kind, name, e);
                    warn!(child = %name, error = %e, "failed to create child");
                    self.strategy.mark_failed(owner.status_mut(), REASON_FAILED_CREATE, &msg);
                    Err(SourceError::ChildMutation(msg))
                }
            };
        };

        if self.strategy.updates_in_place() {
            let drift = self.strategy.diff(&desired, &live);
            if !drift.is_empty() {
                debug!(child = %name, adds = drift.adds, updates = drift.updates, removes = drift.removes, "child drifted");
                self.strategy.apply_spec(&desired, &mut live);
                return match self.store.update(&live).await {
                    Ok(updated) => {
                        metrics::counter!("sources_child_writes_total", 1u64, "kind" => S::KIND, "verb" => "update");
                        info!(child = %name, "updated {}", child_kind);
                        self.strategy.mark_updated(owner.status_mut(), &updated);
                        Ok(())
                    }
                    Err(e) => {
                        let msg = format!("Failed to update {} \"{}\": {}", child_kind, name, e);
                        warn!(child = %name, error = %e, "failed to update child");
                        self.strategy.mark_failed(owner.status_mut(), REASON_FAILED_UPDATE, &msg);
                        Err(SourceError::ChildMutation(msg))
                    }
                };
            }
        }

        self.strategy.mirror_status(owner.status_mut(), &live);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Container;
    use serde_json::json;
    use sources_api::{JobSource, JobSourceSpec};

    #[test]
    fn drift_ignores_server_populated_fields() {
        let desired = json!({"template": {"spec": {"containers": [{"name": "a", "image": "img"}]}}});
        let live = json!({"template": {"spec": {
            "containers": [{"name": "a", "image": "img", "terminationMessagePath": "/dev/termination-log"}],
            "dnsPolicy": "ClusterFirst"
        }}});
        assert!(spec_drift(&desired, &live).is_empty());
    }

    #[test]
    fn drift_counts_changes() {
        let desired = json!({"a": 2, "b": {"x": 1, "y": 2}, "c": [1, 9], "d": true});
        let live = json!({"a": 1, "b": {"x": 1}, "c": [1, 2, 3], "e": "server"});
        let s = spec_drift(&desired, &live);
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
    }

    #[test]
    fn fixed_name_fits_dns_label() {
        let uid = "0a6f2b2e-8f3b-4c39-a7d3-0123456789ab";
        let n = fixed_name(&format!("{}-jobsource", "a".repeat(80)), uid);
        assert_eq!(n.len(), 63);
        assert!(n.ends_with(uid));
        assert_eq!(fixed_name("short-jobsource", "u1"), "short-jobsource-u1");
    }

    #[test]
    fn fixed_name_without_uid_has_no_trailing_dash() {
        assert_eq!(fixed_name("src-jobsource", ""), "src-jobsource");
        let n = fixed_name(&format!("{}-jobsource", "b".repeat(70)), "");
        assert_eq!(n.len(), 63);
        assert!(!n.ends_with('-'));
    }

    #[test]
    fn template_gets_labels_names_and_env() {
        let mut owner = JobSource::new("src", JobSourceSpec::default());
        owner.metadata.labels = Some([("team".to_string(), "a".to_string())].into());
        owner.metadata.annotations = Some([(LAST_APPLIED.to_string(), "{}".to_string())].into());
        let mut template = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    image: Some("img".into()),
                    env: Some(vec![EnvVar { name: "USER".into(), value: Some("1".into()), value_from: None }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        };
        let pod = prepare_template(&mut template, &owner, "jobsource", "http://sink", OutputFormat::Structured);
        let c = &pod.containers[0];
        assert_eq!(c.name, "jobsource0");
        let env: Vec<_> = c.env.as_ref().unwrap().iter().map(|e| (e.name.as_str(), e.value.as_deref())).collect();
        assert_eq!(
            env,
            vec![("USER", Some("1")), (ENV_SINK, Some("http://sink")), (ENV_OUTPUT_FORMAT, Some("structured"))]
        );
        let meta = template.metadata.unwrap();
        assert_eq!(meta.labels.unwrap().get("sources.knative.dev/jobsource").map(String::as_str), Some("src"));
        assert!(meta.annotations.is_none());
    }
}
