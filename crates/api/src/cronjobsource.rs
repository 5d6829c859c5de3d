//! CronJobSource: keeps a CronJob in place whose jobs send to the sink.

use k8s_openapi::api::batch::v1::{CronJobSpec, CronJobStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sources_core::conditions::{ConditionSet, READY, SINK_PROVIDED};

use crate::source::{impl_source, BaseSourceSpec, BaseSourceStatus, SourceStatus};

pub const CRON_JOB_CREATED: &str = "CronJobCreated";
pub const CRON_JOB_CONDITIONS: ConditionSet = ConditionSet::new(READY, &[SINK_PROVIDED, CRON_JOB_CREATED]);

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sources.knative.dev",
    version = "v1alpha1",
    kind = "CronJobSource",
    namespaced,
    status = "CronJobSourceStatus",
    shortname = "cronjobsrc",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Last Schedule","type":"date","jsonPath":".status.lastScheduleTime"}"#
)]
pub struct CronJobSourceSpec {
    #[serde(flatten)]
    pub source: BaseSourceSpec,
    #[serde(flatten)]
    pub cron_job: CronJobSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CronJobSourceStatus {
    #[serde(flatten)]
    pub source: BaseSourceStatus,
    #[serde(flatten)]
    pub cron_job: CronJobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronJobState {
    NoChildCreated,
    ChildCreated,
}

fn set_cron_job_defaults(spec: &mut CronJobSourceSpec) {
    let pod = spec
        .cron_job
        .job_template
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);
    if matches!(pod.restart_policy.as_deref(), None | Some("") | Some("Always")) {
        pod.restart_policy = Some("Never".to_string());
    }
}

impl_source!(CronJobSource, CronJobSourceStatus, set_cron_job_defaults);

impl SourceStatus for CronJobSourceStatus {
    const CONDITIONS: ConditionSet = CRON_JOB_CONDITIONS;

    fn base(&self) -> &BaseSourceStatus { &self.source }
    fn base_mut(&mut self) -> &mut BaseSourceStatus { &mut self.source }
}

impl CronJobSourceStatus {
    pub fn state(&self) -> CronJobState {
        match self.get_condition(CRON_JOB_CREATED) {
            Some(c) if c.is_true() => CronJobState::ChildCreated,
            _ => CronJobState::NoChildCreated,
        }
    }

    pub fn mark_cron_job_created(&mut self) {
        CRON_JOB_CONDITIONS.manage(&mut self.source.conditions).mark_true(CRON_JOB_CREATED);
    }

    /// Ignored once the CronJob has been created; creation is sticky.
    pub fn mark_no_cron_job(&mut self, reason: &str, message: &str) {
        if self.state() == CronJobState::ChildCreated {
            return;
        }
        CRON_JOB_CONDITIONS.manage(&mut self.source.conditions).mark_false(CRON_JOB_CREATED, reason, message);
    }

    pub fn propagate_cron_job_status(&mut self, observed: Option<&CronJobStatus>) {
        self.cron_job = observed.cloned().unwrap_or_default();
    }
}
