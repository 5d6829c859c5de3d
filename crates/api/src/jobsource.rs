//! JobSource: runs a batch Job once with the resolved sink injected.

use k8s_openapi::api::batch::v1::JobSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sources_core::conditions::{ConditionSet, SINK_PROVIDED, SUCCEEDED};

use crate::source::{impl_source, BaseSourceSpec, BaseSourceStatus, SourceStatus};

pub const JOB_SUCCEEDED: &str = "JobSucceeded";
pub const JOB_CONDITIONS: ConditionSet = ConditionSet::new(SUCCEEDED, &[SINK_PROVIDED, JOB_SUCCEEDED]);

pub const DEFAULT_BACKOFF_LIMIT: i32 = 6;

pub const REASON_RUNNING: &str = "Running";
pub const REASON_FAILED_CREATE: &str = "FailedCreate";
pub const REASON_FAILED_GET: &str = "FailedGet";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sources.knative.dev",
    version = "v1alpha1",
    kind = "JobSource",
    namespaced,
    status = "JobSourceStatus",
    shortname = "jobsrc",
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#,
    printcolumn = r#"{"name":"Sink","type":"string","jsonPath":".status.sinkUri"}"#
)]
pub struct JobSourceSpec {
    #[serde(flatten)]
    pub source: BaseSourceSpec,
    #[serde(flatten)]
    pub job: JobSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSourceStatus {
    #[serde(flatten)]
    pub source: BaseSourceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// Pods of a job that may be retried restart on failure; otherwise never.
pub fn restart_policy_for(backoff_limit: i32) -> &'static str {
    if backoff_limit > 0 { "OnFailure" } else { "Never" }
}

fn set_job_defaults(spec: &mut JobSourceSpec) {
    let backoff = *spec.job.backoff_limit.get_or_insert(DEFAULT_BACKOFF_LIMIT);
    let pod = spec.job.template.spec.get_or_insert_with(Default::default);
    if pod.restart_policy.as_deref().unwrap_or("").is_empty() {
        pod.restart_policy = Some(restart_policy_for(backoff).to_string());
    }
}

impl_source!(JobSource, JobSourceStatus, set_job_defaults);

impl SourceStatus for JobSourceStatus {
    const CONDITIONS: ConditionSet = JOB_CONDITIONS;

    fn base(&self) -> &BaseSourceStatus { &self.source }
    fn base_mut(&mut self) -> &mut BaseSourceStatus { &mut self.source }

    /// A started job keeps the sink it was launched with.
    fn sink_locked(&self) -> bool {
        self.state() != JobState::NotStarted
    }
}

impl JobSourceStatus {
    pub fn state(&self) -> JobState {
        match self.get_condition(JOB_SUCCEEDED) {
            Some(c) if c.is_true() => JobState::Succeeded,
            Some(c) if c.is_false() => match c.reason() {
                REASON_FAILED_CREATE | REASON_FAILED_GET => JobState::NotStarted,
                _ => JobState::Failed,
            },
            Some(c) if c.reason() == REASON_RUNNING => JobState::Running,
            _ => JobState::NotStarted,
        }
    }

    pub fn mark_job_running(&mut self, message: &str) {
        JOB_CONDITIONS.manage(&mut self.source.conditions).mark_unknown(JOB_SUCCEEDED, REASON_RUNNING, message);
    }

    pub fn mark_job_succeeded(&mut self) {
        JOB_CONDITIONS.manage(&mut self.source.conditions).mark_true(JOB_SUCCEEDED);
    }

    pub fn mark_job_failed(&mut self, reason: &str, message: &str) {
        JOB_CONDITIONS.manage(&mut self.source.conditions).mark_false(JOB_SUCCEEDED, reason, message);
    }

    pub fn succeeded(&self) -> bool {
        self.is_ready()
    }
}
