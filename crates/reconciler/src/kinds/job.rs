use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use sources_api::jobsource::{restart_policy_for, DEFAULT_BACKOFF_LIMIT};
use sources_api::{JobSource, JobSourceStatus, JobState, SourceStatus};

use crate::child::{child_meta, fixed_name, prepare_template, sink_env, ChildStrategy, DiffSummary};

const JOB_COMPLETE: &str = "Complete";
const JOB_FAILED: &str = "Failed";

/// JobSource -> batch/v1 Job. Jobs are immutable once started: a found
/// job is only ever observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStrategy;

impl ChildStrategy for JobStrategy {
    type Owner = JobSource;
    type Child = Job;

    const KIND: &'static str = "jobsource";

    fn child_name(&self, owner: &JobSource) -> String {
        let prefix = format!("{}-{}", owner.name_any(), Self::KIND);
        fixed_name(&prefix, &owner.uid().unwrap_or_default())
    }

    fn make_desired(&self, owner: &JobSource) -> Job {
        let (sink, format) = sink_env(owner);
        let mut spec = owner.spec.job.clone();
        let backoff = spec.backoff_limit.unwrap_or(DEFAULT_BACKOFF_LIMIT);
        let pod = prepare_template(&mut spec.template, owner, Self::KIND, &sink, format);
        if pod.restart_policy.as_deref().unwrap_or("").is_empty() {
            pod.restart_policy = Some(restart_policy_for(backoff).to_string());
        }
        Job { metadata: child_meta(owner, self.child_name(owner), Self::KIND), spec: Some(spec), status: None }
    }

    fn updates_in_place(&self) -> bool {
        false
    }

    fn diff(&self, _desired: &Job, _live: &Job) -> DiffSummary {
        DiffSummary::default()
    }

    fn apply_spec(&self, _desired: &Job, _live: &mut Job) {}

    fn mark_created(&self, status: &mut JobSourceStatus, child: &Job) {
        status.mark_job_running(&format!("Created Job \"{}\".", child.name_any()));
    }

    /// A job that already started keeps its state; get failures on a running
    /// job are transient and not recorded.
    fn may_create(&self, status: &JobSourceStatus) -> bool {
        !matches!(status.state(), JobState::Succeeded | JobState::Failed)
    }

    fn mark_failed(&self, status: &mut JobSourceStatus, reason: &str, message: &str) {
        if status.sink_locked() {
            return;
        }
        status.mark_job_failed(reason, message);
    }

    fn mirror_status(&self, status: &mut JobSourceStatus, child: &Job) {
        let conditions = child.status.as_ref().and_then(|s| s.conditions.as_deref()).unwrap_or_default();
        let terminal = |t: &str| conditions.iter().find(|c| c.type_ == t && c.status == "True");
        if terminal(JOB_COMPLETE).is_some() {
            status.mark_job_succeeded();
        } else if let Some(c) = terminal(JOB_FAILED) {
            status.mark_job_failed(c.reason.as_deref().unwrap_or(JOB_FAILED), c.message.as_deref().unwrap_or(""));
        } else if status.state() == JobState::NotStarted {
            status.mark_job_running(&format!("Job \"{}\" already exists.", child.name_any()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use sources_api::{JobSourceSpec, Source};
    use sources_core::Destination;

    fn owner() -> JobSource {
        let mut spec = JobSourceSpec::default();
        spec.source.sink = Destination::from_uri("http://sink");
        spec.job.template.spec = Some(PodSpec {
            containers: vec![Container { image: Some("img".into()), ..Default::default() }],
            ..Default::default()
        });
        let mut js = JobSource::new("src", spec);
        js.metadata.namespace = Some("ns".into());
        js.metadata.uid = Some("0a6f2b2e-8f3b-4c39-a7d3-0123456789ab".into());
        js.set_defaults();
        js.status_mut().initialize_conditions();
        js.status_mut().mark_sink("http://sink");
        js
    }

    #[test]
    fn desired_job_is_deterministic_and_owned() {
        let o = owner();
        let a = JobStrategy.make_desired(&o);
        let b = JobStrategy.make_desired(&o);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
        assert_eq!(a.metadata.name.as_deref(), Some("src-jobsource-0a6f2b2e-8f3b-4c39-a7d3-0123456789ab"));
        assert_eq!(a.metadata.namespace.as_deref(), Some("ns"));
        let refs = a.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].kind, "JobSource");
        let pod = a.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.containers[0].name, "jobsource0");
    }

    #[test]
    fn mirrors_terminal_job_conditions() {
        let mut status = owner().status.unwrap();
        let mut job = JobStrategy.make_desired(&owner());
        JobStrategy.mark_created(&mut status, &job);
        assert_eq!(status.state(), JobState::Running);

        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "True".into(),
                reason: Some("BackoffLimitExceeded".into()),
                message: Some("Job has reached the specified backoff limit".into()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        JobStrategy.mirror_status(&mut status, &job);
        assert_eq!(status.state(), JobState::Failed);
        let cond = status.get_condition(sources_api::jobsource::JOB_SUCCEEDED).unwrap();
        assert_eq!(cond.reason(), "BackoffLimitExceeded");
        assert_eq!(cond.message(), "Job has reached the specified backoff limit");
    }

    #[test]
    fn finished_sources_never_recreate_their_job() {
        let mut status = owner().status.unwrap();
        assert!(JobStrategy.may_create(&status));
        JobStrategy.mark_failed(&mut status, "FailedCreate", "quota");
        assert!(JobStrategy.may_create(&status));
        status.mark_job_running("started");
        assert!(JobStrategy.may_create(&status));
        status.mark_job_succeeded();
        assert!(!JobStrategy.may_create(&status));
        status.mark_job_failed("BackoffLimitExceeded", "");
        assert!(!JobStrategy.may_create(&status));
    }

    #[test]
    fn get_failure_after_start_is_not_recorded() {
        let mut status = owner().status.unwrap();
        status.mark_job_running("started");
        JobStrategy.mark_failed(&mut status, "FailedGet", "timeout");
        assert_eq!(status.state(), JobState::Running);
    }
}
