use k8s_openapi::api::batch::v1::CronJob;
use kube::ResourceExt;
use sources_api::{CronJobSource, CronJobSourceStatus};

use crate::child::{child_meta, prepare_template, sink_env, ChildStrategy};

/// CronJobSource -> batch/v1 CronJob, named after the owner and kept in
/// line with the owner's spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronJobStrategy;

impl ChildStrategy for CronJobStrategy {
    type Owner = CronJobSource;
    type Child = CronJob;

    const KIND: &'static str = "cronjobsource";

    fn child_name(&self, owner: &CronJobSource) -> String {
        owner.name_any()
    }

    fn make_desired(&self, owner: &CronJobSource) -> CronJob {
        let (sink, format) = sink_env(owner);
        let mut spec = owner.spec.cron_job.clone();
        let job = spec.job_template.spec.get_or_insert_with(Default::default);
        let pod = prepare_template(&mut job.template, owner, Self::KIND, &sink, format);
        if matches!(pod.restart_policy.as_deref(), None | Some("") | Some("Always")) {
            pod.restart_policy = Some("Never".to_string());
        }
        CronJob { metadata: child_meta(owner, self.child_name(owner), Self::KIND), spec: Some(spec), status: None }
    }

    fn apply_spec(&self, desired: &CronJob, live: &mut CronJob) {
        live.spec = desired.spec.clone();
    }

    fn mark_created(&self, status: &mut CronJobSourceStatus, child: &CronJob) {
        self.mirror_status(status, child);
    }

    fn mark_failed(&self, status: &mut CronJobSourceStatus, reason: &str, message: &str) {
        status.mark_no_cron_job(reason, message);
    }

    fn mirror_status(&self, status: &mut CronJobSourceStatus, child: &CronJob) {
        status.mark_cron_job_created();
        status.propagate_cron_job_status(child.status.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::CronJobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use sources_api::{CronJobSourceSpec, CronJobState, Source, SourceStatus};
    use sources_core::Destination;

    fn owner() -> CronJobSource {
        let mut spec = CronJobSourceSpec::default();
        spec.source.sink = Destination::from_uri("http://sink");
        spec.cron_job.schedule = "*/1 * * * *".into();
        let mut o = CronJobSource::new("cron", spec);
        o.metadata.namespace = Some("ns".into());
        o.metadata.uid = Some("uid-1".into());
        o.set_defaults();
        o.status_mut().initialize_conditions();
        o.status_mut().mark_sink("http://sink");
        o
    }

    #[test]
    fn desired_cron_job_uses_owner_name_and_never_restarts() {
        let cj = CronJobStrategy.make_desired(&owner());
        assert_eq!(cj.metadata.name.as_deref(), Some("cron"));
        let spec = cj.spec.unwrap();
        assert_eq!(spec.schedule, "*/1 * * * *");
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn mirror_copies_schedule_times() {
        let mut status = owner().status.unwrap();
        let mut cj = CronJobStrategy.make_desired(&owner());
        let t = Time(chrono::Utc::now());
        cj.status = Some(CronJobStatus { last_schedule_time: Some(t.clone()), ..Default::default() });
        CronJobStrategy.mirror_status(&mut status, &cj);
        assert_eq!(status.state(), CronJobState::ChildCreated);
        assert_eq!(status.cron_job.last_schedule_time, Some(t));
        assert!(status.is_ready());
    }

    #[test]
    fn drift_detects_schedule_change_only() {
        let desired = CronJobStrategy.make_desired(&owner());
        let mut live = desired.clone();
        live.spec.as_mut().unwrap().concurrency_policy = Some("Allow".into());
        assert!(CronJobStrategy.diff(&desired, &live).is_empty());
        live.spec.as_mut().unwrap().schedule = "0 * * * *".into();
        assert_eq!(CronJobStrategy.diff(&desired, &live).updates, 1);
    }
}
