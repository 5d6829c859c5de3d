//! Resource types for the `sources.knative.dev` group and the parts of
//! `serving.knative.dev` they own.

#![forbid(unsafe_code)]

pub mod cronjobsource;
pub mod jobsource;
pub mod serving;
pub mod servicesource;
pub mod source;

pub use cronjobsource::{CronJobSource, CronJobSourceSpec, CronJobSourceStatus, CronJobState};
pub use jobsource::{JobSource, JobSourceSpec, JobSourceStatus, JobState};
pub use serving::{Addressable, KnativeService, KnativeServiceSpec, KnativeServiceStatus};
pub use servicesource::{ServiceSource, ServiceSourceSpec, ServiceSourceStatus, ServiceState};
pub use source::{BaseSourceSpec, BaseSourceStatus, Source, SourceStatus};

pub const GROUP: &str = "sources.knative.dev";
pub const VERSION: &str = "v1alpha1";

/// CustomResourceDefinitions for every source kind.
pub fn crds() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition> {
    use kube::CustomResourceExt;
    vec![JobSource::crd(), CronJobSource::crd(), ServiceSource::crd()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crds_cover_all_kinds() {
        let names: Vec<_> = crds().into_iter().map(|c| c.metadata.name.unwrap_or_default()).collect();
        assert_eq!(
            names,
            vec![
                "jobsources.sources.knative.dev",
                "cronjobsources.sources.knative.dev",
                "servicesources.sources.knative.dev"
            ]
        );
    }
}
