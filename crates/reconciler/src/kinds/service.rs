use kube::ResourceExt;
use sources_api::{KnativeService, KnativeServiceSpec, ServiceSource, ServiceSourceStatus};

use crate::child::{child_meta, prepare_template, sink_env, ChildStrategy};

/// ServiceSource -> serving.knative.dev/v1 Service, named after the owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStrategy;

impl ChildStrategy for ServiceStrategy {
    type Owner = ServiceSource;
    type Child = KnativeService;

    const KIND: &'static str = "servicesource";

    fn child_name(&self, owner: &ServiceSource) -> String {
        owner.name_any()
    }

    fn make_desired(&self, owner: &ServiceSource) -> KnativeService {
        let (sink, format) = sink_env(owner);
        let mut template = owner.spec.template.clone();
        prepare_template(&mut template, owner, Self::KIND, &sink, format);
        let mut svc = KnativeService::new(&self.child_name(owner), KnativeServiceSpec { template });
        svc.metadata = child_meta(owner, self.child_name(owner), Self::KIND);
        svc
    }

    fn apply_spec(&self, desired: &KnativeService, live: &mut KnativeService) {
        live.spec = desired.spec.clone();
    }

    fn mark_created(&self, status: &mut ServiceSourceStatus, child: &KnativeService) {
        self.mirror_status(status, child);
    }

    /// An updated service rolls out a new revision; readiness is re-observed.
    fn mark_updated(&self, status: &mut ServiceSourceStatus, _child: &KnativeService) {
        status.mark_service_deploying();
    }

    fn mark_failed(&self, status: &mut ServiceSourceStatus, reason: &str, message: &str) {
        status.mark_service_not_ready(reason, message);
    }

    fn mirror_status(&self, status: &mut ServiceSourceStatus, child: &KnativeService) {
        status.propagate_service_status(child.status.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use sources_api::{ServiceSourceSpec, ServiceState, Source, SourceStatus};
    use sources_core::Destination;

    fn owner() -> ServiceSource {
        let spec = ServiceSourceSpec {
            source: sources_api::BaseSourceSpec { sink: Destination::from_uri("http://sink"), output_format: None },
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container { name: "user".into(), image: Some("img".into()), ..Default::default() }],
                    ..Default::default()
                }),
            },
        };
        let mut o = ServiceSource::new("svc", spec);
        o.metadata.namespace = Some("ns".into());
        o.metadata.uid = Some("uid-1".into());
        o.set_defaults();
        o.status_mut().initialize_conditions();
        o.status_mut().mark_sink("http://sink");
        o
    }

    #[test]
    fn desired_service_injects_sink() {
        let svc = ServiceStrategy.make_desired(&owner());
        assert_eq!(svc.metadata.name.as_deref(), Some("svc"));
        let c = &svc.spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(c.name, "user");
        let env = c.env.as_ref().unwrap();
        assert_eq!(env[0].value.as_deref(), Some("http://sink"));
        assert_eq!(env[1].value.as_deref(), Some("binary"));
    }

    #[test]
    fn created_service_without_status_is_deploying() {
        let mut status = owner().status.unwrap();
        let svc = ServiceStrategy.make_desired(&owner());
        ServiceStrategy.mark_created(&mut status, &svc);
        assert_eq!(status.state(), ServiceState::Deploying);
        assert!(!status.is_ready());
    }
}
