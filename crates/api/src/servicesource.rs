//! ServiceSource: keeps a Knative Service running with the sink injected.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sources_core::conditions::{ConditionSet, ConditionStatus, READY, SINK_PROVIDED};

use crate::serving::{Addressable, KnativeServiceStatus};
use crate::source::{impl_source, BaseSourceSpec, BaseSourceStatus, SourceStatus};

pub const SERVICE_READY: &str = "ServiceReady";
pub const SERVICE_CONDITIONS: ConditionSet = ConditionSet::new(READY, &[SINK_PROVIDED, SERVICE_READY]);

pub const REASON_DEPLOYING: &str = "Deploying";
const DEPLOYING_MESSAGE: &str = "Service created; awaiting readiness";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sources.knative.dev",
    version = "v1alpha1",
    kind = "ServiceSource",
    namespaced,
    status = "ServiceSourceStatus",
    shortname = "svcsrc",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#
)]
pub struct ServiceSourceSpec {
    #[serde(flatten)]
    pub source: BaseSourceSpec,
    #[serde(default)]
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceSourceStatus {
    #[serde(flatten)]
    pub source: BaseSourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotDeployed,
    Deploying,
    Ready,
    NotReady,
    Unknown,
}

fn set_service_defaults(_spec: &mut ServiceSourceSpec) {}

impl_source!(ServiceSource, ServiceSourceStatus, set_service_defaults);

impl SourceStatus for ServiceSourceStatus {
    const CONDITIONS: ConditionSet = SERVICE_CONDITIONS;

    fn base(&self) -> &BaseSourceStatus { &self.source }
    fn base_mut(&mut self) -> &mut BaseSourceStatus { &mut self.source }
}

impl ServiceSourceStatus {
    pub fn state(&self) -> ServiceState {
        match self.get_condition(SERVICE_READY) {
            None => ServiceState::NotDeployed,
            Some(c) => match c.status {
                ConditionStatus::True => ServiceState::Ready,
                ConditionStatus::False => ServiceState::NotReady,
                ConditionStatus::Unknown if c.reason() == REASON_DEPLOYING => ServiceState::Deploying,
                ConditionStatus::Unknown if c.reason().is_empty() => ServiceState::NotDeployed,
                ConditionStatus::Unknown => ServiceState::Unknown,
            },
        }
    }

    pub fn mark_service_deploying(&mut self) {
        self.mark_service_ready_unknown(REASON_DEPLOYING, DEPLOYING_MESSAGE);
    }

    pub fn mark_service_ready(&mut self) {
        SERVICE_CONDITIONS.manage(&mut self.source.conditions).mark_true(SERVICE_READY);
    }

    pub fn mark_service_ready_unknown(&mut self, reason: &str, message: &str) {
        SERVICE_CONDITIONS.manage(&mut self.source.conditions).mark_unknown(SERVICE_READY, reason, message);
    }

    pub fn mark_service_not_ready(&mut self, reason: &str, message: &str) {
        SERVICE_CONDITIONS.manage(&mut self.source.conditions).mark_false(SERVICE_READY, reason, message);
    }

    /// Mirror readiness, address and URL from the observed Knative Service.
    /// A service that has not reported readiness yet counts as deploying.
    pub fn propagate_service_status(&mut self, observed: Option<&KnativeServiceStatus>) {
        match observed.and_then(KnativeServiceStatus::ready_condition) {
            None => self.mark_service_deploying(),
            Some(c) => match c.status {
                ConditionStatus::True => self.mark_service_ready(),
                ConditionStatus::False => self.mark_service_not_ready(c.reason(), c.message()),
                ConditionStatus::Unknown => self.mark_service_ready_unknown(c.reason(), c.message()),
            },
        }
        self.address = observed.and_then(|s| s.address.clone());
        self.url = observed.and_then(|s| s.url.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sources_core::Condition;

    fn observed(status: ConditionStatus, reason: &str) -> KnativeServiceStatus {
        KnativeServiceStatus {
            conditions: vec![Condition::new(READY, status).with_reason(reason, "msg")],
            address: Some(Addressable { url: Some("http://svc.ns.svc.cluster.local".into()) }),
            url: Some("http://svc.ns.example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn state_follows_child_readiness() {
        let mut s = ServiceSourceStatus::default();
        s.initialize_conditions();
        assert_eq!(s.state(), ServiceState::NotDeployed);

        s.propagate_service_status(None);
        assert_eq!(s.state(), ServiceState::Deploying);

        s.propagate_service_status(Some(&observed(ConditionStatus::Unknown, "RevisionMissing")));
        assert_eq!(s.state(), ServiceState::Unknown);

        s.propagate_service_status(Some(&observed(ConditionStatus::False, "RevisionFailed")));
        assert_eq!(s.state(), ServiceState::NotReady);
        assert_eq!(s.get_condition(SERVICE_READY).unwrap().reason(), "RevisionFailed");

        s.propagate_service_status(Some(&observed(ConditionStatus::True, "")));
        assert_eq!(s.state(), ServiceState::Ready);
        assert_eq!(s.url.as_deref(), Some("http://svc.ns.example.com"));
    }

    #[test]
    fn ready_needs_sink_and_service() {
        let mut s = ServiceSourceStatus::default();
        s.initialize_conditions();
        s.propagate_service_status(Some(&observed(ConditionStatus::True, "")));
        assert!(!s.is_ready());
        s.mark_sink("http://sink");
        assert!(s.is_ready());
    }
}
