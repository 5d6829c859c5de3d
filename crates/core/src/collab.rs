//! Collaborators the reconcilers consume: object storage, addressable
//! lookup and event publishing.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use serde_json::Value as Json;

use crate::destination::KReference;
use crate::error::{SourceError, SourceResult};

/// Typed access to one resource kind. `get` reads the (possibly stale)
/// cache; writes go to the authoritative store and are guarded by the
/// object's resourceVersion.
#[async_trait]
pub trait ResourceStore<K: Send + Sync + 'static>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> SourceResult<Option<K>>;
    async fn create(&self, obj: &K) -> SourceResult<K>;
    async fn update(&self, obj: &K) -> SourceResult<K>;
    async fn update_status(&self, obj: &K) -> SourceResult<K>;
}

/// Resolves an object reference to the URL it is addressable at.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn resolve(&self, reference: &KReference) -> SourceResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub type_: EventType,
    pub reason: String,
    pub note: String,
}

impl EventRecord {
    pub fn warning(reason: &str, note: impl Into<String>) -> Self {
        Self { type_: EventType::Warning, reason: reason.to_string(), note: note.into() }
    }

    pub fn normal(reason: &str, note: impl Into<String>) -> Self {
        Self { type_: EventType::Normal, reason: reason.to_string(), note: note.into() }
    }
}

/// Operator-visible events. Publishing is best effort; implementations log
/// their own failures.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(&self, regarding: &ObjectReference, event: EventRecord);
}

/// Extract the address of a looked-up object. Core `v1/Service` objects are
/// addressed by cluster DNS; everything else must publish `status.address.url`.
pub fn address_from_object(reference: &KReference, obj: &Json) -> SourceResult<String> {
    if reference.api_version == "v1" && reference.kind == "Service" {
        return Ok(format!("http://{}.{}.svc.cluster.local/", reference.name, reference.namespace()));
    }
    let url = obj
        .pointer("/status/address/url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SourceError::AddressUnresolvable(format!("{} does not contain address", reference)))?;
    match url::Url::parse(url) {
        Ok(u) if u.host_str().map(|h| !h.is_empty()).unwrap_or(false) => Ok(url.to_string()),
        _ => Err(SourceError::AddressUnresolvable(format!("hostname missing in address of {}", reference))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn addressable_url_is_returned_verbatim() {
        let r = KReference::new("serving.knative.dev/v1", "Service", "svc").in_namespace("ns");
        let obj = json!({"status": {"address": {"url": "http://svc.ns.example.com/path"}}});
        assert_eq!(address_from_object(&r, &obj).unwrap(), "http://svc.ns.example.com/path");
    }

    #[test]
    fn core_service_uses_cluster_dns() {
        let r = KReference::new("v1", "Service", "web").in_namespace("prod");
        assert_eq!(address_from_object(&r, &json!({})).unwrap(), "http://web.prod.svc.cluster.local/");
    }

    #[test]
    fn missing_or_hostless_address_is_unresolvable() {
        let r = KReference::new("example.dev/v1", "Thing", "t").in_namespace("ns");
        for obj in [json!({}), json!({"status": {"address": {"url": "messenger://"}}})] {
            let err = address_from_object(&r, &obj).unwrap_err();
            assert!(matches!(err, SourceError::AddressUnresolvable(_)), "{err}");
        }
    }
}
