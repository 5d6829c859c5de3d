use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::Discovery;
use kube::Client;
use rustc_hash::FxHashMap;
use sources_core::{address_from_object, AddressLookup, KReference, SourceError, SourceResult};
use tracing::debug;

use crate::map_kube_err;

/// Resolves references of any kind by discovering the serving API resource
/// once per apiVersion/kind and reading the object dynamically.
pub struct DynamicAddressLookup {
    client: Client,
    resources: Mutex<FxHashMap<(String, String), ApiResource>>,
}

pub(crate) fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

impl DynamicAddressLookup {
    pub fn new(client: Client) -> Self {
        Self { client, resources: Mutex::new(FxHashMap::default()) }
    }

    fn cached(&self, key: &(String, String)) -> Option<ApiResource> {
        self.resources.lock().ok().and_then(|m| m.get(key).cloned())
    }

    async fn api_resource(&self, reference: &KReference) -> SourceResult<ApiResource> {
        let key = (reference.api_version.clone(), reference.kind.clone());
        if let Some(ar) = self.cached(&key) {
            return Ok(ar);
        }
        let (group, version) = split_api_version(&reference.api_version);
        let discovery = Discovery::new(self.client.clone()).filter(&[group]).run().await.map_err(map_kube_err)?;
        for api_group in discovery.groups() {
            for (ar, _caps) in api_group.versioned_resources(version) {
                if ar.kind == reference.kind {
                    debug!(api_version = %reference.api_version, kind = %reference.kind, plural = %ar.plural, "discovered");
                    if let Ok(mut m) = self.resources.lock() {
                        m.insert(key, ar.clone());
                    }
                    return Ok(ar);
                }
            }
        }
        Err(SourceError::NotFound(format!("no served resource for {}", reference)))
    }
}

#[async_trait]
impl AddressLookup for DynamicAddressLookup {
    async fn resolve(&self, reference: &KReference) -> SourceResult<String> {
        let ar = self.api_resource(reference).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), reference.namespace(), &ar);
        let obj = api
            .get_opt(&reference.name)
            .await
            .map_err(map_kube_err)?
            .ok_or_else(|| SourceError::NotFound(format!("{} not found", reference)))?;
        let raw = serde_json::to_value(&obj).map_err(|e| SourceError::Store(e.to_string()))?;
        address_from_object(reference, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_has_no_prefix() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("serving.knative.dev/v1"), ("serving.knative.dev", "v1"));
    }
}
