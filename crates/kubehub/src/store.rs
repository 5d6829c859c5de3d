use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sources_core::{ResourceStore, SourceError, SourceResult};
use tracing::debug;

use crate::map_kube_err;

/// [`ResourceStore`] over the API server. Reads go through the reflector
/// cache when one is attached, otherwise straight to the server.
pub struct KubeStore<K: Resource<DynamicType = ()> + Clone + 'static> {
    client: Client,
    cache: Option<Store<K>>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + 'static,
{
    pub fn new(client: Client) -> Self {
        Self { client, cache: None }
    }

    pub fn with_cache(mut self, cache: Store<K>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn record(verb: &'static str, kind: &str, ok: bool) {
    metrics::counter!(
        "sources_kube_requests_total",
        1u64,
        "verb" => verb,
        "kind" => kind.to_string(),
        "outcome" => if ok { "ok" } else { "error" }
    );
}

fn target<K: Resource>(obj: &K) -> SourceResult<(String, String)> {
    let name = obj.meta().name.clone().ok_or_else(|| SourceError::Store("object has no name".into()))?;
    Ok((obj.namespace().unwrap_or_default(), name))
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> SourceResult<Option<K>> {
        if let Some(cache) = &self.cache {
            let found = cache.get(&ObjectRef::new(name).within(namespace));
            return Ok(found.map(|o| o.as_ref().clone()));
        }
        let res = self.api(namespace).get_opt(name).await;
        record("get", &K::kind(&()), res.is_ok());
        res.map_err(map_kube_err)
    }

    async fn create(&self, obj: &K) -> SourceResult<K> {
        let (ns, name) = target(obj)?;
        debug!(kind = %K::kind(&()), ns = %ns, name = %name, "create");
        let res = self.api(&ns).create(&PostParams::default(), obj).await;
        record("create", &K::kind(&()), res.is_ok());
        res.map_err(map_kube_err)
    }

    async fn update(&self, obj: &K) -> SourceResult<K> {
        let (ns, name) = target(obj)?;
        debug!(kind = %K::kind(&()), ns = %ns, name = %name, "replace");
        let res = self.api(&ns).replace(&name, &PostParams::default(), obj).await;
        record("update", &K::kind(&()), res.is_ok());
        res.map_err(map_kube_err)
    }

    async fn update_status(&self, obj: &K) -> SourceResult<K> {
        let (ns, name) = target(obj)?;
        let body = serde_json::to_vec(obj).map_err(|e| SourceError::Store(e.to_string()))?;
        let res = self.api(&ns).replace_status(&name, &PostParams::default(), body).await;
        record("update_status", &K::kind(&()), res.is_ok());
        res.map_err(map_kube_err)
    }
}
