use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use kube::Resource;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use sources_core::{address_from_object, AddressLookup, KReference, ObjectKey, ResourceStore, SourceError, SourceResult};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
}

/// One successful write, in the order the store accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAction {
    pub verb: Verb,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StoreKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl StoreKey {
    fn of(obj: &Json) -> SourceResult<Self> {
        let field = |ptr: &str| obj.pointer(ptr).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let key = Self {
            api_version: field("/apiVersion"),
            kind: field("/kind"),
            namespace: field("/metadata/namespace"),
            name: field("/metadata/name"),
        };
        if key.api_version.is_empty() || key.kind.is_empty() || key.name.is_empty() {
            return Err(SourceError::Store("object needs apiVersion, kind and metadata.name".into()));
        }
        Ok(key)
    }

    fn typed<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> Self {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Default)]
struct Snapshot {
    epoch: u64,
    objects: FxHashMap<StoreKey, Json>,
}

#[derive(Default)]
struct Server {
    objects: FxHashMap<StoreKey, Json>,
    resource_version: u64,
    writes: Vec<WriteAction>,
    failures: FxHashMap<(Verb, String), SourceError>,
}

impl Server {
    fn take_failure(&mut self, verb: Verb, kind: &str) -> SourceResult<()> {
        match self.failures.remove(&(verb, kind.to_string())) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record(&mut self, verb: Verb, key: &StoreKey) {
        self.writes.push(WriteAction {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }
}

/// Authoritative object map plus a read cache. Reads (`get`, address lookups)
/// see the cache; writes land on the server and are published to the cache
/// immediately unless the store is lagging, in which case `sync` publishes.
pub struct MemoryStore {
    server: Mutex<Server>,
    cache: ArcSwap<Snapshot>,
    lagging: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            server: Mutex::new(Server::default()),
            cache: ArcSwap::from_pointee(Snapshot::default()),
            lagging: AtomicBool::new(false),
        }
    }

    /// A store whose cache only catches up on `sync`.
    pub fn lagging() -> Self {
        let s = Self::new();
        s.lagging.store(true, Ordering::SeqCst);
        s
    }

    fn lock(&self) -> MutexGuard<'_, Server> {
        self.server.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, server: &Server) {
        self.cache.store(Arc::new(Snapshot { epoch: server.resource_version, objects: server.objects.clone() }));
    }

    fn maybe_publish(&self, server: &Server) {
        if !self.lagging.load(Ordering::SeqCst) {
            self.publish(server);
        }
    }

    /// Bring the read cache up to date with the server.
    pub fn sync(&self) {
        let server = self.lock();
        self.publish(&server);
    }

    /// Resource version the cache currently reflects.
    pub fn cache_epoch(&self) -> u64 {
        self.cache.load().epoch
    }

    /// Seed an object without recording a write. Missing uid and
    /// resourceVersion are filled in.
    pub fn insert_raw(&self, mut obj: Json) -> SourceResult<()> {
        let key = StoreKey::of(&obj)?;
        let mut server = self.lock();
        let rv = server.next_version();
        stamp(&mut obj, &rv, true);
        server.objects.insert(key, obj);
        self.publish(&server);
        Ok(())
    }

    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, obj: &K) -> SourceResult<()> {
        self.insert_raw(to_json(obj)?)
    }

    /// Make the next `verb` on `kind` fail with `err`.
    pub fn fail_next(&self, verb: Verb, kind: &str, err: SourceError) {
        self.lock().failures.insert((verb, kind.to_string()), err);
    }

    pub fn writes(&self) -> Vec<WriteAction> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Authoritative read, bypassing the cache.
    pub fn fetch<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: &str, name: &str) -> Option<K> {
        let server = self.lock();
        let raw = server.objects.get(&StoreKey::typed::<K>(namespace, name))?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Keys of every stored object of type `K`, sorted.
    pub fn keys_of<K: Resource<DynamicType = ()>>(&self) -> Vec<ObjectKey> {
        let (api_version, kind) = (K::api_version(&()), K::kind(&()));
        let server = self.lock();
        let mut keys: Vec<_> = server
            .objects
            .keys()
            .filter(|k| k.api_version == api_version && k.kind == kind)
            .map(|k| ObjectKey::new(k.namespace.clone(), k.name.clone()))
            .collect();
        keys.sort();
        keys
    }

    fn create_raw(&self, mut obj: Json) -> SourceResult<Json> {
        let key = StoreKey::of(&obj)?;
        let mut server = self.lock();
        server.take_failure(Verb::Create, &key.kind)?;
        if server.objects.contains_key(&key) {
            return Err(SourceError::Conflict(format!("{} {}/{} already exists", key.kind, key.namespace, key.name)));
        }
        let rv = server.next_version();
        stamp(&mut obj, &rv, true);
        server.objects.insert(key.clone(), obj.clone());
        server.record(Verb::Create, &key);
        self.maybe_publish(&server);
        debug!(kind = %key.kind, ns = %key.namespace, name = %key.name, rv = %rv, "created");
        Ok(obj)
    }

    fn update_raw(&self, mut obj: Json, verb: Verb) -> SourceResult<Json> {
        let key = StoreKey::of(&obj)?;
        let mut server = self.lock();
        server.take_failure(verb, &key.kind)?;
        let Some(stored) = server.objects.get(&key).cloned() else {
            return Err(SourceError::NotFound(format!("{} {}/{} not found", key.kind, key.namespace, key.name)));
        };
        let want = obj.pointer("/metadata/resourceVersion").and_then(|v| v.as_str()).unwrap_or("");
        let have = stored.pointer("/metadata/resourceVersion").and_then(|v| v.as_str()).unwrap_or("");
        if !want.is_empty() && want != have {
            return Err(SourceError::Conflict(format!(
                "{} {}/{}: resourceVersion {} is stale (current {})",
                key.kind, key.namespace, key.name, want, have
            )));
        }
        let mut next = match verb {
            Verb::UpdateStatus => {
                let mut next = stored.clone();
                set_field(&mut next, "status", obj.get("status").cloned());
                next
            }
            _ => {
                let generation = stored.pointer("/metadata/generation").and_then(|v| v.as_i64()).unwrap_or(1);
                let bumped = if obj.get("spec") != stored.get("spec") { generation + 1 } else { generation };
                set_field(&mut obj, "status", stored.get("status").cloned());
                if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                    meta.insert("generation".into(), Json::from(bumped));
                    if let Some(uid) = stored.pointer("/metadata/uid") {
                        meta.insert("uid".into(), uid.clone());
                    }
                }
                obj
            }
        };
        let rv = server.next_version();
        stamp(&mut next, &rv, false);
        server.objects.insert(key.clone(), next.clone());
        server.record(verb, &key);
        self.maybe_publish(&server);
        debug!(kind = %key.kind, ns = %key.namespace, name = %key.name, rv = %rv, verb = ?verb, "updated");
        Ok(next)
    }

    fn get_raw(&self, key: &StoreKey) -> SourceResult<Option<Json>> {
        self.lock().take_failure(Verb::Get, &key.kind)?;
        Ok(self.cache.load().objects.get(key).cloned())
    }
}

fn set_field(obj: &mut Json, field: &str, value: Option<Json>) {
    if let Some(map) = obj.as_object_mut() {
        match value {
            Some(v) => { map.insert(field.to_string(), v); }
            None => { map.remove(field); }
        }
    }
}

fn stamp(obj: &mut Json, rv: &str, fresh: bool) {
    let Some(map) = obj.as_object_mut() else { return };
    let meta = map.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("resourceVersion".into(), Json::from(rv));
        if fresh {
            meta.entry("uid").or_insert_with(|| Json::from(uuid::Uuid::new_v4().to_string()));
            meta.entry("generation").or_insert_with(|| Json::from(1));
        }
    }
}

fn to_json<K: Resource<DynamicType = ()> + Serialize>(obj: &K) -> SourceResult<Json> {
    let mut v = serde_json::to_value(obj).map_err(|e| SourceError::Store(e.to_string()))?;
    if let Some(map) = v.as_object_mut() {
        map.insert("apiVersion".into(), Json::from(K::api_version(&()).into_owned()));
        map.insert("kind".into(), Json::from(K::kind(&()).into_owned()));
    }
    Ok(v)
}

fn from_json<K: DeserializeOwned>(v: Json) -> SourceResult<K> {
    serde_json::from_value(v).map_err(|e| SourceError::Store(e.to_string()))
}

#[async_trait]
impl<K> ResourceStore<K> for MemoryStore
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> SourceResult<Option<K>> {
        match self.get_raw(&StoreKey::typed::<K>(namespace, name))? {
            Some(raw) => from_json(raw).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, obj: &K) -> SourceResult<K> {
        from_json(self.create_raw(to_json(obj)?)?)
    }

    async fn update(&self, obj: &K) -> SourceResult<K> {
        from_json(self.update_raw(to_json(obj)?, Verb::Update)?)
    }

    async fn update_status(&self, obj: &K) -> SourceResult<K> {
        from_json(self.update_raw(to_json(obj)?, Verb::UpdateStatus)?)
    }
}

#[async_trait]
impl AddressLookup for MemoryStore {
    async fn resolve(&self, reference: &KReference) -> SourceResult<String> {
        let key = StoreKey {
            api_version: reference.api_version.clone(),
            kind: reference.kind.clone(),
            namespace: reference.namespace().to_string(),
            name: reference.name.clone(),
        };
        match self.get_raw(&key)? {
            Some(obj) => address_from_object(reference, &obj),
            None => Err(SourceError::NotFound(format!("{} {}/{} not found", key.kind, key.namespace, key.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thing(name: &str) -> Json {
        json!({"apiVersion": "example.dev/v1", "kind": "Thing", "metadata": {"name": name, "namespace": "ns"}, "spec": {"a": 1}})
    }

    #[test]
    fn create_stamps_metadata_and_logs() {
        let s = MemoryStore::new();
        let out = s.create_raw(thing("a")).unwrap();
        assert_eq!(out.pointer("/metadata/resourceVersion"), Some(&json!("1")));
        assert_eq!(out.pointer("/metadata/generation"), Some(&json!(1)));
        assert!(out.pointer("/metadata/uid").is_some());
        assert_eq!(s.write_count(), 1);
        assert!(matches!(s.create_raw(thing("a")), Err(SourceError::Conflict(_))));
    }

    #[test]
    fn stale_resource_version_conflicts() {
        let s = MemoryStore::new();
        let created = s.create_raw(thing("a")).unwrap();
        let mut first = created.clone();
        first["status"] = json!({"x": 1});
        s.update_raw(first, Verb::UpdateStatus).unwrap();
        let mut stale = created;
        stale["status"] = json!({"x": 2});
        assert!(matches!(s.update_raw(stale, Verb::UpdateStatus), Err(SourceError::Conflict(_))));
    }

    #[test]
    fn update_keeps_status_and_bumps_generation_on_spec_change() {
        let s = MemoryStore::new();
        let mut obj = s.create_raw(thing("a")).unwrap();
        obj["status"] = json!({"x": 1});
        let obj = s.update_raw(obj, Verb::UpdateStatus).unwrap();
        let mut changed = obj.clone();
        changed["spec"] = json!({"a": 2});
        changed["status"] = json!({"x": 9});
        let out = s.update_raw(changed, Verb::Update).unwrap();
        assert_eq!(out["status"], json!({"x": 1}));
        assert_eq!(out.pointer("/metadata/generation"), Some(&json!(2)));
    }

    #[test]
    fn lagging_cache_catches_up_on_sync() {
        let s = MemoryStore::lagging();
        s.create_raw(thing("a")).unwrap();
        let key = StoreKey::of(&thing("a")).unwrap();
        assert!(s.get_raw(&key).unwrap().is_none());
        s.sync();
        assert!(s.get_raw(&key).unwrap().is_some());
        assert_eq!(s.cache_epoch(), 1);
    }

    #[test]
    fn injected_failure_fires_once() {
        let s = MemoryStore::new();
        s.fail_next(Verb::Create, "Thing", SourceError::Store("quota".into()));
        assert!(matches!(s.create_raw(thing("a")), Err(SourceError::Store(_))));
        assert!(s.create_raw(thing("a")).is_ok());
    }
}
