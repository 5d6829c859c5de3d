//! Cluster wiring: kube-backed store, addressable lookup through
//! discovery, Kubernetes events and the per-kind controller loop.

#![forbid(unsafe_code)]

mod controller;
mod events;
mod lookup;
mod store;

use anyhow::{Context, Result};
use kube::Client;
use sources_core::SourceError;

pub use controller::{run, ControllerConfig};
pub use events::KubeEventRecorder;
pub use lookup::DynamicAddressLookup;
pub use store::KubeStore;

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from the current context")
}

/// 404 and 409 keep their meaning; everything else is an opaque store failure.
pub fn map_kube_err(err: kube::Error) -> SourceError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => SourceError::NotFound(resp.message.clone()),
        kube::Error::Api(resp) if resp.code == 409 => SourceError::Conflict(resp.message.clone()),
        _ => SourceError::Store(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn status_codes_map_to_source_errors() {
        assert!(map_kube_err(api_err(404, "jobs \"x\" not found")).is_not_found());
        let conflict = map_kube_err(api_err(409, "the object has been modified"));
        assert!(conflict.is_conflict());
        assert_eq!(conflict.to_string(), "conflict: the object has been modified");
        assert!(matches!(map_kube_err(api_err(500, "boom")), SourceError::Store(_)));
    }
}
