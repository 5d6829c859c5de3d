//! Sink destinations and the event output format.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::validation::FieldError;

/// Reference to an addressable object. Namespace defaults to the caller's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl KReference {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self { api_version: api_version.into(), kind: kind.into(), name: name.into(), namespace: None }
    }

    pub fn in_namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    pub fn namespace(&self) -> &str { self.namespace.as_deref().unwrap_or("") }

    pub fn validate(&self) -> Result<(), FieldError> {
        let mut missing = Vec::new();
        if self.api_version.is_empty() { missing.push("apiVersion"); }
        if self.kind.is_empty() { missing.push("kind"); }
        if self.name.is_empty() { missing.push("name"); }
        if missing.is_empty() { Ok(()) } else { Err(FieldError::missing(&missing)) }
    }
}

impl fmt::Display for KReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{} ({})", self.kind, self.namespace(), self.name, self.api_version)
    }
}

/// Where events are delivered: an object reference or a literal URI.
/// Exactly one must be set; the type allows both so validation can report it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<KReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Destination {
    pub fn from_uri(uri: &str) -> Self {
        Self { reference: None, uri: Some(uri.to_string()) }
    }

    pub fn from_ref(reference: KReference) -> Self {
        Self { reference: Some(reference), uri: None }
    }

    fn uri_set(&self) -> bool { self.uri.as_deref().map(|u| !u.is_empty()).unwrap_or(false) }

    /// Neither member is set.
    pub fn is_empty(&self) -> bool { self.reference.is_none() && !self.uri_set() }

    pub fn validate(&self) -> Result<(), FieldError> {
        match (&self.reference, self.uri.as_deref().filter(|u| !u.is_empty())) {
            (None, None) => Err(FieldError::neither_of(&["ref", "uri"])),
            (Some(_), Some(_)) => Err(FieldError::both_of(&["ref", "uri"])),
            (Some(r), None) => r.validate().map_err(|e| e.via_field("ref")),
            (None, Some(u)) => validate_uri(u),
        }
    }
}

fn validate_uri(uri: &str) -> Result<(), FieldError> {
    match url::Url::parse(uri) {
        Ok(u) if u.host_str().map(|h| !h.is_empty()).unwrap_or(false) => Ok(()),
        _ => Err(FieldError::invalid(uri, "uri")),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Structured,
    #[default]
    Binary,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Structured => "structured",
            OutputFormat::Binary => "binary",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(d: &Destination) -> String {
        d.validate().map_err(|e| e.via_field("sink")).unwrap_err().to_string()
    }

    #[test]
    fn exactly_one_member() {
        assert_eq!(msg(&Destination::default()), "expected exactly one, got neither: sink.ref, sink.uri");
        let both = Destination { reference: Some(KReference::new("v1", "Service", "s")), uri: Some("http://x".into()) };
        assert_eq!(msg(&both), "expected exactly one, got both: sink.ref, sink.uri");
        assert!(Destination::from_uri("http://x").validate().is_ok());
    }

    #[test]
    fn ref_reports_only_missing_fields() {
        let d = Destination::from_ref(KReference { name: "n".into(), ..Default::default() });
        assert_eq!(msg(&d), "missing field(s): sink.ref.apiVersion, sink.ref.kind");
    }

    #[test]
    fn uri_needs_scheme_and_host() {
        assert_eq!(msg(&Destination::from_uri("example.com/path")), "invalid value: example.com/path: sink.uri");
        assert!(Destination::from_uri("https://example.com/path").validate().is_ok());
    }

    #[test]
    fn destination_json_shape() {
        let d: Destination = serde_json::from_value(serde_json::json!({
            "ref": {"apiVersion": "v1", "kind": "Service", "name": "svc"}
        }))
        .unwrap();
        assert_eq!(d.reference.as_ref().unwrap().name, "svc");
        assert_eq!(serde_json::to_value(OutputFormat::default()).unwrap(), serde_json::json!("binary"));
    }
}
