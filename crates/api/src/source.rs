//! Fields and behavior shared by every source kind.

use std::fmt::Debug;

use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sources_core::conditions::{self, Condition, ConditionSet, SINK_PROVIDED};
use sources_core::{Destination, FieldError, OutputFormat};

/// `sink` and `outputFormat`, inlined into each kind's spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseSourceSpec {
    #[serde(default)]
    pub sink: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
}

impl BaseSourceSpec {
    pub fn set_defaults(&mut self) {
        self.output_format.get_or_insert(OutputFormat::Binary);
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        let mut errs = FieldError::default();
        if self.output_format.is_none() {
            errs = errs.also(FieldError::missing(&["outputFormat"]));
        }
        if let Err(e) = self.sink.validate() {
            errs = errs.also(e.via_field("sink"));
        }
        errs.into_result()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format.unwrap_or_default()
    }
}

/// `conditions`, `observedGeneration` and `sinkUri`, inlined into each kind's status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseSourceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<String>,
}

impl BaseSourceStatus {
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        conditions::find(&self.conditions, type_)
    }

    pub fn mark_sink(&mut self, set: &ConditionSet, uri: &str) {
        if uri.is_empty() {
            self.sink_uri = None;
            set.manage(&mut self.conditions).mark_unknown(SINK_PROVIDED, "SinkEmpty", "Sink has resolved to empty.");
        } else {
            self.sink_uri = Some(uri.to_string());
            set.manage(&mut self.conditions).mark_true(SINK_PROVIDED);
        }
    }
}

/// Behavior the reconcilers need from a status type. Each implementor names
/// its condition set; the sink-related marks are shared.
pub trait SourceStatus: Clone + Default + PartialEq + Debug + Serialize + Send + Sync + 'static {
    const CONDITIONS: ConditionSet;

    fn base(&self) -> &BaseSourceStatus;
    fn base_mut(&mut self) -> &mut BaseSourceStatus;

    fn initialize_conditions(&mut self) {
        Self::CONDITIONS.manage(&mut self.base_mut().conditions).initialize_conditions();
    }

    /// Whether the captured sink must be kept as is.
    fn sink_locked(&self) -> bool {
        false
    }

    fn mark_sink(&mut self, uri: &str) {
        if self.sink_locked() {
            tracing::debug!(uri, "sink is locked; ignoring new sink");
            return;
        }
        self.base_mut().mark_sink(&Self::CONDITIONS, uri);
    }

    fn mark_no_sink(&mut self, reason: &str, message: &str) {
        Self::CONDITIONS.manage(&mut self.base_mut().conditions).mark_false(SINK_PROVIDED, reason, message);
    }

    fn mark_sink_unknown(&mut self, reason: &str, message: &str) {
        Self::CONDITIONS.manage(&mut self.base_mut().conditions).mark_unknown(SINK_PROVIDED, reason, message);
    }

    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.base().get_condition(type_)
    }

    /// The aggregate condition, if initialized.
    fn happy_condition(&self) -> Option<&Condition> {
        self.get_condition(Self::CONDITIONS.happy())
    }

    fn is_ready(&self) -> bool {
        Self::CONDITIONS.is_happy(&self.base().conditions)
    }

    fn sink_uri(&self) -> Option<&str> {
        self.base().sink_uri.as_deref()
    }
}

/// A desired resource: a namespaced custom resource with a sink, an output
/// format and a status built on [`BaseSourceStatus`].
pub trait Source:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Status: SourceStatus;

    fn base_spec(&self) -> &BaseSourceSpec;
    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Self::Status;

    /// Fill in defaults. Applied once, before the object is first reconciled.
    fn set_defaults(&mut self);

    fn validate(&self) -> Result<(), FieldError> {
        self.base_spec().validate()
    }
}

/// Implements [`Source`] for a kube-derived root type whose spec flattens
/// `source: BaseSourceSpec` and whose status flattens `source: BaseSourceStatus`.
macro_rules! impl_source {
    ($kind:ty, $status:ty, $defaults:path) => {
        impl $crate::source::Source for $kind {
            type Status = $status;

            fn base_spec(&self) -> &$crate::source::BaseSourceSpec {
                &self.spec.source
            }

            fn status(&self) -> Option<&$status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut $status {
                self.status.get_or_insert_with(Default::default)
            }

            fn set_defaults(&mut self) {
                self.spec.source.set_defaults();
                $defaults(&mut self.spec);
            }
        }
    };
}
pub(crate) use impl_source;

#[cfg(test)]
mod tests {
    use super::*;
    use sources_core::KReference;

    #[test]
    fn base_defaults_and_validation() {
        let mut spec = BaseSourceSpec { sink: Destination::from_uri("http://sink"), output_format: None };
        assert_eq!(spec.validate().unwrap_err().to_string(), "missing field(s): outputFormat");
        spec.set_defaults();
        assert_eq!(spec.output_format, Some(OutputFormat::Binary));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn validation_aggregates_all_problems() {
        let spec = BaseSourceSpec {
            sink: Destination::from_ref(KReference { kind: "Service".into(), ..Default::default() }),
            output_format: None,
        };
        assert_eq!(
            spec.validate().unwrap_err().to_string(),
            "missing field(s): outputFormat\nmissing field(s): sink.ref.apiVersion, sink.ref.name"
        );
    }

    #[test]
    fn status_json_shape() {
        let s = BaseSourceStatus { observed_generation: Some(2), sink_uri: Some("http://x".into()), ..Default::default() };
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            serde_json::json!({"observedGeneration": 2, "sinkUri": "http://x"})
        );
    }
}
