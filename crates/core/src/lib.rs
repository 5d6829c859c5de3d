//! Core types for event source controllers: condition sets, destinations,
//! validation and error types, and the collaborator traits.

#![forbid(unsafe_code)]

pub mod collab;
pub mod conditions;
pub mod destination;
pub mod error;
pub mod key;
pub mod validation;

pub use collab::{address_from_object, AddressLookup, EventRecord, EventRecorder, EventType, ResourceStore};
pub use conditions::{Condition, ConditionSet, ConditionStatus, ConditionTracker, READY, SINK_PROVIDED, SUCCEEDED};
pub use destination::{Destination, KReference, OutputFormat};
pub use error::{SourceError, SourceResult};
pub use key::ObjectKey;
pub use validation::{FieldError, IssueKind};

pub mod prelude {
    pub use super::{
        AddressLookup, Condition, ConditionSet, ConditionStatus, Destination, EventRecord, EventRecorder, EventType,
        FieldError, KReference, ObjectKey, OutputFormat, ResourceStore, SourceError, SourceResult,
    };
}
