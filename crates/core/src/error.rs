//! Error taxonomy shared by every source controller crate.

use crate::validation::FieldError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{0}")]
    Validation(FieldError),
    #[error("{0}")]
    NotFound(String),
    #[error("address unresolvable: {0}")]
    AddressUnresolvable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    ChildMutation(String),
    #[error("store: {0}")]
    Store(String),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool { matches!(self, SourceError::NotFound(_)) }
    pub fn is_conflict(&self) -> bool { matches!(self, SourceError::Conflict(_)) }

    /// Stable short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SourceError::Validation(_) => "validation",
            SourceError::NotFound(_) => "not_found",
            SourceError::AddressUnresolvable(_) => "address_unresolvable",
            SourceError::Conflict(_) => "conflict",
            SourceError::ChildMutation(_) => "child_mutation",
            SourceError::Store(_) => "store",
        }
    }
}

impl From<FieldError> for SourceError {
    fn from(e: FieldError) -> Self { SourceError::Validation(e) }
}

pub type SourceResult<T> = Result<T, SourceError>;
