//! Field-level validation errors with upstream Knative wording.

use std::fmt;

use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    Missing,
    Invalid { value: String },
    NeitherOf,
    BothOf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub kind: IssueKind,
    pub paths: SmallVec<[String; 4]>,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths = self.paths.join(", ");
        match &self.kind {
            IssueKind::Missing => write!(f, "missing field(s): {}", paths),
            IssueKind::Invalid { value } => write!(f, "invalid value: {}: {}", value, paths),
            IssueKind::NeitherOf => write!(f, "expected exactly one, got neither: {}", paths),
            IssueKind::BothOf => write!(f, "expected exactly one, got both: {}", paths),
        }
    }
}

/// Aggregated validation failures. An empty value means "valid".
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
pub struct FieldError {
    issues: Vec<FieldIssue>,
}

impl FieldError {
    fn single(kind: IssueKind, paths: &[&str]) -> Self {
        Self { issues: vec![FieldIssue { kind, paths: paths.iter().map(|p| p.to_string()).collect() }] }
    }

    pub fn missing(paths: &[&str]) -> Self { Self::single(IssueKind::Missing, paths) }

    pub fn invalid(value: impl Into<String>, path: &str) -> Self {
        Self::single(IssueKind::Invalid { value: value.into() }, &[path])
    }

    pub fn neither_of(paths: &[&str]) -> Self { Self::single(IssueKind::NeitherOf, paths) }
    pub fn both_of(paths: &[&str]) -> Self { Self::single(IssueKind::BothOf, paths) }

    pub fn is_empty(&self) -> bool { self.issues.is_empty() }
    pub fn issues(&self) -> &[FieldIssue] { &self.issues }

    pub fn has(&self, kind: &IssueKind) -> bool {
        self.issues.iter().any(|i| &i.kind == kind)
    }

    /// Merge another error's issues into this one.
    pub fn also(mut self, other: FieldError) -> Self {
        self.issues.extend(other.issues);
        self
    }

    /// Prefix every path with `field.`.
    pub fn via_field(mut self, field: &str) -> Self {
        for issue in &mut self.issues {
            for p in issue.paths.iter_mut() {
                *p = format!("{}.{}", field, p);
            }
        }
        self
    }

    /// `Ok(())` when no issue was collected.
    pub fn into_result(self) -> Result<(), FieldError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}
