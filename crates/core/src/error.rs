use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    DuplicatePriorityRank,
    UndefinedSignalField,
    ComparisonKindMismatch,
}

impl InvariantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InvariantKind::DuplicatePriorityRank => "duplicate_priority_rank",
            InvariantKind::UndefinedSignalField => "undefined_signal_field",
            InvariantKind::ComparisonKindMismatch => "comparison_kind_mismatch",
        }
    }
}

/// Should never happen with a well-formed catalog. Fatal in strict runs; lenient runs degrade the
/// affected user to `unclassified` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub kind: InvariantKind,
    pub detail: String,
}

impl InvariantViolation {
    pub fn new(kind: InvariantKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violation ({}): {}", self.kind.as_str(), self.detail)
    }
}

impl std::error::Error for InvariantViolation {}

#[derive(Debug, Clone)]
pub struct CatalogError {
    pub stage: &'static str,
    pub detail: String,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog error (stage={}): {}", self.stage, self.detail)
    }
}

impl std::error::Error for CatalogError {}
