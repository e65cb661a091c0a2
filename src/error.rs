//! Error types shared by the registry, merge and graph layers.

use crate::graph::GraphError;
use std::collections::TryReserveError;
use thiserror::Error;

/// Result of a merge attempt that did not fail outright.
///
/// `Incompatible` is an ordinary negotiation outcome: both operands are left
/// exactly as they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The sets were merged and every reference now points at the survivor.
    Merged,
    /// The sets share no admissible value.
    Incompatible,
}

impl MergeOutcome {
    /// True for [`MergeOutcome::Merged`].
    pub fn is_merged(self) -> bool {
        self == MergeOutcome::Merged
    }
}

/// What an integrity check found wrong with a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    /// The list holds no value where at least one is required.
    Empty,
    /// A value appears more than once.
    Duplicate,
    /// A known layout and a bare channel count describe the same channel number.
    Ambiguous,
    /// A value the catalog does not know, or a non-positive sample rate.
    InvalidValue,
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityKind::Empty => write!(f, "empty list"),
            IntegrityKind::Duplicate => write!(f, "duplicated value"),
            IntegrityKind::Ambiguous => write!(f, "redundant layout and channel count"),
            IntegrityKind::InvalidValue => write!(f, "invalid value"),
        }
    }
}

/// Errors raised by format-set operations.
#[derive(Debug, Error)]
pub enum FormatsError {
    /// A value or reference collection could not grow.
    #[error("allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    /// The set handle is stale or was never issued by this registry.
    #[error("unknown format set")]
    UnknownSet,

    /// The slot handle was never issued by this registry.
    #[error("unknown reference slot {0}")]
    UnknownSlot(usize),

    /// The destination slot already references a set.
    #[error("reference slot {0} is already in use")]
    SlotInUse(usize),

    /// Merging requires both sets to be referenced by at least one slot.
    #[error("format set has no references")]
    Unreferenced,

    /// Explicit values cannot be added to a list that accepts everything.
    #[error("cannot add an explicit value to a wildcard list")]
    WildcardList,

    /// Adding the layout would make the list ambiguous.
    #[error("channel layout {0} conflicts with an entry of the same channel count")]
    AmbiguousLayout(String),

    /// A validator rejected the list.
    #[error("invalid {list} list: {kind}")]
    Integrity {
        /// Which kind of list was checked.
        list: String,
        /// The detected defect.
        kind: IntegrityKind,
    },

    /// A graph lookup or structural check failed.
    #[error("graph error: {0:?}")]
    Graph(GraphError),
}

impl From<GraphError> for FormatsError {
    fn from(err: GraphError) -> Self {
        FormatsError::Graph(err)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_message_names_context() {
        let err = FormatsError::Integrity {
            list: "sample rate".to_string(),
            kind: IntegrityKind::Duplicate,
        };
        assert_eq!(err.to_string(), "invalid sample rate list: duplicated value");
    }

    #[test]
    fn alloc_error_converts() {
        let mut v: Vec<u8> = Vec::new();
        let reserve = v.try_reserve(usize::MAX).unwrap_err();
        let err: FormatsError = reserve.into();
        assert!(matches!(err, FormatsError::Alloc(_)));
    }
}
