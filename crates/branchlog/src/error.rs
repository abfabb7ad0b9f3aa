#![forbid(unsafe_code)]

//! Error taxonomy for history operations.
//!
//! Only operations that a caller can get wrong are reported here. Undo and
//! redo at the bounds of the log, and dispatching an action type that has no
//! configuration, are expected steady-state conditions and return the input
//! unchanged instead of failing.

use std::fmt;

use crate::ids::{ActionId, BranchId};

/// Result alias for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors reported by the history engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A time-travel target lies outside `[-1, len - 1]`.
    IndexOutOfRange { index: isize, len: usize },
    /// Switching to the branch that is already current.
    SameBranch(BranchId),
    /// The requested branch does not exist in this history.
    UnknownBranch(BranchId),
    /// A recorded or received entry names an unconfigured action type.
    UnknownActionType(String),
    /// A received batch does not extend the current position.
    ParentMismatch { expected: ActionId, found: ActionId },
    /// The history violates its own structural invariants.
    ///
    /// This indicates a bug in the engine (or a hand-edited history) and is
    /// not recoverable.
    Corrupted(String),
}

impl HistoryError {
    /// Whether the error signals structural corruption rather than misuse.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupted(_))
    }

    pub(crate) fn corrupted(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(target: "branchlog.engine", detail = %detail, "history corrupted");
        Self::Corrupted(detail)
    }
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for branch of length {len}")
            }
            Self::SameBranch(id) => write!(f, "branch {id} is already current"),
            Self::UnknownBranch(id) => write!(f, "branch {id} not found"),
            Self::UnknownActionType(kind) => write!(f, "no configuration for action type '{kind}'"),
            Self::ParentMismatch { expected, found } => write!(
                f,
                "batch parent '{expected}' does not match current action '{found}'"
            ),
            Self::Corrupted(detail) => write!(f, "history corrupted: {detail}"),
        }
    }
}

impl std::error::Error for HistoryError {}
