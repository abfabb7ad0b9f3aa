#![forbid(unsafe_code)]

//! Identifiers and the injected id/timestamp capability.
//!
//! The engine never generates identifiers or reads a clock on its own. Every
//! new entry and branch draws its id and `created` stamp from an
//! [`IdSource`] owned by the engine, so tests can run with fixed ids and peers
//! can guarantee collision-free ids across logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use web_time::{SystemTime, UNIX_EPOCH};

const START: &str = "start";

/// Identifier of a recorded log entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Create an action id from a raw value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel id of the position before the first entry.
    #[must_use]
    pub fn start() -> Self {
        Self(START.to_string())
    }

    /// Whether this is the `start` sentinel.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.0 == START
    }

    /// Raw id value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    /// Create a branch id from a raw value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of identifiers and logical timestamps.
///
/// Implementations must never hand out the same id twice, including across
/// peers that exchange batches.
pub trait IdSource {
    /// Id for a new log entry.
    fn next_action_id(&mut self) -> ActionId;

    /// Id for a new branch.
    fn next_branch_id(&mut self) -> BranchId;

    /// Creation stamp for a new entry or branch.
    fn now(&mut self) -> u64;
}

/// Deterministic counter-based ids: `a1, a2, ..` and `b1, b2, ..`.
///
/// Timestamps are a logical clock that ticks once per call to
/// [`IdSource::now`].
#[derive(Debug, Clone, Default)]
pub struct SequentialIds {
    prefix: String,
    actions: u64,
    branches: u64,
    clock: u64,
}

impl SequentialIds {
    /// Counters without a prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters whose ids start with `prefix`, e.g. `peer1-a3`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    fn tag(&self, kind: char, n: u64) -> String {
        if self.prefix.is_empty() {
            format!("{kind}{n}")
        } else {
            format!("{}-{kind}{n}", self.prefix)
        }
    }
}

impl IdSource for SequentialIds {
    fn next_action_id(&mut self) -> ActionId {
        self.actions += 1;
        ActionId(self.tag('a', self.actions))
    }

    fn next_branch_id(&mut self) -> BranchId {
        self.branches += 1;
        BranchId(self.tag('b', self.branches))
    }

    fn now(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Peer-scoped counter ids stamped with wall-clock milliseconds.
#[derive(Debug, Clone)]
pub struct WallClockIds {
    ids: SequentialIds,
}

impl WallClockIds {
    /// Ids prefixed with the given peer name.
    #[must_use]
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            ids: SequentialIds::with_prefix(peer),
        }
    }
}

impl IdSource for WallClockIds {
    fn next_action_id(&mut self) -> ActionId {
        self.ids.next_action_id()
    }

    fn next_branch_id(&mut self) -> BranchId {
        self.ids.next_branch_id()
    }

    fn now(&mut self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}
