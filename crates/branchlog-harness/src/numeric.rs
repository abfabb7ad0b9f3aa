#![forbid(unsafe_code)]

//! Single-integer fixture and the three-branch travel scenario.
//!
//! ```text
//! branch1: 2 3            (root)
//! branch2: 2 5 7          forked after branch1's first entry
//! branch3: 11 13          forked from the start, current at its head
//! ```

use branchlog::{ActionTable, BranchId, Engine, HistoryOptions, HistoryResult, HistoryStore};

pub const ADD: &str = "add";

/// `add` with a relative delta.
#[must_use]
pub fn numeric_table() -> ActionTable<i64, i64> {
    ActionTable::new().relative(ADD, |p: &i64, s: &i64| s + p, |p| -p)
}

#[must_use]
pub fn numeric_store(options: HistoryOptions) -> HistoryStore<i64, i64> {
    HistoryStore::new(Engine::new(numeric_table(), options), 0)
}

/// The three-branch scenario and the ids of its branches.
#[derive(Debug)]
pub struct ThreeBranches {
    pub store: HistoryStore<i64, i64>,
    pub branch1: BranchId,
    pub branch2: BranchId,
    pub branch3: BranchId,
}

/// Build the scenario with branching history enabled.
pub fn three_branches() -> HistoryResult<ThreeBranches> {
    three_branches_with(HistoryOptions::default().with_branching(true))
}

/// Build the scenario with custom options; branching must be enabled.
pub fn three_branches_with(options: HistoryOptions) -> HistoryResult<ThreeBranches> {
    let mut store = numeric_store(options);
    let branch1 = store.history().current_branch_id().clone();
    store.dispatch(ADD, 2)?;
    store.dispatch(ADD, 3)?;

    store.time_travel(0, None)?;
    store.dispatch(ADD, 5)?;
    let branch2 = store.history().current_branch_id().clone();
    store.dispatch(ADD, 7)?;

    store.time_travel(-1, None)?;
    store.dispatch(ADD, 11)?;
    let branch3 = store.history().current_branch_id().clone();
    store.dispatch(ADD, 13)?;

    tracing::debug!(
        branch1 = %branch1,
        branch2 = %branch2,
        branch3 = %branch3,
        "three-branch scenario ready"
    );
    Ok(ThreeBranches {
        store,
        branch1,
        branch2,
        branch3,
    })
}
