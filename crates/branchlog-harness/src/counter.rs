#![forbid(unsafe_code)]

//! Counter fixture.
//!
//! `updateCount` and `setOther` are absolute (they carry whole values);
//! `addToCount` and `addToOther` are relative deltas.

use branchlog::{ActionTable, Engine, HistoryOptions, HistoryStore};
use serde::{Deserialize, Serialize};

pub const UPDATE_COUNT: &str = "updateCount";
pub const ADD_TO_COUNT: &str = "addToCount";
pub const SET_OTHER: &str = "setOther";
pub const ADD_TO_OTHER: &str = "addToOther";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterState {
    pub count: i64,
    pub other: i64,
}

impl CounterState {
    #[must_use]
    pub fn new(count: i64, other: i64) -> Self {
        Self { count, other }
    }
}

/// Action table for [`CounterState`].
#[must_use]
pub fn counter_table() -> ActionTable<CounterState, i64> {
    ActionTable::new()
        .absolute(
            UPDATE_COUNT,
            |p: &i64, s: &CounterState| CounterState { count: *p, ..*s },
            |s: &CounterState, _| s.count,
        )
        .relative(
            ADD_TO_COUNT,
            |p: &i64, s: &CounterState| CounterState {
                count: s.count + p,
                ..*s
            },
            |p| -p,
        )
        .absolute(
            SET_OTHER,
            |p: &i64, s: &CounterState| CounterState { other: *p, ..*s },
            |s: &CounterState, _| s.other,
        )
        .relative(
            ADD_TO_OTHER,
            |p: &i64, s: &CounterState| CounterState {
                other: s.other + p,
                ..*s
            },
            |p| -p,
        )
}

/// A store over a zeroed counter.
#[must_use]
pub fn counter_store(options: HistoryOptions) -> HistoryStore<CounterState, i64> {
    HistoryStore::new(
        Engine::new(counter_table(), options),
        CounterState::default(),
    )
}
