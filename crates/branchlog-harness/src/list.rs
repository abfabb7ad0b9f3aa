#![forbid(unsafe_code)]

//! List fixture for the custom strategy: `push` is undone by `pop` of the
//! same item and vice versa.

use branchlog::{Action, ActionTable, Engine, HistoryOptions, HistoryStore};

pub const PUSH: &str = "push";
pub const POP: &str = "pop";

pub type ListState = Vec<String>;

/// Action table for [`ListState`].
#[must_use]
pub fn list_table() -> ActionTable<ListState, String> {
    ActionTable::new()
        .custom(
            PUSH,
            |item: &String, s: &ListState| {
                let mut next = s.clone();
                next.push(item.clone());
                next
            },
            |action| Action::new(POP, action.payload.clone()),
        )
        .custom(
            POP,
            |item: &String, s: &ListState| {
                let mut next = s.clone();
                if let Some(at) = next.iter().rposition(|x| x == item) {
                    next.remove(at);
                }
                next
            },
            |action| Action::new(PUSH, action.payload.clone()),
        )
}

#[must_use]
pub fn list_store(options: HistoryOptions) -> HistoryStore<ListState, String> {
    HistoryStore::new(Engine::new(list_table(), options), ListState::new())
}
