#![forbid(unsafe_code)]

//! Entry batches exchanged between independently owned histories.
//!
//! A batch carries recorded entries together with the id of the entry they
//! follow. A receiver only accepts a batch whose parent is its own current
//! action, so a transport layer must bring the receiver to that position
//! first (typically by undoing its unsent local entries and replaying them
//! after the batch). The engine never merges or reorders on its own.

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, HistoryResult};
use crate::ids::ActionId;
use crate::log::Replay;
use crate::model::{History, LogEntry};

/// Recorded entries that follow `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBatch<P> {
    /// Id of the entry the batch extends (`start` for an empty log).
    pub parent: ActionId,
    pub entries: Vec<LogEntry<P>>,
}

impl<P> HistoryBatch<P> {
    #[must_use]
    pub fn new(parent: ActionId, entries: Vec<LogEntry<P>>) -> Self {
        Self { parent, entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the last entry, or the parent for an empty batch.
    #[must_use]
    pub fn last_id(&self) -> &ActionId {
        self.entries.last().map_or(&self.parent, |e| &e.id)
    }
}

impl<P: Clone> History<P> {
    /// Trunk entries after `since` up to the current index.
    ///
    /// Returns `None` when `since` is not on the current branch at or before
    /// the current index.
    #[must_use]
    pub fn batch_since(&self, since: &ActionId) -> Option<HistoryBatch<P>> {
        let from = self.index_of(since)?;
        let to = self.current_index();
        if from > to {
            return None;
        }
        let stack = self.current_branch().stack();
        let entries = stack[(from + 1) as usize..(to + 1) as usize].to_vec();
        Some(HistoryBatch::new(since.clone(), entries))
    }
}

impl<'a, S, P: Clone + PartialEq> Replay<'a, S, P> {
    /// Apply and record the entries of `batch` with their original ids.
    pub(crate) fn receive(&mut self, batch: HistoryBatch<P>) -> HistoryResult<()> {
        let found = &self.history.current_position().action_id;
        if found != &batch.parent {
            return Err(HistoryError::ParentMismatch {
                expected: batch.parent,
                found: found.clone(),
            });
        }
        if let Some(entry) = batch.entries.iter().find(|e| !self.table.contains(&e.kind)) {
            return Err(HistoryError::UnknownActionType(entry.kind.clone()));
        }

        let total = batch.entries.len();
        let mut skipped = 0usize;
        for mut entry in batch.entries {
            if self.history.contains_action(&entry.id) {
                skipped += 1;
                continue;
            }
            let (state, action) = self.table.redo(&mut entry, &self.state)?;
            self.state = state;
            self.emitted.push(action);
            self.append(entry)?;
        }
        tracing::debug!(
            target: "branchlog.sync",
            parent = %batch.parent,
            applied = total - skipped,
            skipped,
            "received batch"
        );
        Ok(())
    }
}
