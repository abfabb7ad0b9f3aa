#![forbid(unsafe_code)]

//! Log mutation engine: append, single-step undo/redo, and eviction.
//!
//! All mutations run on a [`Replay`], a working copy of `(state, history)`
//! that also collects the concrete actions applied along the way. The facade
//! builds a replay from the caller's snapshot, runs one event through it, and
//! hands the result back; a rejected event simply drops the replay.
//!
//! # Eviction
//!
//! ```text
//! max_history_length = 3
//!
//! append(D)
//! trunk: [A, B, C, D]   -> drop 1 from the front -> [B, C, D]
//! every recorded global index shifts by -1
//! side branch forked at -1 loses its own first entry, forks at -1 again
//! side branch left empty is removed, its children relink to its parent
//! ```

use std::collections::VecDeque;

use crate::config::HistoryOptions;
use crate::error::{HistoryError, HistoryResult};
use crate::ids::{BranchId, IdSource};
use crate::model::{Branch, History, LogEntry, ParentLink, Position};
use crate::payload::{Action, ActionTable};

/// Working copy of `(state, history)` for one event.
pub(crate) struct Replay<'a, S, P> {
    pub(crate) table: &'a ActionTable<S, P>,
    pub(crate) options: &'a HistoryOptions,
    pub(crate) ids: &'a mut dyn IdSource,
    pub(crate) state: S,
    pub(crate) history: History<P>,
    pub(crate) emitted: Vec<Action<P>>,
}

impl<'a, S, P: Clone + PartialEq> Replay<'a, S, P> {
    pub(crate) fn new(
        table: &'a ActionTable<S, P>,
        options: &'a HistoryOptions,
        ids: &'a mut dyn IdSource,
        state: S,
        history: History<P>,
    ) -> Self {
        Self {
            table,
            options,
            ids,
            state,
            history,
            emitted: Vec::new(),
        }
    }

    // ========================================================================
    // Single steps
    // ========================================================================

    /// Undo the entry at the current index. Returns `false` when there is
    /// nothing to undo.
    pub(crate) fn undo_step(&mut self) -> HistoryResult<bool> {
        if !self.history.can_undo() {
            return Ok(false);
        }
        let index = self.history.current_index();
        let trunk = self.history.trunk_mut()?;
        let entry = &mut trunk.stack[index as usize];
        let (state, action) = self.table.undo(entry, &self.state)?;
        self.state = state;
        self.emitted.push(action);
        self.history.set_index(index - 1);
        Ok(true)
    }

    /// Redo the entry after the current index. Returns `false` when there is
    /// nothing to redo.
    pub(crate) fn redo_step(&mut self) -> HistoryResult<bool> {
        if !self.history.can_redo() {
            return Ok(false);
        }
        let index = self.history.current_index() + 1;
        let trunk = self.history.trunk_mut()?;
        let entry = &mut trunk.stack[index as usize];
        let (state, action) = self.table.redo(entry, &self.state)?;
        self.state = state;
        self.emitted.push(action);
        self.history.set_index(index);
        Ok(true)
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// Record `entry` after the current index.
    ///
    /// Entries beyond the current index are either moved to a new side
    /// branch (branching history) or discarded, then the trunk is trimmed to
    /// the configured maximum length.
    pub(crate) fn append(&mut self, entry: LogEntry<P>) -> HistoryResult<()> {
        if self.history.can_redo() {
            if self.options.use_branching_history {
                self.fork_at_current()?;
            } else {
                self.truncate_future()?;
            }
        }
        let trunk = self.history.trunk_mut()?;
        trunk.stack.push(entry);
        let tip = trunk.stack.len() as isize - 1;
        self.history.set_index(tip);
        self.enforce_max_length()
    }

    /// Start a new trunk at the current index; the old trunk keeps the
    /// entries beyond it.
    fn fork_at_current(&mut self) -> HistoryResult<()> {
        let origin = self.history.current_position().clone();
        let old = self.history.current_branch_id().clone();
        let id = self.ids.next_branch_id();
        let created = self.ids.now();
        let number = self.history.next_branch_number();

        let mut branch = Branch::new(id.clone(), number, created);
        let link = ParentLink::new(old.clone(), origin.global_index);
        branch.parent = Some(link.clone());
        branch.parent_original = Some(link);
        self.history.branches.insert(id.clone(), branch);

        tracing::debug!(
            target: "branchlog.log",
            branch = %id,
            from = %old,
            position = origin.global_index,
            "forking new branch"
        );
        self.reroot(&id, origin)
    }

    /// Drop entries beyond the current index and every branch forked from
    /// them.
    fn truncate_future(&mut self) -> HistoryResult<()> {
        let index = self.history.current_index();
        let trunk_id = self.history.current_branch_id().clone();
        let doomed: Vec<BranchId> = self
            .history
            .children_of(&trunk_id)
            .into_iter()
            .filter(|b| b.fork_index() > index)
            .map(|b| b.id().clone())
            .collect();
        for id in &doomed {
            self.remove_subtree(id);
        }
        let trunk = self.history.trunk_mut()?;
        let discarded = trunk.stack.len() - (index + 1) as usize;
        trunk.stack.truncate((index + 1) as usize);
        tracing::debug!(
            target: "branchlog.log",
            branch = %trunk_id,
            discarded,
            removed_branches = doomed.len(),
            "discarding future entries"
        );
        Ok(())
    }

    fn remove_subtree(&mut self, root: &BranchId) {
        let children = self.history.children_map();
        let mut pending = vec![root.clone()];
        while let Some(id) = pending.pop() {
            if let Some(kids) = children.get(&id) {
                pending.extend(kids.iter().cloned());
            }
            self.history.branches.remove(&id);
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Evict the oldest trunk entries beyond `max_history_length` and repair
    /// the branch tree.
    pub(crate) fn enforce_max_length(&mut self) -> HistoryResult<()> {
        let Some(max) = self.options.max_history_length else {
            return Ok(());
        };
        let len = self.history.current_branch().len();
        if len <= max.get() {
            return Ok(());
        }
        let dropped = len - max.get();
        let shift = dropped as isize;
        let trunk_id = self.history.current_branch_id().clone();
        let children = self.history.children_map();

        let trunk = self.history.trunk_mut()?;
        trunk.stack.drain(..dropped);
        shift_position(&mut trunk.last_position, shift);
        let index = (self.history.current_index() - shift).max(-1);
        self.history.set_index(index);

        // Parents before children, so every owner lookup sees final links.
        let mut queue: VecDeque<BranchId> = children
            .get(&trunk_id)
            .cloned()
            .unwrap_or_default()
            .into();
        let mut removed: Vec<BranchId> = Vec::new();
        while let Some(id) = queue.pop_front() {
            let link = self
                .history
                .branch(&id)
                .and_then(|b| b.parent.clone())
                .ok_or_else(|| HistoryError::corrupted(format!("branch {id} lost its parent")))?;
            let mut position = link.position - shift;
            let owner = self.owner_of(link.branch_id, position, &trunk_id, &removed)?;

            let branch = self.history.branch_mut(&id)?;
            if position < -1 {
                let evicted = ((-1 - position) as usize).min(branch.stack.len());
                branch.stack.drain(..evicted);
                position = -1;
            }
            branch.parent = Some(ParentLink::new(owner.clone(), position));
            shift_position(&mut branch.last_position, shift);
            let emptied = branch.stack.is_empty();

            if let Some(kids) = children.get(&id) {
                if emptied {
                    for kid in kids {
                        if let Some(link) = self.history.branch_mut(kid)?.parent.as_mut() {
                            link.branch_id = owner.clone();
                        }
                    }
                }
                queue.extend(kids.iter().cloned());
            }
            if emptied {
                removed.push(id);
            }
        }
        for id in &removed {
            self.history.branches.remove(id);
        }

        tracing::debug!(
            target: "branchlog.log",
            branch = %trunk_id,
            dropped,
            removed_branches = removed.len(),
            "evicted oldest entries"
        );
        Ok(())
    }

    /// Nearest branch, starting at `from` and walking towards the trunk, whose
    /// own range holds `position`.
    fn owner_of(
        &self,
        from: BranchId,
        position: isize,
        trunk: &BranchId,
        removed: &[BranchId],
    ) -> HistoryResult<BranchId> {
        let mut owner = from;
        for _ in 0..=self.history.branch_count() {
            if &owner == trunk {
                return Ok(owner);
            }
            let branch = self
                .history
                .branch(&owner)
                .ok_or_else(|| HistoryError::corrupted(format!("missing parent branch {owner}")))?;
            let Some(up) = &branch.parent else {
                return Err(HistoryError::corrupted(format!(
                    "branch {owner} is detached from the trunk"
                )));
            };
            if position > up.position && !removed.contains(&owner) {
                return Ok(owner);
            }
            owner = up.branch_id.clone();
        }
        Err(HistoryError::corrupted(format!(
            "parent chain above {owner} does not terminate"
        )))
    }

    /// Emitted actions and final `(state, history)`.
    pub(crate) fn into_parts(self) -> (S, History<P>, Vec<Action<P>>) {
        (self.state, self.history, self.emitted)
    }
}

fn shift_position(position: &mut Option<Position>, shift: isize) {
    if let Some(p) = position {
        if p.global_index - shift < 0 {
            *p = Position::start();
        } else {
            p.global_index -= shift;
        }
    }
}
