#![forbid(unsafe_code)]

//! Time travel and branch switching.
//!
//! Every move is a loop of single undo/redo steps, so each traversed entry
//! runs its state update exactly once and the emitted actions come out in
//! replay order.
//!
//! # Switching branches
//!
//! ```text
//! before (trunk b3, switching to b1):
//!   b3: [11, 13]
//!   b2: [2, 5, 7]  @ b3:-1
//!   b1: [3]        @ b2:0
//!
//! 1. path b1 -> b2@0 -> b3@-1, common ancestor = -1
//! 2. undo b3 down to -1
//! 3. re-root: b1 takes its full timeline, path branches keep what lies
//!    beyond the point the path leaves them
//!   b1: [2, 3]
//!   b2: [5, 7]     @ b1:0
//!   b3: [11, 13]   @ b1:-1
//! 4. redo along b1 to the landing index chosen by the policy
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, HistoryResult};
use crate::ids::BranchId;
use crate::log::Replay;
use crate::model::{LogEntry, ParentLink, Position};

/// Where to land when switching to another branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSwitchPolicy {
    /// The last position both branches share.
    LastCommonAction,
    /// The last shared position, but only if the current index is past it;
    /// otherwise keep the current index.
    LastCommonActionIfPast,
    /// Where the target branch was last left, or its head if it never was.
    LastKnownPositionOnBranch,
    /// The last entry of the target branch.
    #[default]
    HeadOfBranch,
}

impl<'a, S, P: Clone + PartialEq> Replay<'a, S, P> {
    // ========================================================================
    // Entry points
    // ========================================================================

    /// Move to `index`, on the current branch or on `branch`.
    ///
    /// The index is a global index on the target branch's timeline and must
    /// lie in `[-1, len - 1]`.
    pub(crate) fn time_travel(
        &mut self,
        index: isize,
        branch: Option<&BranchId>,
    ) -> HistoryResult<()> {
        let target = match branch {
            Some(id) if id != self.history.current_branch_id() => id.clone(),
            _ => {
                let len = self.history.current_branch().len();
                check_index(index, len)?;
                return self.move_to(index);
            }
        };
        let len = self.history.timeline_len(&target)?;
        check_index(index, len)?;
        self.travel_to_branch(&target, index)
    }

    /// Make `target` the current branch and land where `policy` says.
    pub(crate) fn switch_to_branch(
        &mut self,
        target: &BranchId,
        policy: BranchSwitchPolicy,
    ) -> HistoryResult<()> {
        if target == self.history.current_branch_id() {
            return Err(HistoryError::SameBranch(target.clone()));
        }
        let path = self.history.path_to_trunk(target)?;
        let ca_index = common_ancestor(&path)?;
        let current = self.history.current_index();

        let landing = match policy {
            BranchSwitchPolicy::LastCommonAction => ca_index,
            BranchSwitchPolicy::LastCommonActionIfPast => current.min(ca_index),
            BranchSwitchPolicy::LastKnownPositionOnBranch => self.last_known_index(target)?,
            BranchSwitchPolicy::HeadOfBranch => self.history.timeline_len(target)? as isize - 1,
        };
        tracing::debug!(
            target: "branchlog.travel",
            from = %self.history.current_branch_id(),
            to = %target,
            ?policy,
            ca_index,
            landing,
            "switching branch"
        );
        self.travel_to_branch(target, landing)
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Step along the trunk until the current index is `index`.
    pub(crate) fn move_to(&mut self, index: isize) -> HistoryResult<()> {
        while self.history.current_index() > index {
            if !self.undo_step()? {
                return Err(HistoryError::corrupted(format!(
                    "cannot undo towards index {index}"
                )));
            }
        }
        while self.history.current_index() < index {
            if !self.redo_step()? {
                return Err(HistoryError::corrupted(format!(
                    "cannot redo towards index {index}"
                )));
            }
        }
        Ok(())
    }

    fn travel_to_branch(&mut self, target: &BranchId, landing: isize) -> HistoryResult<()> {
        let path = self.history.path_to_trunk(target)?;
        let ca_index = common_ancestor(&path)?;
        let left_at = self.history.current_position().clone();
        self.move_to(ca_index.min(left_at.global_index))?;
        self.reroot(target, left_at)?;
        self.move_to(landing)
    }

    /// Index recorded by the last visit to `target`, checked against its
    /// timeline; the head when the branch was never left.
    fn last_known_index(&self, target: &BranchId) -> HistoryResult<isize> {
        let timeline = self.history.timeline(target)?;
        let Some(position) = self
            .history
            .branch(target)
            .and_then(|b| b.last_position())
        else {
            return Ok(timeline.len() as isize - 1);
        };
        let index = position.global_index;
        let found = if index < 0 {
            Some(crate::ids::ActionId::start())
        } else {
            timeline.get(index as usize).map(|e| e.id.clone())
        };
        match found {
            Some(id) if id == position.action_id => Ok(index),
            _ => Err(HistoryError::corrupted(format!(
                "last position {} ({}) of branch {target} no longer on its timeline",
                index, position.action_id
            ))),
        }
    }

    /// Make `target` the trunk.
    ///
    /// The current index must not lie beyond the point where `target`'s path
    /// joins the trunk. `left_at` becomes the old trunk's last position.
    pub(crate) fn reroot(&mut self, target: &BranchId, left_at: Position) -> HistoryResult<()> {
        let path = self.history.path_to_trunk(target)?;
        if path.is_empty() {
            return Ok(());
        }
        let timeline: Vec<LogEntry<P>> = self
            .history
            .timeline(target)?
            .into_iter()
            .cloned()
            .collect();
        let old = self.history.current_branch_id().clone();
        self.history.trunk_mut()?.last_position = Some(left_at);
        let children = self.history.children_map();

        let mut below = target.clone();
        let mut emptied: Vec<BranchId> = Vec::new();
        for link in &path {
            let id = &link.branch_id;
            for kid in children.get(id).into_iter().flatten() {
                if kid == &below {
                    continue;
                }
                if let Some(up) = self.history.branch_mut(kid)?.parent.as_mut()
                    && up.position <= link.position
                {
                    up.branch_id = target.clone();
                }
            }

            let branch = self.history.branch_mut(id)?;
            let shared = (link.position - branch.fork_index()).max(0) as usize;
            branch.stack.drain(..shared.min(branch.stack.len()));
            branch.parent = Some(ParentLink::new(target.clone(), link.position));
            if branch.stack.is_empty() {
                emptied.push(id.clone());
            }
            below = id.clone();
        }
        for id in &emptied {
            self.history.branches.remove(id);
        }

        let trunk = self.history.branch_mut(target)?;
        trunk.stack = timeline;
        trunk.parent = None;
        self.history.current_branch_id = target.clone();
        let index = self.history.current_index();
        self.history.set_index(index);

        tracing::debug!(
            target: "branchlog.travel",
            trunk = %target,
            previous = %old,
            path_len = path.len(),
            removed_branches = emptied.len(),
            "re-rooted branch tree"
        );
        Ok(())
    }
}

/// Fork position of the path link attached to the trunk.
fn common_ancestor(path: &[ParentLink]) -> HistoryResult<isize> {
    path.last()
        .map(|link| link.position)
        .ok_or_else(|| HistoryError::corrupted("branch path does not reach the trunk"))
}

fn check_index(index: isize, len: usize) -> HistoryResult<()> {
    if index < -1 || index >= len as isize {
        return Err(HistoryError::IndexOutOfRange { index, len });
    }
    Ok(())
}
