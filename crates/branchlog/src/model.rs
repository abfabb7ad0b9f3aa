#![forbid(unsafe_code)]

//! Branch tree and current-position model.
//!
//! A [`History`] is an arena of [`Branch`]es keyed by [`BranchId`]. Parent
//! links are `(branch id, global index)` pairs, never references, so the
//! engine can relink branches by rewriting ids.
//!
//! # Trunk representation
//!
//! The current branch is always the *trunk*: it has no parent and its stack
//! holds every entry from the initial state to its tip. Every other branch
//! stores only the entries after its fork point.
//!
//! ```text
//! trunk b3:  [11, 13]                 fork -
//! b2:        [2, 5, 7]  parent b3@-1  (timeline 2 5 7)
//! b1:        [3]        parent b2@0   (timeline 2 3)
//! ```
//!
//! A branch's *timeline* is its parent's timeline up to the fork position,
//! followed by its own stack. Global indices along a timeline only change
//! when old entries are evicted from the front.
//!
//! # Invariants
//!
//! 1. The current branch exists and has no parent.
//! 2. `-1 <= current index < len(trunk)`, and the current action id names the
//!    entry at that index (`start` at `-1`).
//! 3. Every other branch has a non-empty stack and a parent chain that reaches
//!    the trunk without cycles.
//! 4. A fork position lies in the parent's own range: `[-1, len)` on the
//!    trunk, `(fork, fork + len]` elsewhere.
//! 5. Entry ids are unique across all branches.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, HistoryResult};
use crate::ids::{ActionId, BranchId};
use crate::payload::Action;

/// Stored payload of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload<P> {
    /// Complete before/after values of the projection the action targets.
    Absolute { undo: P, redo: P },
    /// The payload as dispatched (relative and custom strategies).
    Relative(P),
}

impl<P> EntryPayload<P> {
    /// The payload that re-applies the entry.
    #[must_use]
    pub fn forward(&self) -> &P {
        match self {
            Self::Absolute { redo, .. } => redo,
            Self::Relative(payload) => payload,
        }
    }
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<P> {
    /// Action-type tag.
    pub kind: String,
    /// Stored payload; shape depends on the tag's strategy.
    pub payload: EntryPayload<P>,
    /// Unique id, never reused.
    pub id: ActionId,
    /// Logical creation stamp.
    pub created: u64,
    /// Opaque pass-through data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    /// Recorded from an undo-direction action; redo runs the undo update.
    #[serde(default, skip_serializing_if = "crate::payload::is_false")]
    pub is_undo: bool,
}

impl<P: Clone> LogEntry<P> {
    /// The action that re-applies the entry, without bookkeeping fields.
    #[must_use]
    pub fn action(&self) -> Action<P> {
        Action {
            kind: self.kind.clone(),
            payload: self.payload.forward().clone(),
            is_undo: self.is_undo,
        }
    }
}

/// Where a branch forked from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub branch_id: BranchId,
    /// Global index of the last shared entry (`-1` = initial state).
    pub position: isize,
}

impl ParentLink {
    #[must_use]
    pub fn new(branch_id: BranchId, position: isize) -> Self {
        Self {
            branch_id,
            position,
        }
    }
}

/// A place on a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub global_index: isize,
    pub action_id: ActionId,
}

impl Position {
    #[must_use]
    pub fn new(global_index: isize, action_id: ActionId) -> Self {
        Self {
            global_index,
            action_id,
        }
    }

    /// Before the first entry.
    #[must_use]
    pub fn start() -> Self {
        Self::new(-1, ActionId::start())
    }
}

/// One timeline segment of the branch tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch<P> {
    pub(crate) id: BranchId,
    pub(crate) number: u64,
    pub(crate) created: u64,
    pub(crate) stack: Vec<LogEntry<P>>,
    #[serde(default)]
    pub(crate) parent: Option<ParentLink>,
    #[serde(default)]
    pub(crate) parent_original: Option<ParentLink>,
    #[serde(default)]
    pub(crate) last_position: Option<Position>,
}

impl<P> Branch<P> {
    pub(crate) fn new(id: BranchId, number: u64, created: u64) -> Self {
        Self {
            id,
            number,
            created,
            stack: Vec::new(),
            parent: None,
            parent_original: None,
            last_position: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &BranchId {
        &self.id
    }

    /// Creation order, starting at 0 for the root.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Entries owned by this branch.
    #[must_use]
    pub fn stack(&self) -> &[LogEntry<P>] {
        &self.stack
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current fork point; `None` for the trunk.
    #[must_use]
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Fork point recorded when the branch was created.
    #[must_use]
    pub fn parent_original(&self) -> Option<&ParentLink> {
        self.parent_original.as_ref()
    }

    /// Where the current pointer was when this branch was last left.
    #[must_use]
    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    /// Global index of the fork entry (`-1` for the trunk).
    #[must_use]
    pub fn fork_index(&self) -> isize {
        self.parent.as_ref().map_or(-1, |p| p.position)
    }

    /// Whether `position` lies in the range this branch owns.
    pub(crate) fn owns(&self, position: isize) -> bool {
        let fork = self.fork_index();
        match self.parent {
            None => position >= -1 && position < self.stack.len() as isize,
            Some(_) => position > fork && position <= fork + self.stack.len() as isize,
        }
    }
}

impl<P: Clone> Branch<P> {
    /// Entries of this branch as `{kind, payload}` actions.
    #[must_use]
    pub fn actions(&self) -> Vec<Action<P>> {
        self.stack.iter().map(LogEntry::action).collect()
    }
}

/// The whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<P> {
    pub(crate) branches: BTreeMap<BranchId, Branch<P>>,
    pub(crate) current_branch_id: BranchId,
    pub(crate) current_position: Position,
    pub(crate) branch_counter: u64,
}

impl<P> History<P> {
    /// An empty history with a single root branch.
    pub(crate) fn new(root: BranchId, created: u64) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(root.clone(), Branch::new(root.clone(), 0, created));
        Self {
            branches,
            current_branch_id: root,
            current_position: Position::start(),
            branch_counter: 0,
        }
    }

    // ========================================================================
    // Projections
    // ========================================================================

    /// The active branch.
    ///
    /// # Panics
    ///
    /// Panics if the current branch is missing, which only a corrupted
    /// (e.g. hand-deserialized) history can produce; see [`History::validate`].
    #[must_use]
    pub fn current_branch(&self) -> &Branch<P> {
        &self.branches[&self.current_branch_id]
    }

    #[must_use]
    pub fn current_branch_id(&self) -> &BranchId {
        &self.current_branch_id
    }

    #[must_use]
    pub fn current_position(&self) -> &Position {
        &self.current_position
    }

    #[must_use]
    pub fn current_index(&self) -> isize {
        self.current_position.global_index
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.current_index() >= 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.current_index() < self.current_branch().len() as isize - 1
    }

    #[must_use]
    pub fn branch(&self, id: &BranchId) -> Option<&Branch<P>> {
        self.branches.get(id)
    }

    /// All branches in creation order.
    #[must_use]
    pub fn branches(&self) -> Vec<&Branch<P>> {
        let mut all: Vec<_> = self.branches.values().collect();
        all.sort_by_key(|b| b.number);
        all
    }

    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Branches whose current parent is `id`.
    #[must_use]
    pub fn children_of(&self, id: &BranchId) -> Vec<&Branch<P>> {
        self.branches
            .values()
            .filter(|b| b.parent.as_ref().is_some_and(|p| &p.branch_id == id))
            .collect()
    }

    /// Entry at `index` on the trunk.
    #[must_use]
    pub fn entry_at(&self, index: isize) -> Option<&LogEntry<P>> {
        if index < 0 {
            return None;
        }
        self.current_branch().stack.get(index as usize)
    }

    /// Global index of the trunk entry with this id; `-1` for `start`.
    #[must_use]
    pub fn index_of(&self, id: &ActionId) -> Option<isize> {
        if id.is_start() {
            return Some(-1);
        }
        self.current_branch()
            .stack
            .iter()
            .position(|e| &e.id == id)
            .map(|i| i as isize)
    }

    /// Whether any branch holds an entry with this id.
    #[must_use]
    pub fn contains_action(&self, id: &ActionId) -> bool {
        self.branches
            .values()
            .any(|b| b.stack.iter().any(|e| &e.id == id))
    }

    /// Parent links from `id` up to the trunk, nearest first.
    pub fn path_to_trunk(&self, id: &BranchId) -> HistoryResult<Vec<ParentLink>> {
        let mut links = Vec::new();
        let mut cursor = self
            .branches
            .get(id)
            .ok_or_else(|| HistoryError::UnknownBranch(id.clone()))?;
        while let Some(link) = &cursor.parent {
            if links.len() >= self.branches.len() {
                return Err(HistoryError::corrupted(format!(
                    "parent chain of {id} does not terminate"
                )));
            }
            links.push(link.clone());
            cursor = self.branches.get(&link.branch_id).ok_or_else(|| {
                HistoryError::corrupted(format!("missing parent branch {}", link.branch_id))
            })?;
        }
        if cursor.id != self.current_branch_id {
            return Err(HistoryError::corrupted(format!(
                "branch {id} is rooted at {} instead of the current branch",
                cursor.id
            )));
        }
        Ok(links)
    }

    /// Every entry from the initial state to the tip of branch `id`.
    pub fn timeline(&self, id: &BranchId) -> HistoryResult<Vec<&LogEntry<P>>> {
        let mut segments: Vec<&[LogEntry<P>]> = Vec::new();
        let mut cursor = self
            .branches
            .get(id)
            .ok_or_else(|| HistoryError::UnknownBranch(id.clone()))?;
        let mut upper: Option<isize> = None;
        loop {
            let take = match upper {
                None => cursor.stack.len(),
                Some(position) => {
                    let count = position - cursor.fork_index();
                    if count < 0 || count as usize > cursor.stack.len() {
                        return Err(HistoryError::corrupted(format!(
                            "fork position {position} outside branch {}",
                            cursor.id
                        )));
                    }
                    count as usize
                }
            };
            segments.push(&cursor.stack[..take]);
            let Some(link) = &cursor.parent else {
                break;
            };
            if segments.len() > self.branches.len() {
                return Err(HistoryError::corrupted(format!(
                    "parent chain of {id} does not terminate"
                )));
            }
            upper = Some(link.position);
            cursor = self.branches.get(&link.branch_id).ok_or_else(|| {
                HistoryError::corrupted(format!("missing parent branch {}", link.branch_id))
            })?;
        }
        Ok(segments.into_iter().rev().flatten().collect())
    }

    /// Length of the timeline of branch `id`.
    pub fn timeline_len(&self, id: &BranchId) -> HistoryResult<usize> {
        let branch = self
            .branches
            .get(id)
            .ok_or_else(|| HistoryError::UnknownBranch(id.clone()))?;
        Ok((branch.fork_index() + 1) as usize + branch.stack.len())
    }

    /// Whether `ancestor` appears on the original fork chain of `branch`.
    ///
    /// Follows `parent_original` links, which survive pruning and re-rooting,
    /// and stops at the first branch that no longer exists.
    #[must_use]
    pub fn was_forked_from(&self, branch: &BranchId, ancestor: &BranchId) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = self.branches.get(branch);
        while let Some(b) = cursor {
            let Some(link) = &b.parent_original else {
                return false;
            };
            if &link.branch_id == ancestor {
                return true;
            }
            if !seen.insert(link.branch_id.clone()) {
                return false;
            }
            cursor = self.branches.get(&link.branch_id);
        }
        false
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check every structural invariant.
    pub fn validate(&self) -> HistoryResult<()> {
        self.check_position()?;

        let mut ids = HashSet::new();
        for branch in self.branches.values() {
            for entry in &branch.stack {
                if !ids.insert(&entry.id) {
                    return Err(HistoryError::corrupted(format!(
                        "entry {} appears twice",
                        entry.id
                    )));
                }
            }
            if branch.id == self.current_branch_id {
                continue;
            }
            let Some(link) = &branch.parent else {
                return Err(HistoryError::corrupted(format!(
                    "branch {} has no parent but is not current",
                    branch.id
                )));
            };
            if branch.stack.is_empty() {
                return Err(HistoryError::corrupted(format!(
                    "branch {} is empty",
                    branch.id
                )));
            }
            let parent = self.branches.get(&link.branch_id).ok_or_else(|| {
                HistoryError::corrupted(format!("missing parent branch {}", link.branch_id))
            })?;
            if !parent.owns(link.position) {
                return Err(HistoryError::corrupted(format!(
                    "branch {} forks at {} outside parent {}",
                    branch.id, link.position, parent.id
                )));
            }
            self.path_to_trunk(&branch.id)?;
        }
        Ok(())
    }

    /// Check that the current branch exists and the current position names
    /// the entry stored at its index.
    pub(crate) fn check_position(&self) -> HistoryResult<()> {
        let trunk = self.branches.get(&self.current_branch_id).ok_or_else(|| {
            HistoryError::corrupted(format!(
                "current branch {} missing",
                self.current_branch_id
            ))
        })?;
        if trunk.parent.is_some() {
            return Err(HistoryError::corrupted(format!(
                "current branch {} has a parent",
                trunk.id
            )));
        }
        let index = self.current_position.global_index;
        if index < -1 || index >= trunk.stack.len() as isize {
            return Err(HistoryError::corrupted(format!(
                "current index {index} outside branch of length {}",
                trunk.stack.len()
            )));
        }
        let expected = self.action_id_at(trunk, index);
        if expected != self.current_position.action_id {
            return Err(HistoryError::corrupted(format!(
                "expected action {} at index {index}, found {}",
                self.current_position.action_id, expected
            )));
        }
        Ok(())
    }

    fn action_id_at(&self, trunk: &Branch<P>, index: isize) -> ActionId {
        if index < 0 {
            return ActionId::start();
        }
        trunk
            .stack
            .get(index as usize)
            .map_or_else(ActionId::start, |e| e.id.clone())
    }

    // ========================================================================
    // Engine-internal mutation
    // ========================================================================

    pub(crate) fn trunk_mut(&mut self) -> HistoryResult<&mut Branch<P>> {
        let id = &self.current_branch_id;
        self.branches
            .get_mut(id)
            .ok_or_else(|| HistoryError::corrupted(format!("current branch {id} missing")))
    }

    pub(crate) fn branch_mut(&mut self, id: &BranchId) -> HistoryResult<&mut Branch<P>> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| HistoryError::corrupted(format!("branch {id} missing")))
    }

    /// Point the current position at `index` on the trunk.
    pub(crate) fn set_index(&mut self, index: isize) {
        let action_id = self.action_id_at(self.current_branch(), index);
        self.current_position = Position::new(index, action_id);
    }

    pub(crate) fn next_branch_number(&mut self) -> u64 {
        self.branch_counter += 1;
        self.branch_counter
    }

    /// Child ids of every branch.
    pub(crate) fn children_map(&self) -> BTreeMap<BranchId, Vec<BranchId>> {
        let mut map: BTreeMap<BranchId, Vec<BranchId>> = BTreeMap::new();
        for branch in self.branches.values() {
            if let Some(link) = &branch.parent {
                map.entry(link.branch_id.clone())
                    .or_default()
                    .push(branch.id.clone());
            }
        }
        map
    }
}

impl<P: Clone> History<P> {
    /// `{kind, payload}` actions of the entries owned by branch `id`.
    #[must_use]
    pub fn branch_actions(&self, id: &BranchId) -> Option<Vec<Action<P>>> {
        self.branches.get(id).map(Branch::actions)
    }
}
