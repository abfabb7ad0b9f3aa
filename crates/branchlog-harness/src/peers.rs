#![forbid(unsafe_code)]

//! In-memory multi-writer simulation.
//!
//! Each [`Peer`] owns its own store and remembers the last action both sides
//! agree on. Batches travel as JSON, the way a real transport would ship
//! them. A peer that receives a batch while holding unsent entries rebases:
//! it travels back to the agreed action, applies the batch, then dispatches
//! its own entries again under fresh ids.
//!
//! Rebased entries stay in the receiving peer's history as ordinary,
//! undoable entries. With branching history enabled the originals also stay
//! on the side branch left behind by the rebase.
//!
//! Undo and redo only move a peer's own pointer. Once the pointer sits
//! before the agreed action, the next export or import first publishes the
//! undone shared entries as new undo-direction entries, so the other side
//! replays the undo instead of losing track of the shared history:
//!
//! ```text
//! shared:   x y          a undoes twice, pointer before x
//! a settles: x y y' x'   state unchanged, log extends the agreed action y
//! ```

use std::error::Error;

use branchlog::{
    Action, ActionId, ActionTable, Dispatch, Engine, HistoryBatch, HistoryError, HistoryOptions,
    HistoryResult, HistoryStore, SequentialIds,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// One writer with its own `(state, history)` pair.
#[derive(Debug)]
pub struct Peer<S, P> {
    name: String,
    store: HistoryStore<S, P, SequentialIds>,
    synced: ActionId,
}

impl<S: Clone, P: Clone + PartialEq> Peer<S, P> {
    /// A peer whose ids are prefixed with `name`.
    pub fn new(
        name: impl Into<String>,
        table: ActionTable<S, P>,
        options: HistoryOptions,
        state: S,
    ) -> Self {
        let name = name.into();
        let ids = SequentialIds::with_prefix(name.clone());
        Self {
            store: HistoryStore::new(Engine::with_ids(table, options, ids), state),
            name,
            synced: ActionId::start(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> &S {
        self.store.state()
    }

    #[must_use]
    pub fn store(&self) -> &HistoryStore<S, P, SequentialIds> {
        &self.store
    }

    /// Record a local action.
    pub fn dispatch(&mut self, kind: impl Into<String>, payload: P) -> HistoryResult<Vec<Action<P>>> {
        self.settle()?;
        self.store.dispatch(kind, payload)
    }

    pub fn undo(&mut self) -> HistoryResult<Vec<Action<P>>> {
        self.store.undo()
    }

    pub fn redo(&mut self) -> HistoryResult<Vec<Action<P>>> {
        self.store.redo()
    }

    /// Last action both sides agree on.
    #[must_use]
    pub fn synced(&self) -> &ActionId {
        &self.synced
    }

    /// Local entries recorded since the last sync.
    pub fn pending(&mut self) -> HistoryResult<HistoryBatch<P>> {
        self.settle()?;
        self.store
            .batch_since(&self.synced)
            .ok_or_else(|| HistoryError::ParentMismatch {
                expected: self.synced.clone(),
                found: self.current_id(),
            })
    }

    /// Apply a batch from the other side, rebasing local entries if needed.
    pub fn accept(&mut self, batch: HistoryBatch<P>) -> HistoryResult<()> {
        let _span = tracing::info_span!(
            "peer.accept",
            peer = %self.name,
            parent = %batch.parent,
            entries = batch.len()
        )
        .entered();

        if batch.is_empty() {
            return Ok(());
        }
        self.settle()?;
        let last = batch.last_id().clone();
        if batch.parent == self.current_id() {
            self.store.receive(batch)?;
            self.synced = last;
            return Ok(());
        }
        if batch.parent != self.synced {
            return Err(HistoryError::ParentMismatch {
                expected: batch.parent,
                found: self.synced.clone(),
            });
        }

        let local = self.pending()?;
        let index = self
            .store
            .history()
            .index_of(&self.synced)
            .ok_or_else(|| HistoryError::ParentMismatch {
                expected: self.synced.clone(),
                found: self.current_id(),
            })?;
        self.store.time_travel(index, None)?;
        self.store.receive(batch)?;
        for entry in local.entries {
            let mut dispatch = Dispatch::from(entry.action());
            dispatch.extra = entry.extra;
            self.store.dispatch_with(dispatch)?;
        }
        tracing::debug!(peer = %self.name, "rebased local entries");
        self.synced = last;
        Ok(())
    }

    /// Record that everything up to the current action is shared.
    pub fn mark_synced(&mut self) {
        self.synced = self.current_id();
    }

    /// Turn undone shared entries into new entries on top of the agreed
    /// action, leaving state unchanged.
    fn settle(&mut self) -> HistoryResult<()> {
        let history = self.store.history();
        let current = history.current_index();
        let synced = history
            .index_of(&self.synced)
            .ok_or_else(|| HistoryError::ParentMismatch {
                expected: self.synced.clone(),
                found: self.current_id(),
            })?;
        if synced <= current {
            return Ok(());
        }
        self.store.time_travel(synced, None)?;
        let undone = self.store.time_travel(current, None)?;
        self.store.time_travel(synced, None)?;
        let published = undone.len();
        for action in undone {
            self.store.dispatch_with(Dispatch::from(action))?;
        }
        tracing::debug!(peer = %self.name, published, "published undo of shared entries");
        Ok(())
    }

    fn current_id(&self) -> ActionId {
        self.store.history().current_position().action_id.clone()
    }
}

/// Ship `batch` through JSON.
pub fn transmit<P>(batch: &HistoryBatch<P>) -> serde_json::Result<HistoryBatch<P>>
where
    P: Serialize + DeserializeOwned,
{
    let wire = serde_json::to_string(batch)?;
    serde_json::from_str(&wire)
}

/// Exchange pending entries both ways; `b`'s entries are ordered first.
pub fn sync_pair<S, P>(a: &mut Peer<S, P>, b: &mut Peer<S, P>) -> Result<(), Box<dyn Error>>
where
    S: Clone,
    P: Clone + PartialEq + Serialize + DeserializeOwned,
{
    let from_b = transmit(&b.pending()?)?;
    a.accept(from_b)?;
    let from_a = transmit(&a.pending()?)?;
    b.accept(from_a)?;
    a.mark_synced();
    b.mark_synced();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{ADD_TO_COUNT, ADD_TO_OTHER, CounterState, counter_table};
    use proptest::prelude::*;

    fn peer(name: &str, options: HistoryOptions) -> Peer<CounterState, i64> {
        Peer::new(name, counter_table(), options, CounterState::default())
    }

    fn trunk_ids(peer: &Peer<CounterState, i64>) -> Vec<String> {
        peer.store()
            .history()
            .current_branch()
            .stack()
            .iter()
            .map(|e| e.id.to_string())
            .collect()
    }

    #[test]
    fn fast_forward_when_nothing_pending() {
        let mut a = peer("a", HistoryOptions::default());
        let mut b = peer("b", HistoryOptions::default());
        b.dispatch(ADD_TO_COUNT, 4).unwrap();
        sync_pair(&mut a, &mut b).unwrap();
        assert_eq!(a.state(), b.state());
        assert_eq!(trunk_ids(&a), ["b-a1"]);
        assert_eq!(a.synced().as_str(), "b-a1");
    }

    #[test]
    fn concurrent_relative_entries_converge() {
        for branching in [false, true] {
            let options = HistoryOptions::default().with_branching(branching);
            let mut a = peer("a", options.clone());
            let mut b = peer("b", options);
            a.dispatch(ADD_TO_COUNT, 5).unwrap();
            b.dispatch(ADD_TO_COUNT, 3).unwrap();
            b.dispatch(ADD_TO_OTHER, 1).unwrap();

            sync_pair(&mut a, &mut b).unwrap();
            assert_eq!(*a.state(), CounterState::new(8, 1));
            assert_eq!(a.state(), b.state());
            assert_eq!(trunk_ids(&a), trunk_ids(&b));
            assert_eq!(a.synced(), b.synced());
            a.store().history().validate().unwrap();
            b.store().history().validate().unwrap();
        }
    }

    #[test]
    fn rebased_entries_stay_undoable() {
        let mut a = peer("a", HistoryOptions::default().with_branching(true));
        let mut b = peer("b", HistoryOptions::default().with_branching(true));
        a.dispatch(ADD_TO_COUNT, 5).unwrap();
        b.dispatch(ADD_TO_COUNT, 3).unwrap();
        sync_pair(&mut a, &mut b).unwrap();

        // The original a-a1 survives on the branch left behind.
        assert!(a.store().history().contains_action(&ActionId::new("a-a1")));
        assert_eq!(a.store().history().branch_count(), 2);

        a.undo().unwrap();
        assert_eq!(a.state().count, 3);
    }

    fn applied_ids(peer: &Peer<CounterState, i64>) -> Vec<String> {
        let history = peer.store().history();
        let upto = (history.current_index() + 1) as usize;
        trunk_ids(peer).into_iter().take(upto).collect()
    }

    #[test]
    fn undo_of_synced_entry_reaches_other_peer() {
        let mut a = peer("a", HistoryOptions::default());
        let mut b = peer("b", HistoryOptions::default());
        b.dispatch(ADD_TO_COUNT, 4).unwrap();
        sync_pair(&mut a, &mut b).unwrap();

        a.undo().unwrap();
        assert_eq!(a.state().count, 0);
        sync_pair(&mut a, &mut b).unwrap();
        assert_eq!(a.state(), b.state());
        assert_eq!(b.state().count, 0);
        assert_eq!(trunk_ids(&a), ["b-a1", "a-a1"]);
        assert_eq!(trunk_ids(&a), trunk_ids(&b));
        assert!(b.store().history().entry_at(1).unwrap().is_undo);

        a.dispatch(ADD_TO_COUNT, 1).unwrap();
        sync_pair(&mut a, &mut b).unwrap();
        assert_eq!(b.state().count, 1);
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn undo_races_with_remote_edit() {
        let mut a = peer("a", HistoryOptions::default());
        let mut b = peer("b", HistoryOptions::default());
        b.dispatch(ADD_TO_COUNT, 4).unwrap();
        b.dispatch(ADD_TO_OTHER, 2).unwrap();
        sync_pair(&mut a, &mut b).unwrap();

        a.undo().unwrap();
        a.undo().unwrap();
        b.dispatch(ADD_TO_COUNT, 10).unwrap();
        sync_pair(&mut a, &mut b).unwrap();

        assert_eq!(*a.state(), CounterState::new(10, 0));
        assert_eq!(a.state(), b.state());
        assert_eq!(applied_ids(&a), applied_ids(&b));
        a.store().history().validate().unwrap();
    }

    #[test]
    fn undo_before_sync_then_redo_publishes_nothing() {
        let mut a = peer("a", HistoryOptions::default());
        let mut b = peer("b", HistoryOptions::default());
        a.dispatch(ADD_TO_COUNT, 4).unwrap();
        sync_pair(&mut a, &mut b).unwrap();
        a.undo().unwrap();
        a.redo().unwrap();
        assert!(a.pending().unwrap().is_empty());
        assert_eq!(trunk_ids(&a), ["a-a1"]);
    }

    #[test]
    fn batch_from_unknown_parent_is_rejected() {
        let mut a = peer("a", HistoryOptions::default());
        a.dispatch(ADD_TO_COUNT, 1).unwrap();
        let batch = HistoryBatch::new(ActionId::new("elsewhere"), a.pending().unwrap().entries);
        assert!(matches!(
            a.accept(batch),
            Err(HistoryError::ParentMismatch { .. })
        ));
    }

    #[test]
    fn transmit_preserves_batch() {
        let mut a = peer("a", HistoryOptions::default());
        a.dispatch(ADD_TO_COUNT, 1).unwrap();
        let batch = a.pending().unwrap();
        assert_eq!(transmit(&batch).unwrap(), batch);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { left: bool, delta: i64 },
        Undo { left: bool },
        Redo { left: bool },
        Sync,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (any::<bool>(), -20i64..20).prop_map(|(left, delta)| Op::Add { left, delta }),
            2 => any::<bool>().prop_map(|left| Op::Undo { left }),
            1 => any::<bool>().prop_map(|left| Op::Redo { left }),
            1 => Just(Op::Sync),
        ]
    }

    proptest! {
        #[test]
        fn peers_converge_with_undo_and_redo(
            ops in prop::collection::vec(op_strategy(), 1..30),
            branching in any::<bool>(),
        ) {
            let options = HistoryOptions::default().with_branching(branching);
            let mut a = peer("a", options.clone());
            let mut b = peer("b", options);
            for op in &ops {
                match *op {
                    Op::Add { left, delta } => {
                        let (p, kind) = if left { (&mut a, ADD_TO_COUNT) } else { (&mut b, ADD_TO_OTHER) };
                        p.dispatch(kind, delta).unwrap();
                    }
                    Op::Undo { left } => {
                        if left { a.undo().unwrap(); } else { b.undo().unwrap(); }
                    }
                    Op::Redo { left } => {
                        if left { a.redo().unwrap(); } else { b.redo().unwrap(); }
                    }
                    Op::Sync => sync_pair(&mut a, &mut b).unwrap(),
                }
            }
            sync_pair(&mut a, &mut b).unwrap();
            prop_assert_eq!(a.state(), b.state());
            prop_assert_eq!(applied_ids(&a), applied_ids(&b));
            prop_assert!(a.store().history().validate().is_ok());
            prop_assert!(b.store().history().validate().is_ok());
        }

        #[test]
        fn peers_converge_after_sync(
            left in prop::collection::vec(-50i64..50, 0..6),
            right in prop::collection::vec(-50i64..50, 0..6),
        ) {
            let mut a = peer("a", HistoryOptions::default());
            let mut b = peer("b", HistoryOptions::default());
            for delta in &left {
                a.dispatch(ADD_TO_COUNT, *delta).unwrap();
            }
            for delta in &right {
                b.dispatch(ADD_TO_OTHER, *delta).unwrap();
            }
            sync_pair(&mut a, &mut b).unwrap();
            prop_assert_eq!(a.state(), b.state());
            prop_assert_eq!(a.state().count, left.iter().sum::<i64>());
            prop_assert_eq!(a.state().other, right.iter().sum::<i64>());
            prop_assert_eq!(trunk_ids(&a), trunk_ids(&b));
        }
    }
}
