#![forbid(unsafe_code)]

//! Dispatch facade.
//!
//! [`Engine::reduce`] is the whole public contract: it takes the caller's
//! `(state, history)` snapshot and one [`HistoryEvent`], and returns the next
//! snapshot plus the forward-style actions that were applied, in order. The
//! inputs are never modified, so a rejected event leaves the caller exactly
//! where it was.
//!
//! [`HistoryStore`] is a convenience owner for hosts that keep a single
//! `(state, history)` pair and want method-style calls.
//!
//! # Example
//!
//! ```
//! use branchlog::{ActionTable, Engine, HistoryOptions, HistoryStore};
//!
//! let table = ActionTable::new().relative("add", |p: &i64, s: &i64| s + p, |p| -p);
//! let mut store = HistoryStore::new(Engine::new(table, HistoryOptions::default()), 0);
//!
//! store.dispatch("add", 5).unwrap();
//! store.dispatch("add", 2).unwrap();
//! assert_eq!(*store.state(), 7);
//!
//! store.undo().unwrap();
//! assert_eq!(*store.state(), 5);
//! ```

use crate::config::HistoryOptions;
use crate::error::HistoryResult;
use crate::ids::{ActionId, BranchId, IdSource, SequentialIds};
use crate::log::Replay;
use crate::model::{History, LogEntry};
use crate::payload::{Action, ActionTable};
use crate::sync::HistoryBatch;
use crate::travel::BranchSwitchPolicy;

// ============================================================================
// Events
// ============================================================================

/// An action to dispatch, with recording options.
///
/// An undo-direction action (`is_undo`) is applied and recorded in that
/// direction, which lets a writer publish an undo as a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch<P> {
    pub action: Action<P>,
    /// Apply the action without recording it.
    pub skip_history: bool,
    /// Explicit undo value for absolute actions.
    pub undo_value: Option<P>,
    /// Opaque data stored on the entry.
    pub extra: Option<serde_json::Value>,
}

impl<P> Dispatch<P> {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: P) -> Self {
        Self::from(Action::new(kind, payload))
    }

    /// Apply without recording (an external update).
    #[must_use]
    pub fn skip_history(mut self) -> Self {
        self.skip_history = true;
        self
    }

    /// Use `value` as the undo value instead of deriving it from state.
    #[must_use]
    pub fn with_undo_value(mut self, value: P) -> Self {
        self.undo_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl<P> From<Action<P>> for Dispatch<P> {
    fn from(action: Action<P>) -> Self {
        Self {
            action,
            skip_history: false,
            undo_value: None,
            extra: None,
        }
    }
}

/// Input to [`Engine::reduce`].
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent<P> {
    Dispatch(Dispatch<P>),
    Undo,
    Redo,
    /// Move to an index on the current branch, or on `branch`.
    ///
    /// The index is global along the target's full timeline, counted from
    /// the initial state, not an offset into the entries the target owns
    /// after its fork.
    TimeTravel {
        index: isize,
        branch: Option<BranchId>,
    },
    /// Make `branch` current; `None` uses the configured default policy.
    SwitchToBranch {
        branch: BranchId,
        policy: Option<BranchSwitchPolicy>,
    },
    /// Drop every branch and start over from a fresh root, keeping state.
    ClearHistory,
    /// Apply entries recorded by another history.
    Receive(HistoryBatch<P>),
}

impl<P> HistoryEvent<P> {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dispatch(_) => "dispatch",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::TimeTravel { .. } => "time_travel",
            Self::SwitchToBranch { .. } => "switch_to_branch",
            Self::ClearHistory => "clear_history",
            Self::Receive(_) => "receive",
        }
    }
}

/// Result of one reduced event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S, P> {
    pub state: S,
    pub history: History<P>,
    /// Actions applied to reach `state`, in order.
    pub actions: Vec<Action<P>>,
}

// ============================================================================
// Engine
// ============================================================================

/// Action table, options and id source for one family of histories.
pub struct Engine<S, P, I = SequentialIds> {
    table: ActionTable<S, P>,
    options: HistoryOptions,
    ids: I,
}

impl<S, P, I: std::fmt::Debug> std::fmt::Debug for Engine<S, P, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("table", &self.table)
            .field("options", &self.options)
            .field("ids", &self.ids)
            .finish()
    }
}

impl<S, P> Engine<S, P> {
    /// Engine with deterministic sequential ids.
    #[must_use]
    pub fn new(table: ActionTable<S, P>, options: HistoryOptions) -> Self {
        Self::with_ids(table, options, SequentialIds::new())
    }
}

impl<S, P, I: IdSource> Engine<S, P, I> {
    #[must_use]
    pub fn with_ids(table: ActionTable<S, P>, options: HistoryOptions, ids: I) -> Self {
        Self {
            table,
            options,
            ids,
        }
    }

    #[must_use]
    pub fn table(&self) -> &ActionTable<S, P> {
        &self.table
    }

    #[must_use]
    pub fn options(&self) -> &HistoryOptions {
        &self.options
    }

    /// An empty history with one root branch.
    pub fn new_history(&mut self) -> History<P> {
        let root = self.ids.next_branch_id();
        let created = self.ids.now();
        History::new(root, created)
    }
}

impl<S: Clone, P: Clone + PartialEq, I: IdSource> Engine<S, P, I> {
    /// Apply `event` to a snapshot.
    ///
    /// Undo and redo at the bounds of the log and dispatches of unconfigured
    /// action types succeed without changes.
    pub fn reduce(
        &mut self,
        state: &S,
        history: &History<P>,
        event: HistoryEvent<P>,
    ) -> HistoryResult<Transition<S, P>> {
        let span = tracing::debug_span!(
            "history.reduce",
            event = event.name(),
            branch = %history.current_branch_id(),
            index = history.current_index(),
        );
        let _guard = span.enter();

        history.check_position()?;
        let default_policy = self.options.default_switch_policy;
        let mut replay = Replay::new(
            &self.table,
            &self.options,
            &mut self.ids,
            state.clone(),
            history.clone(),
        );
        let outcome = match event {
            HistoryEvent::Dispatch(dispatch) => replay.dispatch(dispatch),
            HistoryEvent::Undo => replay.undo_step().map(|done| {
                if !done {
                    tracing::debug!(target: "branchlog.engine", "nothing to undo");
                }
            }),
            HistoryEvent::Redo => replay.redo_step().map(|done| {
                if !done {
                    tracing::debug!(target: "branchlog.engine", "nothing to redo");
                }
            }),
            HistoryEvent::TimeTravel { index, branch } => {
                replay.time_travel(index, branch.as_ref())
            }
            HistoryEvent::SwitchToBranch { branch, policy } => {
                replay.switch_to_branch(&branch, policy.unwrap_or(default_policy))
            }
            HistoryEvent::ClearHistory => {
                replay.clear();
                Ok(())
            }
            HistoryEvent::Receive(batch) => replay.receive(batch),
        };

        if let Err(err) = outcome {
            if !err.is_fatal() {
                tracing::warn!(target: "branchlog.engine", error = %err, "rejected history event");
            }
            return Err(err);
        }
        let (state, history, actions) = replay.into_parts();
        tracing::debug!(
            target: "branchlog.engine",
            applied = actions.len(),
            index = history.current_index(),
            "event reduced"
        );
        Ok(Transition {
            state,
            history,
            actions,
        })
    }
}

impl<'a, S, P: Clone + PartialEq> Replay<'a, S, P> {
    fn dispatch(&mut self, dispatch: Dispatch<P>) -> HistoryResult<()> {
        let Dispatch {
            action,
            skip_history,
            undo_value,
            extra,
        } = dispatch;
        let table = self.table;
        let Some(config) = table.get(&action.kind) else {
            tracing::debug!(target: "branchlog.engine", kind = %action.kind, "no configuration for action type; ignored");
            return Ok(());
        };
        let next = config.apply_action(&action, &self.state);
        if skip_history {
            self.state = next;
            self.emitted.push(action);
            return Ok(());
        }

        let payload = ActionTable::record(config, &self.state, action.payload.clone(), undo_value);
        self.state = next;
        let entry = LogEntry {
            kind: action.kind.clone(),
            payload,
            id: self.ids.next_action_id(),
            created: self.ids.now(),
            extra,
            is_undo: action.is_undo,
        };
        self.emitted.push(action);
        self.append(entry)
    }

    fn clear(&mut self) {
        let root = self.ids.next_branch_id();
        let created = self.ids.now();
        tracing::debug!(
            target: "branchlog.engine",
            dropped_branches = self.history.branch_count(),
            root = %root,
            "clearing history"
        );
        self.history = History::new(root, created);
    }
}

// ============================================================================
// Store
// ============================================================================

/// Owner of one `(state, history)` pair.
///
/// Every method reduces one event and returns the applied actions; on error
/// the store is left unchanged.
#[derive(Debug)]
pub struct HistoryStore<S, P, I = SequentialIds> {
    engine: Engine<S, P, I>,
    state: S,
    history: History<P>,
}

impl<S: Clone, P: Clone + PartialEq, I: IdSource> HistoryStore<S, P, I> {
    /// A store with a fresh history.
    pub fn new(mut engine: Engine<S, P, I>, state: S) -> Self {
        let history = engine.new_history();
        Self {
            engine,
            state,
            history,
        }
    }

    /// A store resuming an existing snapshot.
    pub fn from_parts(engine: Engine<S, P, I>, state: S, history: History<P>) -> Self {
        Self {
            engine,
            state,
            history,
        }
    }

    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    #[must_use]
    pub fn history(&self) -> &History<P> {
        &self.history
    }

    #[must_use]
    pub fn engine(&self) -> &Engine<S, P, I> {
        &self.engine
    }

    pub fn into_parts(self) -> (Engine<S, P, I>, S, History<P>) {
        (self.engine, self.state, self.history)
    }

    /// Reduce `event` and keep the result.
    pub fn apply(&mut self, event: HistoryEvent<P>) -> HistoryResult<Vec<Action<P>>> {
        let next = self.engine.reduce(&self.state, &self.history, event)?;
        self.state = next.state;
        self.history = next.history;
        Ok(next.actions)
    }

    pub fn dispatch(&mut self, kind: impl Into<String>, payload: P) -> HistoryResult<Vec<Action<P>>> {
        self.dispatch_with(Dispatch::new(kind, payload))
    }

    pub fn dispatch_with(&mut self, dispatch: Dispatch<P>) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::Dispatch(dispatch))
    }

    pub fn undo(&mut self) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::Undo)
    }

    pub fn redo(&mut self) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::Redo)
    }

    pub fn time_travel(
        &mut self,
        index: isize,
        branch: Option<&BranchId>,
    ) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::TimeTravel {
            index,
            branch: branch.cloned(),
        })
    }

    pub fn switch_to_branch(
        &mut self,
        branch: &BranchId,
        policy: Option<BranchSwitchPolicy>,
    ) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::SwitchToBranch {
            branch: branch.clone(),
            policy,
        })
    }

    pub fn clear_history(&mut self) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::ClearHistory)
    }

    pub fn receive(&mut self, batch: HistoryBatch<P>) -> HistoryResult<Vec<Action<P>>> {
        self.apply(HistoryEvent::Receive(batch))
    }

    /// Entries recorded after `since`; see [`History::batch_since`].
    #[must_use]
    pub fn batch_since(&self, since: &ActionId) -> Option<HistoryBatch<P>> {
        self.history.batch_since(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HistoryError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::registry::LookupSpan;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Counter {
        count: i64,
        other: i64,
    }

    fn table() -> ActionTable<Counter, i64> {
        ActionTable::new()
            .absolute(
                "setCount",
                |p: &i64, s: &Counter| Counter { count: *p, ..s.clone() },
                |s: &Counter, _| s.count,
            )
            .relative(
                "addToCount",
                |p: &i64, s: &Counter| Counter {
                    count: s.count + p,
                    ..s.clone()
                },
                |p| -p,
            )
            .absolute(
                "setOther",
                |p: &i64, s: &Counter| Counter { other: *p, ..s.clone() },
                |s: &Counter, _| s.other,
            )
    }

    fn store() -> HistoryStore<Counter, i64> {
        HistoryStore::new(Engine::new(table(), HistoryOptions::default()), Counter::default())
    }

    #[test]
    fn dispatch_records_and_emits() {
        let mut store = store();
        let actions = store.dispatch("addToCount", 4).unwrap();
        assert_eq!(actions, vec![Action::new("addToCount", 4)]);
        assert_eq!(store.state().count, 4);
        assert_eq!(store.history().current_index(), 0);
        let entry = store.history().entry_at(0).unwrap();
        assert_eq!(entry.id.as_str(), "a1");
        assert_eq!(entry.created, 2, "root took the first tick");
    }

    #[test]
    fn skip_history_applies_without_recording() {
        let mut store = store();
        let actions = store
            .dispatch_with(Dispatch::new("setOther", 3).skip_history())
            .unwrap();
        assert_eq!(actions, vec![Action::new("setOther", 3)]);
        assert_eq!(store.state().other, 3);
        assert_eq!(store.history().current_branch().len(), 0);
        assert!(!store.history().can_undo());
    }

    #[test]
    fn unknown_action_type_is_a_no_op() {
        let mut store = store();
        store.dispatch("addToCount", 1).unwrap();
        let before = store.history().clone();
        let actions = store.dispatch("launchRocket", 1).unwrap();
        assert!(actions.is_empty());
        assert_eq!(store.history(), &before);
        assert_eq!(store.state().count, 1);
    }

    #[test]
    fn undo_and_redo_at_bounds_are_no_ops() {
        let mut store = store();
        assert!(store.undo().unwrap().is_empty());
        store.dispatch("addToCount", 2).unwrap();
        assert!(store.redo().unwrap().is_empty());
        assert_eq!(store.undo().unwrap(), vec![Action::undo("addToCount", -2)]);
        assert_eq!(store.redo().unwrap(), vec![Action::new("addToCount", 2)]);
    }

    #[test]
    fn explicit_undo_value_and_extra_are_stored() {
        let mut store = store();
        store
            .dispatch_with(
                Dispatch::new("setCount", 8)
                    .with_undo_value(-1)
                    .with_extra(serde_json::json!({"origin": "toolbar"})),
            )
            .unwrap();
        let entry = store.history().entry_at(0).unwrap().clone();
        assert_eq!(entry.extra, Some(serde_json::json!({"origin": "toolbar"})));
        store.undo().unwrap();
        assert_eq!(store.state().count, -1);
    }

    #[test]
    fn undo_direction_dispatch_is_recorded_as_such() {
        let table = ActionTable::new().relative_with_undo(
            "double",
            |_: &i64, s: &i64| s * 2,
            |p| *p,
            |_: &i64, s: &i64| s / 2,
        );
        let mut store = HistoryStore::new(Engine::new(table, HistoryOptions::default()), 12);
        let actions = store
            .dispatch_with(Dispatch::from(Action::undo("double", 0)))
            .unwrap();
        assert_eq!(actions, vec![Action::undo("double", 0)]);
        assert_eq!(*store.state(), 6);
        assert!(store.history().entry_at(0).unwrap().is_undo);

        assert_eq!(store.undo().unwrap(), vec![Action::new("double", 0)]);
        assert_eq!(*store.state(), 12);
        assert_eq!(store.redo().unwrap(), vec![Action::undo("double", 0)]);
        assert_eq!(*store.state(), 6);
    }

    #[test]
    fn reduce_leaves_inputs_untouched() {
        let mut engine = Engine::new(table(), HistoryOptions::default());
        let history = engine.new_history();
        let state = Counter::default();
        let next = engine
            .reduce(&state, &history, HistoryEvent::Dispatch(Dispatch::new("addToCount", 9)))
            .unwrap();
        assert_eq!(next.state.count, 9);
        assert_eq!(state.count, 0);
        assert_eq!(history.current_branch().len(), 0);
        assert_eq!(next.history.current_branch().len(), 1);
    }

    #[test]
    fn rejected_events_leave_store_unchanged() {
        let mut store = store();
        store.dispatch("addToCount", 2).unwrap();
        let before = (store.state().clone(), store.history().clone());
        let current = store.history().current_branch_id().clone();

        assert_eq!(
            store.time_travel(5, None),
            Err(HistoryError::IndexOutOfRange { index: 5, len: 1 })
        );
        assert_eq!(
            store.switch_to_branch(&current, None),
            Err(HistoryError::SameBranch(current.clone()))
        );
        assert_eq!((store.state().clone(), store.history().clone()), before);
    }

    #[test]
    fn clear_history_keeps_state() {
        let mut store = store();
        store.dispatch("addToCount", 2).unwrap();
        store.dispatch("addToCount", 3).unwrap();
        let old_root = store.history().current_branch_id().clone();
        assert!(store.clear_history().unwrap().is_empty());
        assert_eq!(store.state().count, 5);
        assert_eq!(store.history().branch_count(), 1);
        assert_eq!(store.history().current_index(), -1);
        assert_ne!(store.history().current_branch_id(), &old_root);
        assert!(!store.history().can_undo());
    }

    #[test]
    fn corrupted_snapshot_is_fatal() {
        let mut engine = Engine::new(table(), HistoryOptions::default());
        let mut history = engine.new_history();
        history.current_position.global_index = 3;
        let err = engine
            .reduce(&Counter::default(), &history, HistoryEvent::Undo)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    #[derive(Debug, Clone)]
    struct CapturedSpan {
        name: String,
        fields: HashMap<String, String>,
    }

    #[derive(Debug, Clone)]
    struct CapturedEvent {
        level: tracing::Level,
        target: String,
        fields: HashMap<String, String>,
    }

    #[derive(Clone, Default)]
    struct Capture {
        spans: Arc<Mutex<Vec<CapturedSpan>>>,
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    struct FieldVisitor(Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
        fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    impl<S> tracing_subscriber::Layer<S> for Capture
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = FieldVisitor(Vec::new());
            attrs.record(&mut visitor);
            self.spans.lock().unwrap().push(CapturedSpan {
                name: attrs.metadata().name().to_string(),
                fields: visitor.0.into_iter().collect(),
            });
        }

        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut visitor = FieldVisitor(Vec::new());
            event.record(&mut visitor);
            self.events.lock().unwrap().push(CapturedEvent {
                level: *event.metadata().level(),
                target: event.metadata().target().to_string(),
                fields: visitor.0.into_iter().collect(),
            });
        }
    }

    fn with_captured_tracing(f: impl FnOnce()) -> Capture {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, f);
        capture
    }

    #[test]
    fn reduce_opens_span_per_event() {
        let capture = with_captured_tracing(|| {
            let mut store = store();
            store.dispatch("addToCount", 1).unwrap();
            store.undo().unwrap();
        });
        let spans = capture.spans.lock().unwrap().clone();
        let reduce: Vec<_> = spans.iter().filter(|s| s.name == "history.reduce").collect();
        assert_eq!(reduce.len(), 2);
        assert_eq!(reduce[0].fields.get("event").map(String::as_str), Some("dispatch"));
        assert_eq!(reduce[1].fields.get("event").map(String::as_str), Some("undo"));
    }

    #[test]
    fn rejected_event_logs_warning() {
        let capture = with_captured_tracing(|| {
            let mut store = store();
            let _ = store.time_travel(7, None);
        });
        let events = capture.events.lock().unwrap().clone();
        let warning = events
            .iter()
            .find(|e| e.level == tracing::Level::WARN && e.target == "branchlog.engine")
            .expect("expected a warning");
        assert!(warning.fields.get("error").is_some_and(|e| e.contains("out of range")));
    }

    #[test]
    fn absolute_rewrite_logs_under_payload_target() {
        let capture = with_captured_tracing(|| {
            let mut store = store();
            store.dispatch("setCount", 3).unwrap();
            store
                .dispatch_with(Dispatch::new("setCount", 9).skip_history())
                .unwrap();
            store.undo().unwrap();
        });
        let events = capture.events.lock().unwrap().clone();
        assert!(events.iter().any(|e| {
            e.target == "branchlog.payload"
                && e.fields
                    .get("message")
                    .is_some_and(|m| m.contains("stale redo value"))
        }));
    }

    #[test]
    fn branching_logs_fork() {
        let capture = with_captured_tracing(|| {
            let engine = Engine::new(table(), HistoryOptions::default().with_branching(true));
            let mut store = HistoryStore::new(engine, Counter::default());
            store.dispatch("addToCount", 1).unwrap();
            store.dispatch("addToCount", 1).unwrap();
            store.undo().unwrap();
            store.dispatch("addToCount", 5).unwrap();
        });
        let events = capture.events.lock().unwrap().clone();
        assert!(events.iter().any(|e| {
            e.target == "branchlog.log"
                && e.fields
                    .get("message")
                    .is_some_and(|m| m.contains("forking new branch"))
        }));
        assert!(events.iter().any(|e| e.target == "branchlog.travel"));
    }
}
