#![forbid(unsafe_code)]

//! Payload transformation strategies.
//!
//! Every action type is registered in an [`ActionTable`] with a forward state
//! update and exactly one [`PayloadStrategy`] describing how a recorded entry
//! is undone and redone:
//!
//! | Strategy | Stored payload | Undo | Rewritten on traversal |
//! |----------|----------------|------|------------------------|
//! | Absolute | `{undo, redo}` values | apply `undo` | yes |
//! | Relative | payload as dispatched | apply `invert(payload)` with the undo update, if any | no |
//! | Custom   | payload as dispatched | apply `make_undo(action)` | no |
//!
//! Every action an undo step applies is emitted with `is_undo` set; redo
//! steps emit the entry's own direction. [`ActionTable::apply_action`] maps
//! an emitted action back to the update the engine ran, so a host can mirror
//! the emitted list exactly.
//!
//! Absolute entries hold complete values of some projection of state, so an
//! out-of-band update (dispatched with `skip_history`) makes them stale. Before
//! an absolute entry is undone its `redo` value is refreshed from the live
//! state, and before it is redone its `undo` value is, so replay reproduces
//! the externally updated value instead of the one seen at dispatch time.
//!
//! Relative and custom payloads are self-contained and commute with external
//! updates, which makes them the only strategies that survive interleaving
//! batches from several writers.
//!
//! # Contract
//!
//! Forward updates are pure `(payload, state_before) -> state_after`
//! functions. No other channel may change state as a result of dispatch.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, HistoryResult};
use crate::ids::ActionId;
use crate::model::{EntryPayload, LogEntry};

/// A concrete action: tag plus payload, without bookkeeping.
///
/// Actions produced by an undo step carry `is_undo`. A host mirroring the
/// emitted actions must run each one through [`ActionTable::apply_action`],
/// which picks the undo update of relative types that configure one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action<P> {
    pub kind: String,
    pub payload: P,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_undo: bool,
}

impl<P> Action<P> {
    /// A forward action.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: P) -> Self {
        Self {
            kind: kind.into(),
            payload,
            is_undo: false,
        }
    }

    /// An undo-direction action.
    #[must_use]
    pub fn undo(kind: impl Into<String>, payload: P) -> Self {
        Self {
            is_undo: true,
            ..Self::new(kind, payload)
        }
    }
}

pub(crate) fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Forward state update: `(payload, state_before) -> state_after`.
pub type UpdateFn<S, P> = Box<dyn Fn(&P, &S) -> S + Send + Sync>;
/// Live value of the projection an absolute payload targets.
pub type ValueFn<S, P> = Box<dyn Fn(&S, &P) -> P + Send + Sync>;
/// Payload-level inverse of a relative payload.
pub type InvertFn<P> = Box<dyn Fn(&P) -> P + Send + Sync>;
/// Arbitrary undo action for a custom payload.
pub type MakeUndoFn<P> = Box<dyn Fn(&Action<P>) -> Action<P> + Send + Sync>;

/// How an action type's entries are undone and redone.
pub enum PayloadStrategy<S, P> {
    /// Store complete before/after values.
    ///
    /// `current_value(state, payload)` returns the live value of the
    /// projection `payload` targets; it derives the undo value at dispatch
    /// and detects external updates during traversal.
    Absolute { current_value: ValueFn<S, P> },
    /// Store the payload and undo it with a structural inverse.
    ///
    /// `undo_update` replaces the forward update during undo when set.
    Relative {
        invert: InvertFn<P>,
        undo_update: Option<UpdateFn<S, P>>,
    },
    /// Store the payload and undo it with an arbitrary action, which may name
    /// another configured action type.
    Custom { make_undo: MakeUndoFn<P> },
}

/// Discriminant of a [`PayloadStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Absolute,
    Relative,
    Custom,
}

impl<S, P> PayloadStrategy<S, P> {
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Absolute { .. } => StrategyKind::Absolute,
            Self::Relative { .. } => StrategyKind::Relative,
            Self::Custom { .. } => StrategyKind::Custom,
        }
    }
}

/// Configuration of one action type.
pub struct ActionConfig<S, P> {
    update: UpdateFn<S, P>,
    strategy: PayloadStrategy<S, P>,
}

impl<S, P> fmt::Debug for ActionConfig<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionConfig")
            .field("strategy", &self.strategy.kind())
            .finish()
    }
}

impl<S, P> ActionConfig<S, P> {
    /// Absolute strategy.
    pub fn absolute<U, V>(update: U, current_value: V) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        V: Fn(&S, &P) -> P + Send + Sync + 'static,
    {
        Self {
            update: Box::new(update),
            strategy: PayloadStrategy::Absolute {
                current_value: Box::new(current_value),
            },
        }
    }

    /// Relative strategy undone by applying the forward update to
    /// `invert(payload)`.
    pub fn relative<U, I>(update: U, invert: I) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        I: Fn(&P) -> P + Send + Sync + 'static,
    {
        Self {
            update: Box::new(update),
            strategy: PayloadStrategy::Relative {
                invert: Box::new(invert),
                undo_update: None,
            },
        }
    }

    /// Relative strategy with a distinct update used only during undo.
    pub fn relative_with_undo<U, I, W>(update: U, invert: I, undo_update: W) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        I: Fn(&P) -> P + Send + Sync + 'static,
        W: Fn(&P, &S) -> S + Send + Sync + 'static,
    {
        Self {
            update: Box::new(update),
            strategy: PayloadStrategy::Relative {
                invert: Box::new(invert),
                undo_update: Some(Box::new(undo_update)),
            },
        }
    }

    /// Custom strategy.
    pub fn custom<U, M>(update: U, make_undo: M) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        M: Fn(&Action<P>) -> Action<P> + Send + Sync + 'static,
    {
        Self {
            update: Box::new(update),
            strategy: PayloadStrategy::Custom {
                make_undo: Box::new(make_undo),
            },
        }
    }

    #[must_use]
    pub fn strategy(&self) -> &PayloadStrategy<S, P> {
        &self.strategy
    }

    /// Run the forward update.
    pub fn apply(&self, payload: &P, state: &S) -> S {
        (self.update)(payload, state)
    }

    /// Run the update `action`'s direction calls for: the undo update for
    /// undo-direction actions of a relative type that has one, the forward
    /// update otherwise.
    pub fn apply_action(&self, action: &Action<P>, state: &S) -> S {
        match &self.strategy {
            PayloadStrategy::Relative {
                undo_update: Some(undo_update),
                ..
            } if action.is_undo => undo_update(&action.payload, state),
            _ => self.apply(&action.payload, state),
        }
    }
}

/// Per-tag configuration supplied by the host.
pub struct ActionTable<S, P> {
    configs: HashMap<String, ActionConfig<S, P>>,
}

impl<S, P> fmt::Debug for ActionTable<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self
            .configs
            .iter()
            .map(|(kind, config)| (kind.as_str(), config.strategy.kind()))
            .collect();
        kinds.sort_unstable_by_key(|(kind, _)| *kind);
        f.debug_struct("ActionTable").field("kinds", &kinds).finish()
    }
}

impl<S, P> Default for ActionTable<S, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P> ActionTable<S, P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
        }
    }

    /// Register `kind`, replacing any earlier configuration.
    #[must_use]
    pub fn insert(mut self, kind: impl Into<String>, config: ActionConfig<S, P>) -> Self {
        self.configs.insert(kind.into(), config);
        self
    }

    /// Register an absolute-strategy action type.
    #[must_use]
    pub fn absolute<U, V>(self, kind: impl Into<String>, update: U, current_value: V) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        V: Fn(&S, &P) -> P + Send + Sync + 'static,
    {
        self.insert(kind, ActionConfig::absolute(update, current_value))
    }

    /// Register a relative-strategy action type.
    #[must_use]
    pub fn relative<U, I>(self, kind: impl Into<String>, update: U, invert: I) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        I: Fn(&P) -> P + Send + Sync + 'static,
    {
        self.insert(kind, ActionConfig::relative(update, invert))
    }

    /// Register a relative-strategy action type with a distinct undo update.
    #[must_use]
    pub fn relative_with_undo<U, I, W>(
        self,
        kind: impl Into<String>,
        update: U,
        invert: I,
        undo_update: W,
    ) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        I: Fn(&P) -> P + Send + Sync + 'static,
        W: Fn(&P, &S) -> S + Send + Sync + 'static,
    {
        self.insert(
            kind,
            ActionConfig::relative_with_undo(update, invert, undo_update),
        )
    }

    /// Register a custom-strategy action type.
    #[must_use]
    pub fn custom<U, M>(self, kind: impl Into<String>, update: U, make_undo: M) -> Self
    where
        U: Fn(&P, &S) -> S + Send + Sync + 'static,
        M: Fn(&Action<P>) -> Action<P> + Send + Sync + 'static,
    {
        self.insert(kind, ActionConfig::custom(update, make_undo))
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&ActionConfig<S, P>> {
        self.configs.get(kind)
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.configs.contains_key(kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    fn config(&self, kind: &str) -> HistoryResult<&ActionConfig<S, P>> {
        self.get(kind)
            .ok_or_else(|| HistoryError::UnknownActionType(kind.to_string()))
    }

    /// Apply an emitted action to `state` exactly as the engine did.
    pub fn apply_action(&self, action: &Action<P>, state: &S) -> HistoryResult<S> {
        Ok(self.config(&action.kind)?.apply_action(action, state))
    }
}

impl<S, P: Clone + PartialEq> ActionTable<S, P> {
    /// Payload to store for an action dispatched against `state_before`.
    ///
    /// An explicit `undo_value` skips deriving it from state; it is ignored
    /// for non-absolute strategies.
    pub(crate) fn record(
        config: &ActionConfig<S, P>,
        state_before: &S,
        payload: P,
        undo_value: Option<P>,
    ) -> EntryPayload<P> {
        match &config.strategy {
            PayloadStrategy::Absolute { current_value } => EntryPayload::Absolute {
                undo: undo_value.unwrap_or_else(|| current_value(state_before, &payload)),
                redo: payload,
            },
            PayloadStrategy::Relative { .. } | PayloadStrategy::Custom { .. } => {
                EntryPayload::Relative(payload)
            }
        }
    }

    /// Undo `entry` against `state`, returning the new state and the action
    /// that was applied.
    pub(crate) fn undo(&self, entry: &mut LogEntry<P>, state: &S) -> HistoryResult<(S, Action<P>)> {
        let config = self.config(&entry.kind)?;
        let direction = !entry.is_undo;
        let mut action = match (&config.strategy, &mut entry.payload) {
            (PayloadStrategy::Absolute { current_value }, EntryPayload::Absolute { undo, redo }) => {
                let live = current_value(state, redo);
                if live != *redo {
                    tracing::debug!(
                        target: "branchlog.payload",
                        action_id = %entry.id,
                        kind = %entry.kind,
                        "rewriting stale redo value before undo"
                    );
                    *redo = live;
                }
                Action::new(entry.kind.clone(), undo.clone())
            }
            (PayloadStrategy::Relative { invert, .. }, EntryPayload::Relative(payload)) => {
                Action::new(entry.kind.clone(), invert(payload))
            }
            (PayloadStrategy::Custom { make_undo }, EntryPayload::Relative(payload)) => {
                let mut forward = Action::new(entry.kind.clone(), payload.clone());
                forward.is_undo = entry.is_undo;
                make_undo(&forward)
            }
            _ => return Err(shape_mismatch(&entry.id, &entry.kind, config.strategy.kind())),
        };
        action.is_undo = direction;
        let next = self.apply_action(&action, state)?;
        Ok((next, action))
    }

    /// Redo `entry` against `state`, returning the new state and the action
    /// that was applied.
    pub(crate) fn redo(&self, entry: &mut LogEntry<P>, state: &S) -> HistoryResult<(S, Action<P>)> {
        let config = self.config(&entry.kind)?;
        let payload = match (&config.strategy, &mut entry.payload) {
            (PayloadStrategy::Absolute { current_value }, EntryPayload::Absolute { undo, redo }) => {
                let live = current_value(state, redo);
                if live != *undo {
                    tracing::debug!(
                        target: "branchlog.payload",
                        action_id = %entry.id,
                        kind = %entry.kind,
                        "rewriting stale undo value before redo"
                    );
                    *undo = live;
                }
                redo.clone()
            }
            (
                PayloadStrategy::Relative { .. } | PayloadStrategy::Custom { .. },
                EntryPayload::Relative(payload),
            ) => payload.clone(),
            _ => return Err(shape_mismatch(&entry.id, &entry.kind, config.strategy.kind())),
        };
        let action = Action {
            kind: entry.kind.clone(),
            payload,
            is_undo: entry.is_undo,
        };
        Ok((config.apply_action(&action, state), action))
    }
}

fn shape_mismatch(id: &ActionId, kind: &str, strategy: StrategyKind) -> HistoryError {
    HistoryError::corrupted(format!(
        "entry {id} payload does not match the {strategy:?} strategy of '{kind}'"
    ))
}
