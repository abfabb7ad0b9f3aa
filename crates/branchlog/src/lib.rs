#![forbid(unsafe_code)]

//! Branchlog
//!
//! A branching, time-travelable version log for application state. Every
//! state-changing action is recorded as a reversible entry, entries form a
//! tree of branches, and the current state can be moved to any position on
//! any branch by replaying undo and redo steps.
//!
//! # Key Components
//!
//! - [`Engine`] - Pure `(state, history, event) -> transition` reducer
//! - [`HistoryStore`] - Owner of one `(state, history)` pair with method-style calls
//! - [`ActionTable`] - Per-action-type update functions and payload strategies
//! - [`History`] / [`Branch`] - The branch tree and current position
//! - [`BranchSwitchPolicy`] - Where to land when changing branches
//! - [`HistoryBatch`] - Entries exchanged between independently owned logs
//! - [`IdSource`] - Injected id and timestamp generation
//!
//! # Architecture
//!
//! ```text
//!   host event ──► Engine::reduce ──► Replay (working copy)
//!                                      │
//!                    ┌─────────────────┼──────────────────┐
//!                    ▼                 ▼                  ▼
//!               log: append      travel: move_to     sync: receive
//!               undo/redo step   switch / re-root    batch append
//!                    │                 │                  │
//!                    └────────► payload strategies ◄──────┘
//!                                      │
//!                                      ▼
//!                    Transition { state, history, actions }
//! ```
//!
//! The engine is single-threaded and synchronous. Several writers are modelled
//! as independently owned stores that exchange [`HistoryBatch`] values.

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
mod log;
pub mod model;
pub mod payload;
pub mod sync;
pub mod travel;

#[cfg(feature = "config-files")]
pub use config::ConfigError;
pub use config::HistoryOptions;
pub use engine::{Dispatch, Engine, HistoryEvent, HistoryStore, Transition};
pub use error::{HistoryError, HistoryResult};
pub use ids::{ActionId, BranchId, IdSource, SequentialIds, WallClockIds};
pub use model::{Branch, EntryPayload, History, LogEntry, ParentLink, Position};
pub use payload::{Action, ActionConfig, ActionTable, PayloadStrategy, StrategyKind};
pub use sync::HistoryBatch;
pub use travel::BranchSwitchPolicy;
