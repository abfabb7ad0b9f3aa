#![forbid(unsafe_code)]

//! Test harness and reference fixtures for branchlog.
//!
//! - [`counter`]: two-field counter with absolute and relative actions
//! - [`list`]: string list driven by custom push/pop actions
//! - [`numeric`]: single integer with the three-branch travel scenario
//! - [`peers`]: independently owned stores exchanging batches

pub mod counter;
pub mod list;
pub mod numeric;
pub mod peers;
