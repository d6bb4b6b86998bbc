//! Policy engine: conditions, freeze, hooks, recorders and fees.
//!
//! Everything here is synchronous and consults coordinator state only
//! through the [`context::PolicyContext`] capability it is handed.

pub mod condition;
pub mod context;
pub mod fee;
pub mod freeze;
pub mod hook;
pub mod recorder;
