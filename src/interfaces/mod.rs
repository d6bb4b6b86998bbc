//! Outer surfaces: scenario configuration, CSV command stream and payment
//! table, and the runner that replays commands against a coordinator.

pub mod config;
pub mod csv;
pub mod runner;
