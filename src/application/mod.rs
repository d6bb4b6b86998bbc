//! Application layer: the payment coordinator and the machinery around it.
//!
//! `EscrowCoordinator` is the primary entry point. It sequences every
//! transition, runs the policy pipeline and commits staged ledger records
//! through the `LedgerStore` port. Factories deploy policy components by
//! content address; the journal and audit log back the all-or-nothing and
//! reconciliation guarantees.

pub mod audit;
pub mod coordinator;
pub mod factory;
pub mod journal;
