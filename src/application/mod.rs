//! Application layer containing the reconciliation flows.
//!
//! `ReconciliationEngine` is the entry point used by front-ends and by the sweep
//! scheduler. It talks to the outside world only through the ports in
//! `crate::domain::ports`.

pub mod engine;
pub mod payments;
pub mod provisioning;
pub mod retry;
pub mod scheduler;
