//! Application layer containing the retry executor and the payment workflow it guards.
//!
//! `RetryExecutor` is domain-agnostic and wraps calls to any unreliable dependency.
//! `PaymentCoordinator` owns the state machine of a single payment attempt and routes
//! its gateway calls through the executor. `PaymentBatch` runs many coordinators
//! side by side on `tokio` tasks.

pub mod batch;
pub mod coordinator;
pub mod retry;
