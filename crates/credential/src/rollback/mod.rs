//! Rollback of abandoned identities
//!
//! - [`delete_user`]: idempotent teardown used by revoke and WAL replay
//! - [`rollback_sweep`] / [`Reconciler`]: WAL replay, on demand or periodic

mod cleanup;
pub mod reconciler;

pub use cleanup::delete_user;
pub use reconciler::{ReconcileConfig, Reconciler, SweepReport, rollback_sweep, sweep_at};
