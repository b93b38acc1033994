//! Credential issuance
//!
//! Creates an IAM user, attaches the role's managed policy and mints an
//! access key, with a WAL intent record guarding every remote mutation.
//!
//! ```text
//! generate username
//!   → put WAL("user", PendingUserCreation)
//!   → create user ─ fail → delete WAL, return error
//!   → attach policy ─ fail → return partial (WAL stays)
//!   → create access key ─ fail → return partial (WAL stays)
//!   → resolve lease ─ fail → return partial (WAL stays)
//!   → delete WAL ─ fail → return partial (WAL stays)
//!   → secret
//! ```

mod intent;
mod sequencer;
mod state;

pub use intent::{USER_WAL_KIND, WalIntent};
pub use sequencer::{IssueFailure, IssueRequest, Issuer, PartialIssue};
pub use state::IssueState;
