//! Testing utilities
//!
//! Mock collaborators and fixtures for exercising issuance, revocation and
//! WAL replay without AWS. Enabled for this crate's own tests and, through
//! the `test-util` feature, for integration tests.

pub mod fixtures;
pub mod mocks;

pub use self::fixtures::*;
pub use self::mocks::*;
