//! Issuance state machine

use serde::{Deserialize, Serialize};

/// Progress of a single issuance
///
/// # State Transitions
///
/// ```text
/// Init → WalWritten → IdentityCreated → PolicyAttached → KeyCreated → Committed
///            ↓              ↓                ↓              ↓
///            → RolledBack ← ← ← ← ← ← ← ← ← ← ← ← ← ← (cleanup)
/// ```
///
/// Only the `WalWritten → RolledBack` edge is taken inline. The later edges
/// are taken by the reconciler when it tears down an abandoned identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// Nothing written yet
    Init,

    /// Intent durably recorded
    WalWritten,

    /// Remote identity exists
    IdentityCreated,

    /// Policy attached, or skipped for roles without one
    PolicyAttached,

    /// Access key minted
    KeyCreated,

    /// WAL entry removed; the secret is owned by the lease subsystem
    Committed,

    /// Remote side effects undone
    RolledBack,
}

impl IssueState {
    /// Check if transition to the target state is valid
    #[must_use]
    pub fn can_transition_to(&self, target: IssueState) -> bool {
        use IssueState::*;

        match (self, target) {
            (Init, WalWritten) => true,
            (WalWritten, IdentityCreated) => true,
            (IdentityCreated, PolicyAttached) => true,
            (PolicyAttached, KeyCreated) => true,
            (KeyCreated, Committed) => true,

            (WalWritten | IdentityCreated | PolicyAttached | KeyCreated, RolledBack) => true,

            _ => false,
        }
    }

    /// Check if state is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueState::Committed | IssueState::RolledBack)
    }

    /// Whether a remote identity may exist in this state
    #[must_use]
    pub fn has_remote_identity(&self) -> bool {
        matches!(
            self,
            IssueState::IdentityCreated | IssueState::PolicyAttached | IssueState::KeyCreated
        )
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueState::Init => write!(f, "init"),
            IssueState::WalWritten => write!(f, "wal_written"),
            IssueState::IdentityCreated => write!(f, "identity_created"),
            IssueState::PolicyAttached => write!(f, "policy_attached"),
            IssueState::KeyCreated => write!(f, "key_created"),
            IssueState::Committed => write!(f, "committed"),
            IssueState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(IssueState::Init.can_transition_to(IssueState::WalWritten));
        assert!(IssueState::WalWritten.can_transition_to(IssueState::IdentityCreated));
        assert!(IssueState::IdentityCreated.can_transition_to(IssueState::PolicyAttached));
        assert!(IssueState::PolicyAttached.can_transition_to(IssueState::KeyCreated));
        assert!(IssueState::KeyCreated.can_transition_to(IssueState::Committed));
    }

    #[test]
    fn test_no_skipping_steps() {
        assert!(!IssueState::Init.can_transition_to(IssueState::IdentityCreated));
        assert!(!IssueState::WalWritten.can_transition_to(IssueState::KeyCreated));
        assert!(!IssueState::IdentityCreated.can_transition_to(IssueState::Committed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(IssueState::Committed.is_terminal());
        assert!(IssueState::RolledBack.is_terminal());
        assert!(!IssueState::Committed.can_transition_to(IssueState::RolledBack));
        assert!(!IssueState::RolledBack.can_transition_to(IssueState::WalWritten));
    }

    #[test]
    fn test_rollback_requires_written_wal() {
        assert!(!IssueState::Init.can_transition_to(IssueState::RolledBack));
        assert!(IssueState::WalWritten.can_transition_to(IssueState::RolledBack));
        assert!(IssueState::KeyCreated.can_transition_to(IssueState::RolledBack));
    }

    #[test]
    fn test_remote_identity_window() {
        assert!(!IssueState::WalWritten.has_remote_identity());
        assert!(IssueState::PolicyAttached.has_remote_identity());
        assert!(!IssueState::Committed.has_remote_identity());
    }

    #[test]
    fn test_display() {
        assert_eq!(IssueState::PolicyAttached.to_string(), "policy_attached");
    }
}
