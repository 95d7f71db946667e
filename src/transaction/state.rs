//! Transaction state management.

use super::id::TransactionId;

/// The possible states of a transaction.
///
/// `Active -> Committing -> Committed` or `Active -> Aborting -> Aborted`.
/// A commit that fails before its COMMIT record is durable moves on
/// `Committing -> Aborting`. Both terminal states are final; a terminal
/// id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction is currently active and can perform operations.
    Active,
    /// Commit has started: the log is being forced and pages written.
    Committing,
    /// The transaction has been successfully committed.
    Committed,
    /// Abort has started: pages are being rolled back.
    Aborting,
    /// The transaction has been aborted (rolled back).
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Returns true if the transaction is aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Whether `self -> next` is a legal edge of the state machine.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Committing)
                | (Self::Active, Self::Aborting)
                | (Self::Committing, Self::Committed)
                | (Self::Committing, Self::Aborting)
                | (Self::Aborting, Self::Aborted)
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committing => write!(f, "Committing"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborting => write!(f, "Aborting"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Bookkeeping for one transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
}

impl TransactionInfo {
    /// Creates a new transaction info for an active transaction.
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
        }
    }

    /// Moves to `next`, returning false (and changing nothing) when the
    /// edge is not part of the state machine.
    pub fn transition(&mut self, next: TransactionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}
