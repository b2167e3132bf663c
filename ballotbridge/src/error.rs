use crate::LedgerError;

use thiserror::Error;

/// Error types
///
/// Every user-visible failure is one of these typed kinds; internal faults
/// are converted at the boundary where they occur.
#[derive(Debug, Error)]
pub enum Error {
    // Eligibility
    #[error("ballotbridge: voter is not registered")]
    NotEligible,

    #[error("ballotbridge: a blind signature was already issued to this voter for this election")]
    AlreadyIssued,

    #[error("ballotbridge: voter has already cast a ballot in this election")]
    AlreadyVoted,

    // Signature
    #[error("ballotbridge: invalid or replayed vote signature")]
    InvalidSignature,

    #[error("ballotbridge: signature commitment is bound to a different election")]
    ElectionMismatch,

    // Election state
    #[error("ballotbridge: election not found")]
    UnknownElection,

    #[error("ballotbridge: party is not part of this election")]
    UnknownParty,

    #[error("ballotbridge: election has not opened yet")]
    ElectionNotStarted,

    #[error("ballotbridge: election has already started")]
    ElectionStarted,

    #[error("ballotbridge: election is closed")]
    ElectionClosed,

    #[error("ballotbridge: election is still open")]
    ElectionStillOpen,

    #[error("ballotbridge: results have not been published")]
    NotPublished,

    #[error("ballotbridge: operation requires the election operator")]
    NotAuthorized,

    // Ledger
    #[error("ballotbridge: vote accepted but not yet confirmed by the ledger")]
    PendingRelay,

    #[error("ballotbridge: ledger rejected the transaction: {0}")]
    LedgerRejected(String),

    #[error("ballotbridge: relay is not running")]
    RelayUnavailable,

    #[error("ballotbridge: submission withdrawn before reaching the ledger")]
    Withdrawn,

    #[error("ballotbridge: ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Reconciliation
    #[error("ballotbridge: reconciliation discrepancy: {0}")]
    Discrepancy(String),

    #[error("ballotbridge: malformed ballot box record: {0}")]
    BadRecord(String),

    #[error("ballotbridge: RSA error: {0}")]
    Rsa(#[from] rsa::errors::Error),

    #[error("ballotbridge: ballot box error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ballotbridge: connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("ballotbridge: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
