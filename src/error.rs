use thiserror::Error;

use crate::ledger::AccountId;

/// Failures of the record store backing the ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A staged removal targeted a link that is no longer present.
    #[error("staged removal of missing link {owner}:{path}")]
    MissingLink { owner: AccountId, path: String },
}

/// Every way an event can be rejected by the ledger engine.
///
/// All variants abort the current event; nothing it staged is committed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("withdrawal of {requested} exceeds paid balance {available} of {account}")]
    InsufficientBalance {
        account: AccountId,
        requested: u64,
        available: u64,
    },

    #[error("{account} needs {requested} bytes but only {available} are available")]
    QuotaExceeded {
        account: AccountId,
        requested: u64,
        available: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transfer {from} -> {to} does not involve the ledger account")]
    UnknownTransfer { from: AccountId, to: AccountId },

    #[error("missing authority of {0}")]
    Unauthorized(AccountId),

    #[error("transfer amount must be positive")]
    InvalidAmount,

    #[error("invalid ledger path {0:?}")]
    InvalidPath(String),

    #[error("invalid remote locator {0:?}")]
    InvalidLocator(String),

    #[error("unknown event type")]
    UnknownEvent,

    #[error("event {0} was already applied")]
    DuplicateEvent(String),

    #[error("capacity ledger has not been initialised")]
    NotInitialized,

    #[error("capacity ledger is already initialised")]
    AlreadyInitialized,

    #[error("release of {requested} raw share units exceeds reserved {reserved}")]
    ReserveUnderflow { requested: u128, reserved: u128 },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("event encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
