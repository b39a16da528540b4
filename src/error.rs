use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure taxonomy of the ledger core.
///
/// Validation failures are terminal and leave all balances untouched.
/// `Conflict` and `StoreUnavailable` are transient: the engine retries them
/// internally before surfacing them to the caller.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("amount must be a positive value: {0}")]
    InvalidAmount(rust_decimal::Decimal),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("principal {principal} does not own account {account}")]
    Unauthorized { principal: String, account: String },
    #[error("insufficient funds in account {0}")]
    InsufficientFunds(String),
    #[error("concurrent update conflict on account {0}")]
    Conflict(String),
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("account store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("transaction {0} requires reconciliation")]
    Inconsistent(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    /// Transient errors the engine's bounded retry loop may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::StoreUnavailable(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}
