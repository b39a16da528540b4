use super::account::{Account, AccountId, BalanceDelta};
use super::transaction::{Transaction, TransactionId, TransactionStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountStoreBox = Box<dyn AccountStore>;
pub type TransactionLogBox = Box<dyn TransactionLog>;

/// Durable keyed storage of account records.
///
/// The store is the only place balance and version are written, and
/// `conditional_update` is the only write path for them. Implementations must
/// make the version check, the sufficiency check and the mutation one atomic
/// step (single-row transaction or equivalent).
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create(&self, account: Account) -> Result<Account>;

    async fn get(&self, id: &AccountId) -> Result<Option<Account>>;

    async fn all_accounts(&self) -> Result<Vec<Account>>;

    /// Atomically applies `delta` if the stored version equals
    /// `expected_version`, recording `tx_id` as applied against this account.
    ///
    /// Fails with `Conflict` on a stale version, `InsufficientFunds` if a
    /// debit would overdraw, `AccountNotFound` for unknown or retired
    /// accounts. Replaying a `tx_id` already applied to this account is a
    /// no-op success returning the current record, so an ambiguous
    /// acknowledgment can be retried without double-applying.
    async fn conditional_update(
        &self,
        id: &AccountId,
        expected_version: u64,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account>;

    /// Whether `tx_id` has been durably applied against `id`. This is the
    /// reconciler's source of truth for resolving stuck transactions.
    async fn was_applied(&self, id: &AccountId, tx_id: &TransactionId) -> Result<bool>;

    /// Soft-retires an account; records are never physically deleted.
    async fn retire(&self, id: &AccountId) -> Result<Account>;
}

/// Outcome of an idempotent `record` call.
#[derive(Debug, PartialEq, Clone)]
pub enum Recorded {
    /// The transaction was not in the log and has been appended.
    Fresh(Transaction),
    /// The id was already recorded; the existing view is returned unchanged.
    Existing(Transaction),
}

impl Recorded {
    pub fn into_inner(self) -> Transaction {
        match self {
            Self::Fresh(tx) | Self::Existing(tx) => tx,
        }
    }
}

/// Opaque pagination cursor for restartable statement listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    /// Present when more history remains; feed back into `list_by_account`.
    pub next: Option<Cursor>,
}

/// Append-only, idempotent record of all attempted operations.
///
/// Status transitions are appended as new events; nothing recorded is ever
/// rewritten or deleted, which keeps the trail replayable for audits.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Records a new transaction, or returns the existing record when the id
    /// is already present. Callers rely on this for idempotent retries.
    async fn record(&self, tx: Transaction) -> Result<Recorded>;

    /// Appends a status-transition event and returns the updated view.
    async fn update(&self, id: &TransactionId, status: TransactionStatus) -> Result<Transaction>;

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// Terminal-status history for one account, newest first. The cursor
    /// makes the listing restartable when the backing store paginates.
    async fn list_by_account(
        &self,
        account: &AccountId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<TransactionPage>;

    /// Transactions still `Pending` past `cutoff`, oldest first; input for
    /// the reconciliation pass.
    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>>;
}
