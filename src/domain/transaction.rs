use super::account::{AccountId, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique transaction identifier.
///
/// Caller-supplied ids double as idempotence keys: replaying an operation
/// under an id the log already holds returns the existing record instead of
/// applying a second balance effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic id for the compensating reversal of a transfer.
    ///
    /// Derived with UUIDv5 from the original id so that a crashed-and-rerun
    /// coordinator or reconciler always produces the same reversal id and the
    /// log's idempotent `record` collapses the duplicates.
    pub fn reversal_of(original: &TransactionId) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, original.0.as_bytes()).to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    Transfer,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    /// Reconciler verdict for an expired `Pending` attempt whose balance
    /// effect provably never landed.
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One logical monetary operation.
///
/// A transfer is a single row seen from the source account, with the
/// destination linked through `counterparty_id`; the destination-side effect
/// never gets a row of its own, so audits count each movement once.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub kind: OperationKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    /// Set on compensating credits, pointing at the transfer they reverse.
    pub reversal_of: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        account_id: AccountId,
        kind: OperationKind,
        amount: Amount,
    ) -> Self {
        Self {
            id,
            account_id,
            counterparty_id: None,
            kind,
            amount,
            status: TransactionStatus::Pending,
            reversal_of: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_counterparty(mut self, counterparty: AccountId) -> Self {
        self.counterparty_id = Some(counterparty);
        self
    }

    pub fn as_reversal_of(mut self, original: &TransactionId) -> Self {
        self.reversal_of = Some(original.clone());
        self
    }
}

/// Append-only status transition stored by the transaction log.
///
/// History is never rewritten: the current view of a transaction is the fold
/// of its events, and every transition stays visible to audits.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn now(transaction_id: TransactionId, status: TransactionStatus) -> Self {
        Self {
            transaction_id,
            status,
            at: Utc::now(),
        }
    }
}
