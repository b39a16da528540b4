use crate::domain::account::{Account, AccountId, AccountStatus, BalanceDelta};
use crate::domain::ports::{AccountStore, Cursor, Recorded, TransactionLog, TransactionPage};
use crate::domain::transaction::{
    Transaction, TransactionEvent, TransactionId, TransactionStatus,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct AccountsInner {
    accounts: HashMap<AccountId, Account>,
    /// `(account, transaction)` pairs already applied; the idempotence marker
    /// behind `conditional_update` replay and `was_applied`.
    applied: HashSet<(AccountId, TransactionId)>,
}

/// A thread-safe in-memory account store.
///
/// All checks and the mutation inside `conditional_update` happen under one
/// write lock, which stands in for the single-row transaction a durable
/// store would use. `Clone` shares the underlying state.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    inner: Arc<RwLock<AccountsInner>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn create(&self, account: Account) -> Result<Account> {
        let mut inner = self.inner.write().await;
        if inner.accounts.contains_key(&account.id) {
            return Err(LedgerError::Internal(Box::new(std::io::Error::other(
                format!("account {} already exists", account.id),
            ))));
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(id).cloned())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().cloned().collect())
    }

    async fn conditional_update(
        &self,
        id: &AccountId,
        expected_version: u64,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account> {
        let mut inner = self.inner.write().await;

        let marker = (id.clone(), tx_id.clone());
        if inner.applied.contains(&marker) {
            // Replay of an already-applied transaction: no-op success.
            return inner
                .accounts
                .get(id)
                .cloned()
                .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()));
        }

        let account = inner
            .accounts
            .get_mut(id)
            .filter(|a| a.status == AccountStatus::Active)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;

        if account.version != expected_version {
            return Err(LedgerError::Conflict(id.to_string()));
        }

        match delta {
            BalanceDelta::Credit(amount) => account.balance += amount.into(),
            BalanceDelta::Debit(amount) => {
                if !account.balance.covers(amount) {
                    return Err(LedgerError::InsufficientFunds(id.to_string()));
                }
                account.balance -= amount.into();
            }
        }
        account.version += 1;
        let updated = account.clone();
        inner.applied.insert(marker);
        Ok(updated)
    }

    async fn was_applied(&self, id: &AccountId, tx_id: &TransactionId) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.applied.contains(&(id.clone(), tx_id.clone())))
    }

    async fn retire(&self, id: &AccountId) -> Result<Account> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        account.status = AccountStatus::Retired;
        Ok(account.clone())
    }
}

#[derive(Default)]
struct LogInner {
    /// Immutable payload of each recorded transaction.
    transactions: HashMap<TransactionId, Transaction>,
    /// Append-only status transitions per transaction.
    events: HashMap<TransactionId, Vec<TransactionEvent>>,
    /// Record-order index per account; transfers are indexed for both
    /// parties even though only one row exists.
    by_account: HashMap<AccountId, Vec<TransactionId>>,
}

impl LogInner {
    /// Current view of a transaction: its payload folded with the last
    /// recorded status transition.
    fn view(&self, id: &TransactionId) -> Option<Transaction> {
        let mut tx = self.transactions.get(id).cloned()?;
        if let Some(events) = self.events.get(id)
            && let Some(last) = events.last()
        {
            tx.status = last.status;
            tx.completed_at = last.status.is_terminal().then_some(last.at);
        }
        Some(tx)
    }
}

/// A thread-safe in-memory transaction log.
///
/// Status transitions are appended as events and never rewritten; the
/// visible `Transaction` is always a fold over its event list.
#[derive(Default, Clone)]
pub struct InMemoryTransactionLog {
    inner: Arc<RwLock<LogInner>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn record(&self, tx: Transaction) -> Result<Recorded> {
        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&tx.id) {
            let existing = inner
                .view(&tx.id)
                .ok_or_else(|| LedgerError::Inconsistent(tx.id.to_string()))?;
            return Ok(Recorded::Existing(existing));
        }

        inner
            .by_account
            .entry(tx.account_id.clone())
            .or_default()
            .push(tx.id.clone());
        if let Some(counterparty) = &tx.counterparty_id {
            inner
                .by_account
                .entry(counterparty.clone())
                .or_default()
                .push(tx.id.clone());
        }
        inner.events.insert(
            tx.id.clone(),
            vec![TransactionEvent {
                transaction_id: tx.id.clone(),
                status: tx.status,
                at: tx.created_at,
            }],
        );
        inner.transactions.insert(tx.id.clone(), tx.clone());
        Ok(Recorded::Fresh(tx))
    }

    async fn update(&self, id: &TransactionId, status: TransactionStatus) -> Result<Transaction> {
        let mut inner = self.inner.write().await;
        if !inner.transactions.contains_key(id) {
            return Err(LedgerError::Internal(Box::new(std::io::Error::other(
                format!("status update for unrecorded transaction {id}"),
            ))));
        }
        inner
            .events
            .entry(id.clone())
            .or_default()
            .push(TransactionEvent::now(id.clone(), status));
        inner
            .view(id)
            .ok_or_else(|| LedgerError::Inconsistent(id.to_string()))
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner.view(id))
    }

    async fn list_by_account(
        &self,
        account: &AccountId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        let inner = self.inner.read().await;
        let index = match inner.by_account.get(account) {
            Some(ids) => ids.as_slice(),
            None => {
                return Ok(TransactionPage {
                    transactions: Vec::new(),
                    next: None,
                });
            }
        };

        // The index grows append-only, so a position cursor stays valid
        // across pages; scanning runs newest-first from `start`.
        let start = match cursor {
            Some(Cursor(pos)) => pos
                .parse::<usize>()
                .map_err(|e| LedgerError::Internal(Box::new(e)))?,
            None => index.len(),
        };

        let mut transactions = Vec::new();
        let mut next = None;
        for pos in (0..start.min(index.len())).rev() {
            if transactions.len() == limit {
                next = Some(Cursor((pos + 1).to_string()));
                break;
            }
            if let Some(view) = inner.view(&index[pos])
                && view.status.is_terminal()
            {
                transactions.push(view);
            }
        }
        Ok(TransactionPage { transactions, next })
    }

    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Transaction> = inner
            .transactions
            .keys()
            .filter_map(|id| inner.view(id))
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at <= cutoff)
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        Ok(pending)
    }
}
