use crate::application::transfer::TransferCoordinator;
use crate::domain::account::{
    Account, AccountId, Amount, BalanceDelta, Currency, OwnerId,
};
use crate::domain::ports::{
    AccountStoreBox, Cursor, Recorded, TransactionLogBox, TransactionPage,
};
use crate::domain::transaction::{
    OperationKind, Transaction, TransactionId, TransactionStatus,
};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry for transient store failures (`Conflict`,
/// `StoreUnavailable`). Delay doubles per attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt; doubles per attempt, capped at 64x the
    /// base so large attempt budgets stay responsive.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1).min(6))
    }
}

/// A caller-presented operation: kind, account id(s), amount and an optional
/// idempotence key. One request shape for all three operation kinds keeps the
/// engine to a single code path.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub amount: Decimal,
    pub idempotence_key: Option<TransactionId>,
}

/// The entry point for all balance-changing operations.
///
/// The engine owns every write to accounts and to the transaction log. Each
/// accepted operation is recorded `Pending` before any balance effect,
/// applied through the store's atomic conditional update, and resolved to a
/// terminal status before the caller gets a result. Locking lives in the
/// store as optimistic version checks, never as in-process mutexes held
/// across I/O, so engine instances can be scaled out.
pub struct LedgerEngine {
    pub(crate) accounts: AccountStoreBox,
    pub(crate) log: TransactionLogBox,
    pub(crate) retry: RetryPolicy,
}

impl LedgerEngine {
    pub fn new(accounts: AccountStoreBox, log: TransactionLogBox) -> Self {
        Self {
            accounts,
            log,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Opens an account with a generated id. Accounts always start empty.
    pub async fn open_account(&self, owner: &OwnerId, currency: Currency) -> Result<Account> {
        self.open_account_as(AccountId::generate(), owner, currency).await
    }

    /// Opens an account under a caller-chosen id.
    pub async fn open_account_as(
        &self,
        id: AccountId,
        owner: &OwnerId,
        currency: Currency,
    ) -> Result<Account> {
        let account = Account::open(id, owner.clone(), currency);
        debug!(account = %account.id, owner = %owner, %currency, "opening account");
        self.accounts.create(account).await
    }

    /// Soft-retires an account owned by `principal`. The record and its
    /// history stay in place; new operations are refused.
    pub async fn retire_account(&self, principal: &OwnerId, id: &AccountId) -> Result<Account> {
        let account = self.resolve_account(id).await?;
        self.check_ownership(principal, &account)?;
        self.accounts.retire(id).await
    }

    pub async fn deposit(
        &self,
        principal: &OwnerId,
        account_id: AccountId,
        amount: Decimal,
        idempotence_key: Option<TransactionId>,
    ) -> Result<Transaction> {
        self.submit(
            principal,
            OperationRequest {
                kind: OperationKind::Deposit,
                account_id,
                counterparty_id: None,
                amount,
                idempotence_key,
            },
        )
        .await
    }

    pub async fn withdraw(
        &self,
        principal: &OwnerId,
        account_id: AccountId,
        amount: Decimal,
        idempotence_key: Option<TransactionId>,
    ) -> Result<Transaction> {
        self.submit(
            principal,
            OperationRequest {
                kind: OperationKind::Withdrawal,
                account_id,
                counterparty_id: None,
                amount,
                idempotence_key,
            },
        )
        .await
    }

    pub async fn transfer(
        &self,
        principal: &OwnerId,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        idempotence_key: Option<TransactionId>,
    ) -> Result<Transaction> {
        self.submit(
            principal,
            OperationRequest {
                kind: OperationKind::Transfer,
                account_id: source,
                counterparty_id: Some(destination),
                amount,
                idempotence_key,
            },
        )
        .await
    }

    /// Processes one operation end to end.
    ///
    /// Replaying an idempotence key the log already holds returns the
    /// existing record without a second balance effect — including a still
    /// `Pending` one, which a timed-out caller should poll via
    /// [`transaction_status`](Self::transaction_status) instead of
    /// resubmitting blindly.
    pub async fn submit(
        &self,
        principal: &OwnerId,
        request: OperationRequest,
    ) -> Result<Transaction> {
        // A non-positive amount cannot produce a well-formed transaction,
        // so it is the one rejection that never reaches the log.
        let amount = Amount::new(request.amount)?;

        let id = request
            .idempotence_key
            .unwrap_or_else(TransactionId::generate);
        let mut tx = Transaction::new(id, request.account_id, request.kind, amount);
        if request.kind == OperationKind::Transfer {
            let destination = request.counterparty_id.ok_or_else(|| {
                LedgerError::InvalidTransfer("destination account is required".into())
            })?;
            tx = tx.with_counterparty(destination);
        }

        let tx = match self.log.record(tx).await? {
            Recorded::Existing(existing) => {
                debug!(tx = %existing.id, status = ?existing.status, "idempotent replay");
                return Ok(existing);
            }
            Recorded::Fresh(tx) => tx,
        };

        let outcome = match tx.kind {
            OperationKind::Deposit => {
                self.apply_single(principal, &tx, BalanceDelta::Credit(tx.amount))
                    .await
            }
            OperationKind::Withdrawal => {
                self.apply_single(principal, &tx, BalanceDelta::Debit(tx.amount))
                    .await
            }
            OperationKind::Transfer => TransferCoordinator::new(self).run(principal, &tx).await,
        };

        match outcome {
            Ok(()) => self.log.update(&tx.id, TransactionStatus::Completed).await,
            Err(e @ LedgerError::Inconsistent(_)) => {
                // Outcome genuinely unknown: the transaction stays Pending
                // for the reconciliation pass, never guessed terminal.
                Err(e)
            }
            Err(e) => {
                self.log.update(&tx.id, TransactionStatus::Failed).await?;
                Err(e)
            }
        }
    }

    /// Current view of a transaction, for callers whose wait timed out.
    pub async fn transaction_status(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.log.get(id).await
    }

    /// Terminal-status history of an account, newest first and restartable
    /// via the returned cursor.
    pub async fn statement(
        &self,
        principal: &OwnerId,
        account_id: &AccountId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        // History stays readable after retirement; only mutations are refused.
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        self.check_ownership(principal, &account)?;
        self.log.list_by_account(account_id, cursor, limit).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.accounts.all_accounts().await
    }

    async fn apply_single(
        &self,
        principal: &OwnerId,
        tx: &Transaction,
        delta: BalanceDelta,
    ) -> Result<()> {
        let account = self.resolve_account(&tx.account_id).await?;
        self.check_ownership(principal, &account)?;
        self.apply_with_retry(&tx.account_id, delta, &tx.id).await?;
        Ok(())
    }

    /// Applies one delta through the store's atomic conditional update,
    /// retrying transient failures under the engine's bounded policy. On a
    /// version conflict the balance is re-read and re-validated, so a debit
    /// that raced past its funds check still loses.
    pub(crate) async fn apply_with_retry(
        &self,
        account_id: &AccountId,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account> {
        let mut attempt = 1;
        loop {
            match self.try_apply(account_id, delta, tx_id).await {
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        account = %account_id,
                        tx = %tx_id,
                        attempt,
                        error = %e,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_apply(
        &self,
        account_id: &AccountId,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account> {
        let account = self.resolve_account(account_id).await?;
        if let BalanceDelta::Debit(amount) = delta
            && !account.balance.covers(amount)
        {
            return Err(LedgerError::InsufficientFunds(account_id.to_string()));
        }
        self.accounts
            .conditional_update(account_id, account.version, delta, tx_id)
            .await
    }

    pub(crate) async fn resolve_account(&self, id: &AccountId) -> Result<Account> {
        self.accounts
            .get(id)
            .await?
            .filter(Account::is_active)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    pub(crate) fn check_ownership(&self, principal: &OwnerId, account: &Account) -> Result<()> {
        if account.is_owned_by(principal) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                principal: principal.to_string(),
                account: account.id.to_string(),
            })
        }
    }
}
