#![allow(dead_code)]

use async_trait::async_trait;
use benki::application::engine::{LedgerEngine, RetryPolicy};
use benki::domain::account::{Account, AccountId, BalanceDelta, Currency, OwnerId};
use benki::domain::ports::AccountStore;
use benki::domain::transaction::TransactionId;
use benki::error::{LedgerError, Result};
use benki::infrastructure::in_memory::{InMemoryAccountStore, InMemoryTransactionLog};
use rust_decimal::Decimal;
use std::time::Duration;

pub fn kes() -> Currency {
    Currency::new("KES").unwrap()
}

pub fn engine() -> LedgerEngine {
    LedgerEngine::new(
        Box::new(InMemoryAccountStore::new()),
        Box::new(InMemoryTransactionLog::new()),
    )
}

/// Engine plus handles on its shared stores, for tests that need to poke at
/// store state directly (the in-memory adapters share state across clones).
pub fn engine_with_stores() -> (LedgerEngine, InMemoryAccountStore, InMemoryTransactionLog) {
    let accounts = InMemoryAccountStore::new();
    let log = InMemoryTransactionLog::new();
    let engine = LedgerEngine::new(Box::new(accounts.clone()), Box::new(log.clone()))
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        });
    (engine, accounts, log)
}

pub async fn open_funded(
    engine: &LedgerEngine,
    owner: &OwnerId,
    id: &str,
    balance: Decimal,
) -> Account {
    let account = engine
        .open_account_as(AccountId::from(id), owner, kes())
        .await
        .unwrap();
    engine
        .deposit(owner, account.id.clone(), balance, None)
        .await
        .unwrap();
    account
}

pub async fn balance_of(engine: &LedgerEngine, id: &AccountId) -> Decimal {
    engine
        .list_accounts()
        .await
        .unwrap()
        .into_iter()
        .find(|a| &a.id == id)
        .expect("account missing")
        .balance
        .0
}

/// Account store wrapper that rejects credits to one account with a
/// transient error, to force a transfer's credit leg to fail after the
/// debit has landed.
pub struct CreditOutage {
    pub inner: InMemoryAccountStore,
    pub deny_credits_to: AccountId,
}

#[async_trait]
impl AccountStore for CreditOutage {
    async fn create(&self, account: Account) -> Result<Account> {
        self.inner.create(account).await
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        self.inner.get(id).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.inner.all_accounts().await
    }

    async fn conditional_update(
        &self,
        id: &AccountId,
        expected_version: u64,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account> {
        if id == &self.deny_credits_to && matches!(delta, BalanceDelta::Credit(_)) {
            return Err(LedgerError::StoreUnavailable("credit outage".into()));
        }
        self.inner
            .conditional_update(id, expected_version, delta, tx_id)
            .await
    }

    async fn was_applied(&self, id: &AccountId, tx_id: &TransactionId) -> Result<bool> {
        self.inner.was_applied(id, tx_id).await
    }

    async fn retire(&self, id: &AccountId) -> Result<Account> {
        self.inner.retire(id).await
    }
}
