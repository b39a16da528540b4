use crate::domain::account::{Account, AccountId, AccountStatus, BalanceDelta};
use crate::domain::ports::{AccountStore, Cursor, Recorded, TransactionLog, TransactionPage};
use crate::domain::transaction::{
    Transaction, TransactionEvent, TransactionId, TransactionStatus,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for account records.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for `(account, transaction)` applied-markers.
pub const CF_APPLIED: &str = "applied";
/// Column Family for append-only transaction status events.
pub const CF_EVENTS: &str = "events";
/// Column Family for the folded current view of each transaction.
pub const CF_VIEWS: &str = "views";
/// Column Family indexing transactions per account in time order.
pub const CF_ACCOUNT_INDEX: &str = "account_index";

/// A persistent store implementation using RocksDB.
///
/// Implements both the account store and the transaction log over separate
/// column families, with `serde_json` values. Event and marker families are
/// append-only; `views` is a derived cache of the folded event history.
///
/// RocksDB has no native compare-and-set, so `conditional_update` serializes
/// its read-check-write under a single-process writer lock and commits the
/// account record and the applied-marker in one `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`s).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

/// Key separator; account ids and transaction ids never contain NUL.
const SEP: u8 = 0;

fn index_key(account: &AccountId, at: DateTime<Utc>, tx: &TransactionId) -> Vec<u8> {
    let mut key = account.0.as_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(&at.timestamp_micros().to_be_bytes());
    key.extend_from_slice(tx.0.as_bytes());
    key
}

fn marker_key(account: &AccountId, tx: &TransactionId) -> Vec<u8> {
    let mut key = account.0.as_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(tx.0.as_bytes());
    key
}

fn event_key(tx: &TransactionId, seq: u64) -> Vec<u8> {
    let mut key = tx.0.as_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Index keys contain raw timestamp bytes, so cursors are hex-encoded.
fn encode_cursor(key: &[u8]) -> Cursor {
    Cursor(key.iter().map(|b| format!("{b:02x}")).collect())
}

fn decode_cursor(cursor: &Cursor) -> Result<Vec<u8>> {
    if cursor.0.len() % 2 != 0 {
        return Err(LedgerError::Internal(Box::new(std::io::Error::other(
            "malformed cursor",
        ))));
    }
    (0..cursor.0.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cursor.0[i..i + 2], 16)
                .map_err(|e| LedgerError::Internal(Box::new(e)))
        })
        .collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| LedgerError::Internal(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::Internal(Box::new(e)))
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ACCOUNTS, CF_APPLIED, CF_EVENTS, CF_VIEWS, CF_ACCOUNT_INDEX]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::Internal(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.0.as_bytes())? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_view(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_VIEWS)?;
        match self.db.get_cf(cf, id.0.as_bytes())? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_event_seq(&self, id: &TransactionId) -> Result<u64> {
        let cf = self.cf(CF_EVENTS)?;
        let mut prefix = id.0.as_bytes().to_vec();
        prefix.push(SEP);
        let mut seq = 0;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            seq += 1;
        }
        Ok(seq)
    }
}

#[async_trait]
impl AccountStore for RocksDbStore {
    async fn create(&self, account: Account) -> Result<Account> {
        let _guard = self.write_lock.lock().await;
        if self.get_account(&account.id)?.is_some() {
            return Err(LedgerError::Internal(Box::new(std::io::Error::other(
                format!("account {} already exists", account.id),
            ))));
        }
        let cf = self.cf(CF_ACCOUNTS)?;
        self.db
            .put_cf(cf, account.id.0.as_bytes(), to_json(&account)?)?;
        Ok(account)
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        self.get_account(id)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            accounts.push(from_json(&value)?);
        }
        Ok(accounts)
    }

    async fn conditional_update(
        &self,
        id: &AccountId,
        expected_version: u64,
        delta: BalanceDelta,
        tx_id: &TransactionId,
    ) -> Result<Account> {
        let _guard = self.write_lock.lock().await;

        let marker = marker_key(id, tx_id);
        let applied_cf = self.cf(CF_APPLIED)?;
        if self.db.get_pinned_cf(applied_cf, &marker)?.is_some() {
            // Replay of an already-applied transaction: no-op success.
            return self
                .get_account(id)?
                .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()));
        }

        let mut account = self
            .get_account(id)?
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

        // Record and marker commit together or not at all.
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ACCOUNTS)?, id.0.as_bytes(), to_json(&account)?);
        batch.put_cf(applied_cf, &marker, []);
        self.db.write(batch)?;
        Ok(account)
    }

    async fn was_applied(&self, id: &AccountId, tx_id: &TransactionId) -> Result<bool> {
        let cf = self.cf(CF_APPLIED)?;
        Ok(self.db.get_pinned_cf(cf, marker_key(id, tx_id))?.is_some())
    }

    async fn retire(&self, id: &AccountId) -> Result<Account> {
        let _guard = self.write_lock.lock().await;
        let mut account = self
            .get_account(id)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        account.status = AccountStatus::Retired;
        let cf = self.cf(CF_ACCOUNTS)?;
        self.db.put_cf(cf, id.0.as_bytes(), to_json(&account)?)?;
        Ok(account)
    }
}

#[async_trait]
impl TransactionLog for RocksDbStore {
    async fn record(&self, tx: Transaction) -> Result<Recorded> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.get_view(&tx.id)? {
            return Ok(Recorded::Existing(existing));
        }

        let event = TransactionEvent {
            transaction_id: tx.id.clone(),
            status: tx.status,
            at: tx.created_at,
        };
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_VIEWS)?, tx.id.0.as_bytes(), to_json(&tx)?);
        batch.put_cf(self.cf(CF_EVENTS)?, event_key(&tx.id, 0), to_json(&event)?);

        let index_cf = self.cf(CF_ACCOUNT_INDEX)?;
        batch.put_cf(
            index_cf,
            index_key(&tx.account_id, tx.created_at, &tx.id),
            tx.id.0.as_bytes(),
        );
        if let Some(counterparty) = &tx.counterparty_id {
            batch.put_cf(
                index_cf,
                index_key(counterparty, tx.created_at, &tx.id),
                tx.id.0.as_bytes(),
            );
        }
        self.db.write(batch)?;
        Ok(Recorded::Fresh(tx))
    }

    async fn update(&self, id: &TransactionId, status: TransactionStatus) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        let mut view = self.get_view(id)?.ok_or_else(|| {
            LedgerError::Internal(Box::new(std::io::Error::other(format!(
                "status update for unrecorded transaction {id}"
            ))))
        })?;

        let event = TransactionEvent::now(id.clone(), status);
        view.status = status;
        view.completed_at = status.is_terminal().then_some(event.at);

        let seq = self.next_event_seq(id)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_EVENTS)?, event_key(id, seq), to_json(&event)?);
        batch.put_cf(self.cf(CF_VIEWS)?, id.0.as_bytes(), to_json(&view)?);
        self.db.write(batch)?;
        Ok(view)
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.get_view(id)
    }

    async fn list_by_account(
        &self,
        account: &AccountId,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        let cf = self.cf(CF_ACCOUNT_INDEX)?;
        let mut prefix = account.0.as_bytes().to_vec();
        prefix.push(SEP);

        // Reverse scan (newest first), starting just past the prefix or,
        // when resuming, at the cursor key inclusive.
        let start = match &cursor {
            Some(c) => decode_cursor(c)?,
            None => {
                let mut k = account.0.as_bytes().to_vec();
                k.push(SEP + 1);
                k
            }
        };

        let mut transactions = Vec::new();
        let mut next = None;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if transactions.len() == limit {
                next = Some(encode_cursor(&key));
                break;
            }
            let tx_id = TransactionId(String::from_utf8_lossy(&value).into_owned());
            if let Some(view) = self.get_view(&tx_id)?
                && view.status.is_terminal()
            {
                transactions.push(view);
            }
        }
        Ok(TransactionPage { transactions, next })
    }

    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let cf = self.cf(CF_VIEWS)?;
        let mut pending: Vec<Transaction> = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let tx: Transaction = from_json(&value)?;
            if tx.status == TransactionStatus::Pending && tx.created_at <= cutoff {
                pending.push(tx);
            }
        }
        pending.sort_by_key(|tx| tx.created_at);
        Ok(pending)
    }
}
