use benki::application::engine::LedgerEngine;
use benki::application::reconcile::Reconciler;
use benki::domain::account::{AccountId, Currency, OwnerId};
use benki::domain::ports::{AccountStoreBox, TransactionLogBox};
use benki::domain::transaction::TransactionId;
use benki::error::LedgerError;
use benki::infrastructure::in_memory::{InMemoryAccountStore, InMemoryTransactionLog};
#[cfg(feature = "storage-rocksdb")]
use benki::infrastructure::rocksdb::RocksDbStore;
use benki::interfaces::csv::account_writer::AccountWriter;
use benki::interfaces::csv::operation_reader::{OpType, OperationReader, OperationRecord};
use chrono::Duration;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Run a reconciliation pass after processing the batch.
    #[arg(long)]
    reconcile: bool,
}

#[cfg_attr(not(feature = "storage-rocksdb"), allow(unused_variables))]
fn build_engine(cli: &Cli) -> Result<LedgerEngine> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        let store = RocksDbStore::open(db_path).into_diagnostic()?;
        let accounts: AccountStoreBox = Box::new(store.clone());
        let log: TransactionLogBox = Box::new(store);
        return Ok(LedgerEngine::new(accounts, log));
    }

    let accounts: AccountStoreBox = Box::new(InMemoryAccountStore::new());
    let log: TransactionLogBox = Box::new(InMemoryTransactionLog::new());
    Ok(LedgerEngine::new(accounts, log))
}

async fn apply(engine: &LedgerEngine, record: OperationRecord) -> benki::error::Result<()> {
    let principal = OwnerId(record.owner);
    let account = AccountId(record.account);
    let key = record.key.map(TransactionId);

    match record.r#type {
        OpType::Open => {
            let code = record
                .currency
                .ok_or_else(|| LedgerError::Validation("open requires a currency".into()))?;
            engine
                .open_account_as(account, &principal, Currency::new(&code)?)
                .await?;
        }
        OpType::Retire => {
            engine.retire_account(&principal, &account).await?;
        }
        OpType::Deposit => {
            let amount = record
                .amount
                .ok_or_else(|| LedgerError::Validation("deposit requires an amount".into()))?;
            engine.deposit(&principal, account, amount, key).await?;
        }
        OpType::Withdrawal => {
            let amount = record
                .amount
                .ok_or_else(|| LedgerError::Validation("withdrawal requires an amount".into()))?;
            engine.withdraw(&principal, account, amount, key).await?;
        }
        OpType::Transfer => {
            let amount = record
                .amount
                .ok_or_else(|| LedgerError::Validation("transfer requires an amount".into()))?;
            let destination = record.to.ok_or_else(|| {
                LedgerError::InvalidTransfer("destination account is required".into())
            })?;
            engine
                .transfer(&principal, account, AccountId(destination), amount, key)
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli)?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for result in reader.operations() {
        match result {
            Ok(record) => {
                if let Err(e) = apply(&engine, record).await {
                    eprintln!("Error processing operation: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {e}");
            }
        }
    }

    if cli.reconcile {
        let report = Reconciler::new(&engine, Duration::zero())
            .run()
            .await
            .into_diagnostic()?;
        eprintln!("{report}");
    }

    let accounts = engine.list_accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
