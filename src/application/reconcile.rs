use crate::application::engine::LedgerEngine;
use crate::application::transfer::TransferCoordinator;
use crate::domain::account::BalanceDelta;
use crate::domain::transaction::{OperationKind, Transaction, TransactionStatus};
use crate::error::Result;
use chrono::{Duration, Utc};
use std::fmt;
use tracing::info;

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ReconcileReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reconciled {} transactions ({} completed, {} failed, {} cancelled)",
            self.total(),
            self.completed,
            self.failed,
            self.cancelled
        )
    }
}

/// Resolves transactions stuck `Pending` past a grace period.
///
/// A stuck entry is never guessed terminal: the store's applied-markers say
/// whether each balance effect actually landed, and the verdict follows from
/// that alone. The pass is idempotent — markers, deterministic reversal ids
/// and the log's idempotent `record` make re-running it safe.
pub struct Reconciler<'a> {
    engine: &'a LedgerEngine,
    grace: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(engine: &'a LedgerEngine, grace: Duration) -> Self {
        Self { engine, grace }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let cutoff = Utc::now() - self.grace;
        let stuck = self.engine.log.pending_older_than(cutoff).await?;
        let mut report = ReconcileReport::default();

        for tx in stuck {
            // An earlier entry in this pass may already have resolved this
            // one (a transfer resolving its own reversal); work from the
            // current view.
            let Some(current) = self.engine.log.get(&tx.id).await? else {
                continue;
            };
            if current.status.is_terminal() {
                continue;
            }

            match current.kind {
                OperationKind::Deposit | OperationKind::Withdrawal => {
                    self.resolve_single(&current, &mut report).await?;
                }
                OperationKind::Transfer => {
                    self.resolve_transfer(&current, &mut report).await?;
                }
            }
        }

        if report.total() > 0 {
            info!(%report, "reconciliation pass finished");
        }
        Ok(report)
    }

    async fn resolve_single(&self, tx: &Transaction, report: &mut ReconcileReport) -> Result<()> {
        if tx.reversal_of.is_some() {
            return self.finish_reversal(tx, report).await;
        }
        if self.engine.accounts.was_applied(&tx.account_id, &tx.id).await? {
            self.engine
                .log
                .update(&tx.id, TransactionStatus::Completed)
                .await?;
            report.completed += 1;
        } else {
            // The effect never landed and the bounded retry window is long
            // past; the attempt is abandoned.
            self.engine
                .log
                .update(&tx.id, TransactionStatus::Cancelled)
                .await?;
            report.cancelled += 1;
        }
        Ok(())
    }

    /// A reversal stuck `Pending` means the compensating credit may not have
    /// been applied; apply it (idempotently) and complete the record.
    async fn finish_reversal(&self, tx: &Transaction, report: &mut ReconcileReport) -> Result<()> {
        if !self.engine.accounts.was_applied(&tx.account_id, &tx.id).await? {
            self.engine
                .apply_with_retry(&tx.account_id, BalanceDelta::Credit(tx.amount), &tx.id)
                .await?;
        }
        self.engine
            .log
            .update(&tx.id, TransactionStatus::Completed)
            .await?;
        report.completed += 1;
        Ok(())
    }

    async fn resolve_transfer(&self, tx: &Transaction, report: &mut ReconcileReport) -> Result<()> {
        let debited = self.engine.accounts.was_applied(&tx.account_id, &tx.id).await?;
        let credited = match &tx.counterparty_id {
            Some(destination) => self.engine.accounts.was_applied(destination, &tx.id).await?,
            None => false,
        };

        match (debited, credited) {
            (true, true) => {
                self.engine
                    .log
                    .update(&tx.id, TransactionStatus::Completed)
                    .await?;
                report.completed += 1;
            }
            (true, false) => {
                TransferCoordinator::new(self.engine).compensate(tx).await?;
                self.engine
                    .log
                    .update(&tx.id, TransactionStatus::Failed)
                    .await?;
                report.failed += 1;
            }
            (false, _) => {
                self.engine
                    .log
                    .update(&tx.id, TransactionStatus::Cancelled)
                    .await?;
                report.cancelled += 1;
            }
        }
        Ok(())
    }
}
