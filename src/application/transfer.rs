use crate::application::engine::LedgerEngine;
use crate::domain::account::{AccountId, BalanceDelta, OwnerId};
use crate::domain::transaction::{
    OperationKind, Transaction, TransactionId, TransactionStatus,
};
use crate::error::{LedgerError, Result};
use tracing::{error, warn};

/// Sequences the two-account mutation of a transfer so it is all-or-nothing
/// from the caller's perspective.
///
/// The debit and credit legs target independently stored accounts, so strict
/// atomicity is approximated saga-style: a credit failure after a successful
/// debit triggers an explicit compensating credit back to the source,
/// recorded as its own linked transaction. Funds are never left debited
/// without either a completed credit or a visible reversal.
pub(crate) struct TransferCoordinator<'a> {
    engine: &'a LedgerEngine,
}

impl<'a> TransferCoordinator<'a> {
    pub(crate) fn new(engine: &'a LedgerEngine) -> Self {
        Self { engine }
    }

    /// Runs both legs of a recorded transfer. Returns `Ok(())` only once the
    /// debit and the credit are durably applied; any error before the debit
    /// leaves both accounts untouched.
    pub(crate) async fn run(&self, principal: &OwnerId, tx: &Transaction) -> Result<()> {
        let destination = self.validate(principal, tx).await?;

        self.engine
            .apply_with_retry(&tx.account_id, BalanceDelta::Debit(tx.amount), &tx.id)
            .await?;

        match self
            .engine
            .apply_with_retry(&destination, BalanceDelta::Credit(tx.amount), &tx.id)
            .await
        {
            Ok(_) => Ok(()),
            Err(credit_err) => {
                warn!(
                    tx = %tx.id,
                    source = %tx.account_id,
                    destination = %destination,
                    error = %credit_err,
                    "credit leg failed after debit, compensating"
                );
                self.compensate(tx).await?;
                Err(credit_err)
            }
        }
    }

    /// Existence, ownership, self-transfer and currency checks, strictly
    /// before any mutation.
    async fn validate(&self, principal: &OwnerId, tx: &Transaction) -> Result<AccountId> {
        let destination = tx
            .counterparty_id
            .clone()
            .ok_or_else(|| LedgerError::InvalidTransfer("destination account is required".into()))?;
        if destination == tx.account_id {
            return Err(LedgerError::InvalidTransfer(
                "source and destination are the same account".into(),
            ));
        }

        let source = self.engine.resolve_account(&tx.account_id).await?;
        self.engine.check_ownership(principal, &source)?;

        let dest = match self.engine.resolve_account(&destination).await {
            Ok(account) => account,
            Err(LedgerError::AccountNotFound(_)) => {
                return Err(LedgerError::InvalidTransfer(format!(
                    "destination account {destination} not found"
                )));
            }
            Err(e) => return Err(e),
        };
        if source.currency != dest.currency {
            return Err(LedgerError::InvalidTransfer(format!(
                "currency mismatch: {} vs {}",
                source.currency, dest.currency
            )));
        }
        Ok(destination)
    }

    /// Credits the debited amount back to the source and records the
    /// reversal as a linked transaction.
    ///
    /// The reversal id is derived deterministically from the original id, so
    /// replays (coordinator rerun, reconciler pass) collapse onto one
    /// reversal row and one balance effect. If the credit back cannot be
    /// applied either, both transactions stay `Pending` and the caller gets
    /// `Inconsistent`; the reconciliation pass finishes the job.
    pub(crate) async fn compensate(&self, tx: &Transaction) -> Result<()> {
        let reversal = Transaction::new(
            TransactionId::reversal_of(&tx.id),
            tx.account_id.clone(),
            OperationKind::Deposit,
            tx.amount,
        )
        .as_reversal_of(&tx.id);
        let reversal = self.engine.log.record(reversal).await?.into_inner();

        match self
            .engine
            .apply_with_retry(
                &tx.account_id,
                BalanceDelta::Credit(tx.amount),
                &reversal.id,
            )
            .await
        {
            Ok(_) => {
                self.engine
                    .log
                    .update(&reversal.id, TransactionStatus::Completed)
                    .await?;
                Ok(())
            }
            Err(e) => {
                error!(
                    tx = %tx.id,
                    reversal = %reversal.id,
                    error = %e,
                    "compensating credit failed, leaving transfer for reconciliation"
                );
                Err(LedgerError::Inconsistent(tx.id.to_string()))
            }
        }
    }
}
