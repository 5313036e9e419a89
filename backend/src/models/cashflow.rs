//! Cashflows and cashflow batches: the transfer instructions sent to
//! the bank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{BankAccountId, CashflowBatchId, CashflowId};
use super::money::Cents;

/// Prefix of batch labels: VIR1, VIR2, ...
pub const CASHFLOW_BATCH_LABEL_PREFIX: &str = "VIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashflowStatus {
    /// Created by the batcher; waiting for the external approval step.
    PendingAcceptance,
    Accepted,
    Rejected,
}

/// One dated, labeled batcher run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashflowBatch {
    id: CashflowBatchId,
    label: String,
    /// Only pricings with `value_date < cutoff` entered the batch.
    cutoff: DateTime<Utc>,
    creation_date: DateTime<Utc>,
}

impl CashflowBatch {
    pub(crate) fn new(
        id: CashflowBatchId,
        label: String,
        cutoff: DateTime<Utc>,
        creation_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            label,
            cutoff,
            creation_date,
        }
    }

    pub fn id(&self) -> CashflowBatchId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashflowLogReason {
    AcceptCashflow,
    RejectCashflow,
    GenerateInvoice,
}

/// One audit entry of a cashflow, kept on the row forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashflowLog {
    pub timestamp: DateTime<Utc>,
    pub status_before: CashflowStatus,
    pub status_after: CashflowStatus,
    pub reason: CashflowLogReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CashflowError {
    #[error("cashflow {id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: CashflowId,
        from: CashflowStatus,
        to: CashflowStatus,
    },
}

/// The summed amount owed to one bank account within one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cashflow {
    id: CashflowId,
    batch_id: CashflowBatchId,
    bank_account_id: BankAccountId,
    /// Always negative: a cashflow only exists when we owe the payee.
    amount: Cents,
    status: CashflowStatus,
    creation_date: DateTime<Utc>,
    logs: Vec<CashflowLog>,
}

impl Cashflow {
    pub(crate) fn new(
        id: CashflowId,
        batch_id: CashflowBatchId,
        bank_account_id: BankAccountId,
        amount: Cents,
        creation_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            batch_id,
            bank_account_id,
            amount,
            status: CashflowStatus::PendingAcceptance,
            creation_date,
            logs: Vec::new(),
        }
    }

    pub fn id(&self) -> CashflowId {
        self.id
    }

    pub fn batch_id(&self) -> CashflowBatchId {
        self.batch_id
    }

    pub fn bank_account_id(&self) -> BankAccountId {
        self.bank_account_id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn status(&self) -> CashflowStatus {
        self.status
    }

    pub fn logs(&self) -> &[CashflowLog] {
        &self.logs
    }

    fn transition(
        &mut self,
        to: CashflowStatus,
        reason: CashflowLogReason,
        now: DateTime<Utc>,
    ) -> Result<(), CashflowError> {
        if self.status != CashflowStatus::PendingAcceptance {
            return Err(CashflowError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.logs.push(CashflowLog {
            timestamp: now,
            status_before: self.status,
            status_after: to,
            reason,
        });
        self.status = to;
        Ok(())
    }

    /// PENDING_ACCEPTANCE -> ACCEPTED (bank file approved).
    pub(crate) fn accept(&mut self, now: DateTime<Utc>) -> Result<(), CashflowError> {
        self.transition(CashflowStatus::Accepted, CashflowLogReason::AcceptCashflow, now)
    }

    /// PENDING_ACCEPTANCE -> REJECTED (bank refused the transfer).
    pub(crate) fn reject(&mut self, now: DateTime<Utc>) -> Result<(), CashflowError> {
        self.transition(CashflowStatus::Rejected, CashflowLogReason::RejectCashflow, now)
    }

    /// Audit entry written when an invoice settles this cashflow. Not a
    /// status change; the invoice link carries the settlement itself.
    pub(crate) fn log_settlement(&mut self, now: DateTime<Utc>) {
        self.logs.push(CashflowLog {
            timestamp: now,
            status_before: self.status,
            status_after: self.status,
            reason: CashflowLogReason::GenerateInvoice,
        });
    }
}
