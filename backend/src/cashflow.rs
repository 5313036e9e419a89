//! The cashflow batcher: groups VALIDATED pricings by payee bank
//! account into transfer instructions under a dated, labeled batch.
//!
//! A run is cut in two kinds of atomic scopes. The batch row is
//! created first, alone, so its label is taken even if every payee
//! then fails. Each payee is then processed in its own scope: linking
//! the pricings to a cashflow and flipping them to PROCESSED commit
//! together, and one bad payee never poisons the others.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::atomic::{AtomicTx, LedgerError};
use crate::models::money::Cents;
use crate::models::{
    BankAccountId, CashflowBatchId, CashflowId, PricingId, PricingLineCategory, PricingStatus,
    CASHFLOW_BATCH_LABEL_PREFIX,
};
use crate::store::{Ledger, LedgerState};

/// Outcome of one batcher run.
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: CashflowBatchId,
    pub label: String,
    pub cashflow_ids: Vec<CashflowId>,
    /// Payees skipped in this run, with the reason. Their pricings
    /// stay VALIDATED and are retried on the next run.
    pub skipped_payees: Vec<(BankAccountId, String)>,
}

/// The next label in the VIR sequence: one past the highest issued.
pub fn next_batch_label(state: &LedgerState) -> String {
    let highest = state
        .cashflow_batches()
        .filter_map(|batch| {
            batch
                .label()
                .strip_prefix(CASHFLOW_BATCH_LABEL_PREFIX)?
                .parse::<u64>()
                .ok()
        })
        .max()
        .unwrap_or(0);
    format!("{}{}", CASHFLOW_BATCH_LABEL_PREFIX, highest + 1)
}

/// Run the batcher: create the batch row, then one cashflow per payee
/// owed money by the VALIDATED pricings dated before `cutoff`.
pub fn generate_batch(
    ledger: &mut Ledger,
    label: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<BatchReport, LedgerError> {
    let label_owned = label.to_string();
    let batch_id = ledger.atomic(move |tx| {
        if tx.cashflow_batch_by_label(&label_owned).is_some() {
            return Err(LedgerError::DuplicateBatchLabel(label_owned));
        }
        Ok(tx.insert_cashflow_batch(label_owned.clone(), cutoff, now))
    })?;

    let mut report = BatchReport {
        batch_id,
        label: label.to_string(),
        cashflow_ids: Vec::new(),
        skipped_payees: Vec::new(),
    };
    for (bank_account_id, pricing_ids) in eligible_pricings_by_payee(ledger.state(), cutoff) {
        let result = ledger.atomic(|tx| {
            make_payee_cashflow(tx, batch_id, bank_account_id, &pricing_ids, now)
        });
        match result {
            Ok(Some(cashflow_id)) => report.cashflow_ids.push(cashflow_id),
            Ok(None) => {} // nothing owed to this payee
            Err(error) => {
                warn!(bank_account = %bank_account_id, error = %error,
                    "skipping payee; its pricings stay validated");
                report.skipped_payees.push((bank_account_id, error.to_string()));
            }
        }
    }
    info!(
        batch = %report.label,
        cashflows = report.cashflow_ids.len(),
        skipped = report.skipped_payees.len(),
        "generated cashflow batch"
    );
    Ok(report)
}

/// VALIDATED pricings dated before the cutoff whose venue has a
/// payable bank account, grouped by that account. Deterministic order:
/// the map is keyed by account id, the pricings by their id.
fn eligible_pricings_by_payee(
    state: &LedgerState,
    cutoff: DateTime<Utc>,
) -> std::collections::BTreeMap<BankAccountId, Vec<PricingId>> {
    let mut by_payee: std::collections::BTreeMap<BankAccountId, Vec<PricingId>> =
        std::collections::BTreeMap::new();
    for pricing in state.pricings() {
        if pricing.status() != PricingStatus::Validated || pricing.value_date() >= cutoff {
            continue;
        }
        // an event offer is only payable once it has taken place
        let stock_event = pricing
            .booking_id()
            .and_then(|booking_id| state.booking(booking_id))
            .and_then(|booking| state.stock(booking.stock_id()))
            .and_then(|stock| stock.event_datetime());
        if matches!(stock_event, Some(date) if date >= cutoff) {
            continue;
        }
        let Some(bank_account_id) = state
            .venue(pricing.venue_id())
            .and_then(|venue| venue.bank_account())
        else {
            continue;
        };
        let payable = state
            .bank_account(bank_account_id)
            .map(|account| account.is_payable())
            .unwrap_or(false);
        if !payable {
            continue;
        }
        by_payee.entry(bank_account_id).or_default().push(pricing.id());
    }
    by_payee
}

/// One payee: check the pricings are still sane, sum them, create the
/// cashflow and flip them to PROCESSED. Returns `None` when the payee
/// total is zero or positive (nothing to transfer; debit notes are
/// handled outside the core).
fn make_payee_cashflow(
    tx: &mut AtomicTx,
    batch_id: CashflowBatchId,
    bank_account_id: BankAccountId,
    pricing_ids: &[PricingId],
    now: DateTime<Utc>,
) -> Result<Option<CashflowId>, LedgerError> {
    let mut total: Cents = 0;
    for &pricing_id in pricing_ids {
        let pricing = tx.pricing(pricing_id).ok_or(LedgerError::UnknownId {
            entity: "pricing",
            id: pricing_id.0,
        })?;
        if let Some(booking_id) = pricing.booking_id() {
            let booking_total = tx
                .booking(booking_id)
                .map(|b| b.total_amount())
                .unwrap_or(0);
            if pricing.line_amount(PricingLineCategory::OffererRevenue) != -booking_total {
                return Err(LedgerError::PricingIntegrityMismatch { pricing: pricing_id });
            }
        }
        total += tx
            .pricing(pricing_id)
            .map(|p| p.amount())
            .unwrap_or(0);
    }
    if total >= 0 {
        return Ok(None);
    }

    let cashflow_id = tx.insert_cashflow(batch_id, bank_account_id, total, now);
    for &pricing_id in pricing_ids {
        tx.link_cashflow_pricing(cashflow_id, pricing_id);
        tx.pricing_mut(pricing_id)
            .ok_or(LedgerError::UnknownId {
                entity: "pricing",
                id: pricing_id.0,
            })?
            .mark_processed(now)?;
    }
    Ok(Some(cashflow_id))
}

/// External approval step: the bank file for this cashflow was
/// accepted.
pub fn accept_cashflow(
    ledger: &mut Ledger,
    cashflow_id: CashflowId,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    ledger.atomic(|tx| {
        tx.cashflow_mut(cashflow_id)
            .ok_or(LedgerError::UnknownId {
                entity: "cashflow",
                id: cashflow_id.0,
            })?
            .accept(now)?;
        Ok(())
    })
}

/// External approval step: the bank refused the transfer. The
/// cashflow's pricings revert to VALIDATED (each with a log entry) and
/// will enter a later batch, typically after the payee's bank details
/// are fixed.
pub fn reject_cashflow(
    ledger: &mut Ledger,
    cashflow_id: CashflowId,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    ledger.atomic(|tx| {
        tx.cashflow_mut(cashflow_id)
            .ok_or(LedgerError::UnknownId {
                entity: "cashflow",
                id: cashflow_id.0,
            })?
            .reject(now)?;
        for pricing_id in tx.pricing_ids_for_cashflow(cashflow_id) {
            let pricing = tx.pricing_mut(pricing_id).ok_or(LedgerError::UnknownId {
                entity: "pricing",
                id: pricing_id.0,
            })?;
            if pricing.status() == PricingStatus::Processed {
                pricing.revert_to_validated(now)?;
            }
        }
        Ok(())
    })
}

/// Accept every pending cashflow of a batch. Operational convenience
/// for the CLI; the real approval arrives per cashflow.
pub fn accept_batch(
    ledger: &mut Ledger,
    batch_id: CashflowBatchId,
    now: DateTime<Utc>,
) -> Result<usize, LedgerError> {
    ledger.atomic(|tx| {
        let pending: Vec<CashflowId> = tx
            .cashflows()
            .filter(|cf| {
                cf.batch_id() == batch_id
                    && cf.status() == crate::models::CashflowStatus::PendingAcceptance
            })
            .map(|cf| cf.id())
            .collect();
        for cashflow_id in &pending {
            tx.cashflow_mut(*cashflow_id)
                .ok_or(LedgerError::UnknownId {
                    entity: "cashflow",
                    id: cashflow_id.0,
                })?
                .accept(now)?;
        }
        Ok(pending.len())
    })
}
