//! The invoice generator: one immutable invoice per payee, settling
//! the accepted cashflows of a batch.
//!
//! Everything state-bearing happens in one atomic scope per payee:
//! creating the invoice, linking its cashflows, flipping pricings to
//! INVOICED and bookings to REIMBURSED. Rendering and storing the
//! document, and notifying the export, happen after the commit; losing
//! them loses nothing that cannot be regenerated from the rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::atomic::{AtomicTx, LedgerError};
use crate::external::{BatchExportNotifier, InvoiceStorage};
use crate::models::invoice::storage_object_id;
use crate::models::money::{format_cents, Cents};
use crate::models::{
    BankAccountId, BookingStatus, CashflowBatchId, CashflowId, CustomRuleId, Invoice, InvoiceId,
    InvoiceLine, PricingId, PricingLineCategory, PricingStatus,
};
use crate::rules::{CustomRuleKind, RuleGroup, RuleRef};
use crate::store::Ledger;

/// Generate invoices for every payee with accepted, not yet invoiced
/// cashflows in the batch. Per-payee failures are logged and skipped;
/// the rest of the batch still goes through. Returns the invoices
/// created in this run.
pub fn generate_invoices(
    ledger: &mut Ledger,
    batch_id: CashflowBatchId,
    storage: &mut dyn InvoiceStorage,
    notifier: &mut dyn BatchExportNotifier,
    now: DateTime<Utc>,
) -> Result<Vec<InvoiceId>, LedgerError> {
    let label = ledger
        .state()
        .cashflow_batch(batch_id)
        .ok_or(LedgerError::UnknownId {
            entity: "cashflow batch",
            id: batch_id.0,
        })?
        .label()
        .to_string();

    let mut by_payee: BTreeMap<BankAccountId, Vec<CashflowId>> = BTreeMap::new();
    for cashflow in ledger.state().cashflows() {
        if cashflow.batch_id() == batch_id
            && cashflow.status() == crate::models::CashflowStatus::Accepted
            && !ledger.state().is_cashflow_invoiced(cashflow.id())
        {
            by_payee
                .entry(cashflow.bank_account_id())
                .or_default()
                .push(cashflow.id());
        }
    }

    let mut generated = Vec::new();
    for (bank_account_id, cashflow_ids) in by_payee {
        let result = ledger.atomic(|tx| generate_invoice_in(tx, &cashflow_ids, now));
        match result {
            Ok(Some(output)) => {
                if let Err(storage_error) = storage.store(&output.object_id, &output.document) {
                    // the rows committed; the document can be
                    // re-rendered and re-stored from them
                    error!(invoice = %output.invoice_id, error = %storage_error,
                        "failed to store invoice document");
                }
                generated.push(output.invoice_id);
            }
            Ok(None) => {}
            Err(invoice_error) => {
                warn!(bank_account = %bank_account_id, error = %invoice_error,
                    "skipping payee invoice");
            }
        }
    }

    if let Err(notify_error) = notifier.batch_exported(batch_id, &label) {
        error!(batch = %label, error = %notify_error, "batch export notification failed");
    }
    info!(batch = %label, invoices = generated.len(), "generated invoices");
    Ok(generated)
}

/// Record that the invoice's money actually left: PENDING -> PAID.
/// Driven by the payment reconciliation outside the core.
pub fn mark_invoice_paid(ledger: &mut Ledger, invoice_id: InvoiceId) -> Result<(), LedgerError> {
    ledger.atomic(|tx| {
        tx.invoice_mut(invoice_id)
            .ok_or(LedgerError::UnknownId {
                entity: "invoice",
                id: invoice_id.0,
            })?
            .mark_paid();
        Ok(())
    })
}

struct InvoiceOutput {
    invoice_id: InvoiceId,
    object_id: String,
    document: Vec<u8>,
}

/// How pricings are merged into invoice lines: standard rules by
/// (group, rate), custom rules each on their own line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LineKey {
    Standard(RuleGroup, i64),
    Custom(CustomRuleId),
}

fn generate_invoice_in(
    tx: &mut AtomicTx,
    cashflow_ids: &[CashflowId],
    now: DateTime<Utc>,
) -> Result<Option<InvoiceOutput>, LedgerError> {
    // re-filter inside the scope: idempotence lives here, not in the
    // caller's snapshot of the world
    let cashflow_ids: Vec<CashflowId> = cashflow_ids
        .iter()
        .copied()
        .filter(|&id| {
            tx.cashflow(id)
                .map(|cf| cf.status() == crate::models::CashflowStatus::Accepted)
                .unwrap_or(false)
                && !tx.is_cashflow_invoiced(id)
        })
        .collect();
    let Some(&first_cashflow) = cashflow_ids.first() else {
        return Ok(None);
    };
    let bank_account_id = tx
        .cashflow(first_cashflow)
        .ok_or(LedgerError::UnknownId {
            entity: "cashflow",
            id: first_cashflow.0,
        })?
        .bank_account_id();

    let mut pricing_ids: Vec<PricingId> = Vec::new();
    for &cashflow_id in &cashflow_ids {
        for pricing_id in tx.pricing_ids_for_cashflow(cashflow_id) {
            let processed = tx
                .pricing(pricing_id)
                .map(|p| p.status() == PricingStatus::Processed)
                .unwrap_or(false);
            if processed {
                pricing_ids.push(pricing_id);
            }
        }
    }
    if pricing_ids.is_empty() {
        return Ok(None);
    }
    pricing_ids.sort();
    pricing_ids.dedup();

    let mut groups: BTreeMap<LineKey, Vec<PricingId>> = BTreeMap::new();
    for &pricing_id in &pricing_ids {
        let pricing = tx.pricing(pricing_id).ok_or(LedgerError::UnknownId {
            entity: "pricing",
            id: pricing_id.0,
        })?;
        let key = match *pricing.rule() {
            RuleRef::Standard(standard) => LineKey::Standard(standard.group(), standard.rate_bps()),
            RuleRef::Custom(rule_id) => LineKey::Custom(rule_id),
        };
        groups.entry(key).or_default().push(pricing_id);
    }

    let mut lines: Vec<InvoiceLine> = Vec::new();
    for (key, group_pricings) in &groups {
        lines.push(make_invoice_line(tx, *key, group_pricings)?);
    }
    let amount: Cents = lines.iter().map(|line| line.reimbursed_amount).sum();

    let token = Uuid::new_v4().simple().to_string();
    let reference = tx.reference_scheme_mut(now.year()).next_reference();
    let object_id = storage_object_id(&token, now, &reference);
    let bank_account_label = tx
        .bank_account(bank_account_id)
        .map(|account| account.label().to_string())
        .unwrap_or_default();
    let document = render_document(&reference, now, &bank_account_label, &lines, amount);
    let checksum = format!("{:x}", Sha256::digest(&document));

    let invoice_id = tx.insert_invoice(|id| {
        Invoice::new(
            id,
            reference.clone(),
            bank_account_id,
            amount,
            token.clone(),
            now,
            lines.clone(),
            object_id.clone(),
            checksum,
        )
    });
    for &cashflow_id in &cashflow_ids {
        tx.link_invoice_cashflow(invoice_id, cashflow_id);
        tx.cashflow_mut(cashflow_id)
            .ok_or(LedgerError::UnknownId {
                entity: "cashflow",
                id: cashflow_id.0,
            })?
            .log_settlement(now);
    }
    for &pricing_id in &pricing_ids {
        let booking_id = tx
            .pricing_mut(pricing_id)
            .ok_or(LedgerError::UnknownId {
                entity: "pricing",
                id: pricing_id.0,
            })
            .and_then(|pricing| {
                pricing.mark_invoiced(now)?;
                Ok(pricing.booking_id())
            })?;
        if let Some(booking_id) = booking_id {
            let status = tx.booking(booking_id).map(|b| b.status());
            // a booking cancelled after processing stays cancelled
            if status == Some(BookingStatus::Used) {
                tx.booking_mut(booking_id)
                    .ok_or(LedgerError::UnknownId {
                        entity: "booking",
                        id: booking_id.0,
                    })?
                    .mark_reimbursed(now)?;
            }
        }
    }

    info!(invoice = %reference, amount = %format_cents(amount), "created invoice");
    Ok(Some(InvoiceOutput {
        invoice_id,
        object_id,
        document,
    }))
}

fn make_invoice_line(
    tx: &AtomicTx,
    key: LineKey,
    pricing_ids: &[PricingId],
) -> Result<InvoiceLine, LedgerError> {
    let mut contribution: Cents = 0;
    let mut offerer_revenue: Cents = 0;
    let mut reimbursed: Cents = 0;
    for &pricing_id in pricing_ids {
        let pricing = tx.pricing(pricing_id).ok_or(LedgerError::UnknownId {
            entity: "pricing",
            id: pricing_id.0,
        })?;
        contribution += pricing.line_amount(PricingLineCategory::OffererContribution);
        offerer_revenue += pricing.line_amount(PricingLineCategory::OffererRevenue);
        reimbursed += pricing.amount();
    }

    let (rule_group, rate_bps, label) = match key {
        LineKey::Standard(group, rate) => (group, rate, standard_line_label(group).to_string()),
        LineKey::Custom(rule_id) => {
            let rule = tx.custom_rule(rule_id).ok_or(LedgerError::UnknownId {
                entity: "custom rule",
                id: rule_id.0,
            })?;
            let rate = match rule.kind() {
                CustomRuleKind::RateBps(rate) => rate,
                // the effective rate of a per-unit amount
                CustomRuleKind::AmountPerUnit(_) if offerer_revenue != 0 => {
                    crate::models::money::ratio_as_bps(reimbursed, offerer_revenue)
                }
                CustomRuleKind::AmountPerUnit(_) => 0,
            };
            (
                RuleGroup::Custom,
                rate,
                format!("Custom agreement {}", rule_id),
            )
        }
    };
    Ok(InvoiceLine {
        label,
        rule_group,
        rate_bps,
        contribution_amount: contribution,
        reimbursed_amount: reimbursed,
    })
}

fn standard_line_label(group: RuleGroup) -> &'static str {
    match group {
        RuleGroup::Standard => "General scale",
        RuleGroup::Book => "Books",
        RuleGroup::NotReimbursed => "Not reimbursed",
        RuleGroup::Custom => "Custom agreement",
    }
}

/// Pure projection of the invoice data into the stored document. The
/// rows are the source of truth; this can be re-rendered at any time.
fn render_document(
    reference: &str,
    date: DateTime<Utc>,
    bank_account_label: &str,
    lines: &[InvoiceLine],
    amount: Cents,
) -> Vec<u8> {
    let mut document = String::new();
    document.push_str(&format!("INVOICE {reference}\n"));
    document.push_str(&format!("Date: {}\n", date.format("%d/%m/%Y")));
    document.push_str(&format!("Payee: {bank_account_label}\n\n"));
    for line in lines {
        document.push_str(&format!(
            "{} (rate {:.2}%): contribution {}, reimbursed {}\n",
            line.label,
            line.rate_bps as f64 / 100.0,
            format_cents(line.contribution_amount),
            format_cents(line.reimbursed_amount),
        ));
    }
    document.push_str(&format!("\nTotal: {}\n", format_cents(amount)));
    document.into_bytes()
}
