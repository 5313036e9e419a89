//! Invoices: immutable accounting documents.
//!
//! An invoice is written once and never edited. Its reference comes
//! from a per-year counter (`ReferenceScheme`), never from row counts,
//! so deleting or failing rows can never produce a duplicate reference.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BankAccountId, InvoiceId};
use super::money::Cents;
use crate::rules::RuleGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

/// One line of an invoice: pricings aggregated by rule group and rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub label: String,
    pub rule_group: RuleGroup,
    /// Reimbursement rate in basis points; derived for fixed-amount
    /// custom rules.
    pub rate_bps: i64,
    /// What the offerer keeps (positive or zero).
    pub contribution_amount: Cents,
    /// What we reimburse (negative or zero). Lines sum to the invoice
    /// amount through this field.
    pub reimbursed_amount: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    /// `F{YY}{seq:07}`, e.g. `F240000001`.
    reference: String,
    bank_account_id: BankAccountId,
    /// Sum of line `reimbursed_amount`s; negative.
    amount: Cents,
    /// Opaque retrieval token for the stored document.
    token: String,
    date: DateTime<Utc>,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    /// Object-store key of the rendered document.
    storage_object_id: String,
    /// SHA-256 of the rendered document, hex-encoded.
    checksum: String,
}

impl Invoice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: InvoiceId,
        reference: String,
        bank_account_id: BankAccountId,
        amount: Cents,
        token: String,
        date: DateTime<Utc>,
        lines: Vec<InvoiceLine>,
        storage_object_id: String,
        checksum: String,
    ) -> Self {
        Self {
            id,
            reference,
            bank_account_id,
            amount,
            token,
            date,
            status: InvoiceStatus::Pending,
            lines,
            storage_object_id,
            checksum,
        }
    }

    pub fn id(&self) -> InvoiceId {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn bank_account_id(&self) -> BankAccountId {
        self.bank_account_id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn storage_object_id(&self) -> &str {
        &self.storage_object_id
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub(crate) fn mark_paid(&mut self) {
        self.status = InvoiceStatus::Paid;
    }
}

/// Per-year invoice reference counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceScheme {
    year: i32,
    next_number: u64,
}

impl ReferenceScheme {
    pub(crate) fn new(year: i32) -> Self {
        Self {
            year,
            next_number: 1,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Issue the next reference for this year, e.g. `F240000001`.
    pub(crate) fn next_reference(&mut self) -> String {
        let reference = format!("F{:02}{:07}", self.year.rem_euclid(100), self.next_number);
        self.next_number += 1;
        reference
    }
}

/// Object-store key of the rendered invoice document.
pub fn storage_object_id(token: &str, date: DateTime<Utc>, reference: &str) -> String {
    format!(
        "{}/{:02}{:02}{}-{}-justificatif.pdf",
        token,
        date.day(),
        date.month(),
        date.year(),
        reference
    )
}
