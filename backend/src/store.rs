//! In-memory relational state of the reimbursement ledger.
//!
//! `LedgerState` holds every table, keyed by typed ids, plus the
//! per-table id sequences and the invoice reference counters. It is
//! `Clone`, which is what makes snapshots and savepoints cheap enough
//! for the atomic coordinator to take one per scope.
//!
//! Tables are `BTreeMap`s so that iteration order is deterministic:
//! batch operations walk rows in id order and must behave identically
//! across runs and across a serialize/deserialize round trip.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::LedgerError;
use crate::models::{
    BankAccount, BankAccountId, BankAccountStatus, Booking, BookingId, Cashflow, CashflowBatch,
    CashflowBatchId, CashflowId, CustomRuleId, Deposit, FinanceEvent, FinanceEventId, IdSequence,
    Invoice, InvoiceId, OfferCategory, Pricing, PricingId, PricingStatus, ReferenceScheme, Stock,
    StockId, User, UserId, Venue, VenueId,
};
use crate::models::money::Cents;
use crate::rules::CustomReimbursementRule;

/// Link row: one pricing settled by one cashflow. A pricing can appear
/// under several cashflows over time if earlier ones were rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashflowPricing {
    pub cashflow_id: CashflowId,
    pub pricing_id: PricingId,
}

/// Link row: one cashflow settled by one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCashflow {
    pub invoice_id: InvoiceId,
    pub cashflow_id: CashflowId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Sequences {
    pub stocks: IdSequence,
    pub bookings: IdSequence,
    pub users: IdSequence,
    pub venues: IdSequence,
    pub bank_accounts: IdSequence,
    pub finance_events: IdSequence,
    pub pricings: IdSequence,
    pub cashflows: IdSequence,
    pub cashflow_batches: IdSequence,
    pub invoices: IdSequence,
    pub custom_rules: IdSequence,
}

/// The whole relational state. Cloned wholesale for snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    sequences: Sequences,
    stocks: BTreeMap<StockId, Stock>,
    bookings: BTreeMap<BookingId, Booking>,
    users: BTreeMap<UserId, User>,
    venues: BTreeMap<VenueId, Venue>,
    bank_accounts: BTreeMap<BankAccountId, BankAccount>,
    finance_events: BTreeMap<FinanceEventId, FinanceEvent>,
    pricings: BTreeMap<PricingId, Pricing>,
    cashflows: BTreeMap<CashflowId, Cashflow>,
    cashflow_batches: BTreeMap<CashflowBatchId, CashflowBatch>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    custom_rules: BTreeMap<CustomRuleId, CustomReimbursementRule>,
    cashflow_pricings: Vec<CashflowPricing>,
    invoice_cashflows: Vec<InvoiceCashflow>,
    reference_schemes: BTreeMap<i32, ReferenceScheme>,
}

impl LedgerState {
    // ---- stocks -------------------------------------------------------

    pub fn stock(&self, id: StockId) -> Option<&Stock> {
        self.stocks.get(&id)
    }

    pub(crate) fn stock_mut(&mut self, id: StockId) -> Option<&mut Stock> {
        self.stocks.get_mut(&id)
    }

    pub fn stocks(&self) -> impl Iterator<Item = &Stock> {
        self.stocks.values()
    }

    /// Insert a stock row. Referential setup; no invariant guards it.
    pub fn insert_stock(
        &mut self,
        venue_id: VenueId,
        price: Cents,
        quantity: Option<u32>,
        event_datetime: Option<DateTime<Utc>>,
        digital: bool,
        category: OfferCategory,
    ) -> StockId {
        let id = StockId(self.sequences.stocks.next_value());
        self.stocks.insert(
            id,
            Stock::new(id, venue_id, price, quantity, event_datetime, digital, category),
        );
        id
    }

    // ---- bookings -----------------------------------------------------

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.get(&id)
    }

    pub(crate) fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.get_mut(&id)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    pub(crate) fn insert_booking(
        &mut self,
        user_id: UserId,
        stock_id: StockId,
        quantity: u32,
        amount: Cents,
        date_created: DateTime<Utc>,
    ) -> BookingId {
        let id = BookingId(self.sequences.bookings.next_value());
        self.bookings.insert(
            id,
            Booking::new(id, user_id, stock_id, quantity, amount, date_created),
        );
        id
    }

    // ---- users / venues / bank accounts -------------------------------

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Insert a user row. Referential setup; no invariant guards it.
    pub fn insert_user(&mut self, deposit: Deposit) -> UserId {
        let id = UserId(self.sequences.users.next_value());
        self.users.insert(id, User::new(id, deposit));
        id
    }

    pub fn venue(&self, id: VenueId) -> Option<&Venue> {
        self.venues.get(&id)
    }

    pub(crate) fn venue_mut(&mut self, id: VenueId) -> Option<&mut Venue> {
        self.venues.get_mut(&id)
    }

    pub fn venues(&self) -> impl Iterator<Item = &Venue> {
        self.venues.values()
    }

    /// Insert a venue row. Referential setup; no invariant guards it.
    pub fn insert_venue(&mut self, name: String) -> VenueId {
        let id = VenueId(self.sequences.venues.next_value());
        self.venues.insert(id, Venue::new(id, name));
        id
    }

    pub fn bank_account(&self, id: BankAccountId) -> Option<&BankAccount> {
        self.bank_accounts.get(&id)
    }

    pub(crate) fn insert_bank_account(
        &mut self,
        label: String,
        status: BankAccountStatus,
    ) -> BankAccountId {
        let id = BankAccountId(self.sequences.bank_accounts.next_value());
        self.bank_accounts
            .insert(id, BankAccount::new(id, label, status));
        id
    }

    // ---- finance events -----------------------------------------------

    pub fn finance_event(&self, id: FinanceEventId) -> Option<&FinanceEvent> {
        self.finance_events.get(&id)
    }

    pub(crate) fn finance_event_mut(&mut self, id: FinanceEventId) -> Option<&mut FinanceEvent> {
        self.finance_events.get_mut(&id)
    }

    pub fn finance_events(&self) -> impl Iterator<Item = &FinanceEvent> {
        self.finance_events.values()
    }

    pub(crate) fn insert_finance_event(&mut self, make: impl FnOnce(FinanceEventId) -> FinanceEvent) -> FinanceEventId {
        let id = FinanceEventId(self.sequences.finance_events.next_value());
        self.finance_events.insert(id, make(id));
        id
    }

    // ---- pricings -----------------------------------------------------

    pub fn pricing(&self, id: PricingId) -> Option<&Pricing> {
        self.pricings.get(&id)
    }

    pub(crate) fn pricing_mut(&mut self, id: PricingId) -> Option<&mut Pricing> {
        self.pricings.get_mut(&id)
    }

    pub fn pricings(&self) -> impl Iterator<Item = &Pricing> {
        self.pricings.values()
    }

    pub(crate) fn insert_pricing(&mut self, make: impl FnOnce(PricingId) -> Pricing) -> PricingId {
        let id = PricingId(self.sequences.pricings.next_value());
        self.pricings.insert(id, make(id));
        id
    }

    /// The non-cancelled pricing of an event, if any. At most one
    /// exists: pricing is idempotent per event.
    pub fn active_pricing_for_event(&self, event_id: FinanceEventId) -> Option<&Pricing> {
        self.pricings
            .values()
            .find(|p| p.event_id() == event_id && p.status() != PricingStatus::Cancelled)
    }

    /// The non-cancelled pricing of a booking, if any (reversal
    /// pricings carry no booking id and are excluded by construction).
    pub fn active_pricing_for_booking(&self, booking_id: BookingId) -> Option<&Pricing> {
        self.pricings
            .values()
            .find(|p| p.booking_id() == Some(booking_id) && p.status() != PricingStatus::Cancelled)
    }

    // ---- cashflows ----------------------------------------------------

    pub fn cashflow(&self, id: CashflowId) -> Option<&Cashflow> {
        self.cashflows.get(&id)
    }

    pub(crate) fn cashflow_mut(&mut self, id: CashflowId) -> Option<&mut Cashflow> {
        self.cashflows.get_mut(&id)
    }

    pub fn cashflows(&self) -> impl Iterator<Item = &Cashflow> {
        self.cashflows.values()
    }

    pub(crate) fn insert_cashflow(
        &mut self,
        batch_id: CashflowBatchId,
        bank_account_id: BankAccountId,
        amount: Cents,
        creation_date: DateTime<Utc>,
    ) -> CashflowId {
        let id = CashflowId(self.sequences.cashflows.next_value());
        self.cashflows.insert(
            id,
            Cashflow::new(id, batch_id, bank_account_id, amount, creation_date),
        );
        id
    }

    pub fn cashflow_batch(&self, id: CashflowBatchId) -> Option<&CashflowBatch> {
        self.cashflow_batches.get(&id)
    }

    pub fn cashflow_batches(&self) -> impl Iterator<Item = &CashflowBatch> {
        self.cashflow_batches.values()
    }

    pub fn cashflow_batch_by_label(&self, label: &str) -> Option<&CashflowBatch> {
        self.cashflow_batches.values().find(|b| b.label() == label)
    }

    pub(crate) fn insert_cashflow_batch(
        &mut self,
        label: String,
        cutoff: DateTime<Utc>,
        creation_date: DateTime<Utc>,
    ) -> CashflowBatchId {
        let id = CashflowBatchId(self.sequences.cashflow_batches.next_value());
        self.cashflow_batches
            .insert(id, CashflowBatch::new(id, label, cutoff, creation_date));
        id
    }

    // ---- invoices -----------------------------------------------------

    pub fn invoice(&self, id: InvoiceId) -> Option<&Invoice> {
        self.invoices.get(&id)
    }

    pub(crate) fn invoice_mut(&mut self, id: InvoiceId) -> Option<&mut Invoice> {
        self.invoices.get_mut(&id)
    }

    pub fn invoices(&self) -> impl Iterator<Item = &Invoice> {
        self.invoices.values()
    }

    pub(crate) fn insert_invoice(&mut self, make: impl FnOnce(InvoiceId) -> Invoice) -> InvoiceId {
        let id = InvoiceId(self.sequences.invoices.next_value());
        self.invoices.insert(id, make(id));
        id
    }

    pub(crate) fn reference_scheme_mut(&mut self, year: i32) -> &mut ReferenceScheme {
        self.reference_schemes
            .entry(year)
            .or_insert_with(|| ReferenceScheme::new(year))
    }

    // ---- custom rules -------------------------------------------------

    pub fn custom_rule(&self, id: CustomRuleId) -> Option<&CustomReimbursementRule> {
        self.custom_rules.get(&id)
    }

    pub fn custom_rules(&self) -> impl Iterator<Item = &CustomReimbursementRule> {
        self.custom_rules.values()
    }

    pub(crate) fn insert_custom_rule(
        &mut self,
        make: impl FnOnce(CustomRuleId) -> CustomReimbursementRule,
    ) -> CustomRuleId {
        let id = CustomRuleId(self.sequences.custom_rules.next_value());
        self.custom_rules.insert(id, make(id));
        id
    }

    // ---- link tables --------------------------------------------------

    pub(crate) fn link_cashflow_pricing(&mut self, cashflow_id: CashflowId, pricing_id: PricingId) {
        self.cashflow_pricings.push(CashflowPricing {
            cashflow_id,
            pricing_id,
        });
    }

    pub fn pricing_ids_for_cashflow(&self, cashflow_id: CashflowId) -> Vec<PricingId> {
        self.cashflow_pricings
            .iter()
            .filter(|link| link.cashflow_id == cashflow_id)
            .map(|link| link.pricing_id)
            .collect()
    }

    pub(crate) fn link_invoice_cashflow(&mut self, invoice_id: InvoiceId, cashflow_id: CashflowId) {
        self.invoice_cashflows.push(InvoiceCashflow {
            invoice_id,
            cashflow_id,
        });
    }

    pub fn cashflow_ids_for_invoice(&self, invoice_id: InvoiceId) -> Vec<CashflowId> {
        self.invoice_cashflows
            .iter()
            .filter(|link| link.invoice_id == invoice_id)
            .map(|link| link.cashflow_id)
            .collect()
    }

    pub fn is_cashflow_invoiced(&self, cashflow_id: CashflowId) -> bool {
        self.invoice_cashflows
            .iter()
            .any(|link| link.cashflow_id == cashflow_id)
    }

    // ---- probe --------------------------------------------------------

    /// Cheap referential checks run by the coordinator right after an
    /// outer commit. A failure here means a bug in an operation, not a
    /// domain error.
    pub fn integrity_probe(&self) -> Result<(), String> {
        for booking in self.bookings.values() {
            if !self.stocks.contains_key(&booking.stock_id()) {
                return Err(format!(
                    "booking {} references missing stock {}",
                    booking.id(),
                    booking.stock_id()
                ));
            }
            if !self.users.contains_key(&booking.user_id()) {
                return Err(format!(
                    "booking {} references missing user {}",
                    booking.id(),
                    booking.user_id()
                ));
            }
        }
        for link in &self.cashflow_pricings {
            if !self.cashflows.contains_key(&link.cashflow_id)
                || !self.pricings.contains_key(&link.pricing_id)
            {
                return Err(format!(
                    "dangling cashflow/pricing link {} -> {}",
                    link.cashflow_id, link.pricing_id
                ));
            }
        }
        for link in &self.invoice_cashflows {
            if !self.invoices.contains_key(&link.invoice_id)
                || !self.cashflows.contains_key(&link.cashflow_id)
            {
                return Err(format!(
                    "dangling invoice/cashflow link {} -> {}",
                    link.invoice_id, link.cashflow_id
                ));
            }
        }
        for invoice in self.invoices.values() {
            let line_total: Cents = invoice.lines().iter().map(|l| l.reimbursed_amount).sum();
            if line_total != invoice.amount() {
                return Err(format!(
                    "invoice {} amount {} does not match its lines ({})",
                    invoice.reference(),
                    invoice.amount(),
                    line_total
                ));
            }
        }
        Ok(())
    }
}

/// Owner of the ledger state. All mutation goes through
/// [`Ledger::atomic`] (see the `atomic` module); the setup methods
/// below build referentials (venues, stocks, users) that no invariant
/// guards.
#[derive(Debug, Default)]
pub struct Ledger {
    pub(crate) state: LedgerState,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: LedgerState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    // ---- referential setup (not guarded) ------------------------------

    pub fn add_user(&mut self, deposit: Deposit) -> UserId {
        self.state.insert_user(deposit)
    }

    pub fn add_venue(&mut self, name: impl Into<String>) -> VenueId {
        self.state.insert_venue(name.into())
    }

    pub fn add_bank_account(
        &mut self,
        label: impl Into<String>,
        status: BankAccountStatus,
    ) -> BankAccountId {
        self.state.insert_bank_account(label.into(), status)
    }

    pub fn add_stock(
        &mut self,
        venue_id: VenueId,
        price: Cents,
        quantity: Option<u32>,
        event_datetime: Option<DateTime<Utc>>,
        digital: bool,
        category: OfferCategory,
    ) -> Result<StockId, LedgerError> {
        if self.state.venue(venue_id).is_none() {
            return Err(LedgerError::UnknownId {
                entity: "venue",
                id: venue_id.0,
            });
        }
        Ok(self
            .state
            .insert_stock(venue_id, price, quantity, event_datetime, digital, category))
    }

    /// Soft-delete a stock: existing bookings stand, new ones are
    /// refused.
    pub fn soft_delete_stock(&mut self, stock_id: StockId) -> Result<(), LedgerError> {
        self.state
            .stock_mut(stock_id)
            .ok_or(LedgerError::UnknownId {
                entity: "stock",
                id: stock_id.0,
            })?
            .soft_delete();
        Ok(())
    }

    /// Point a venue's revenue accounting at a pricing point (itself
    /// or another venue), from `since` onwards. Pending finance events
    /// of the venue become ready.
    pub fn link_venue_to_pricing_point(
        &mut self,
        venue_id: VenueId,
        pricing_point_id: VenueId,
        since: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.state.venue(pricing_point_id).is_none() {
            return Err(LedgerError::UnknownId {
                entity: "venue",
                id: pricing_point_id.0,
            });
        }
        let venue = self
            .state
            .venue_mut(venue_id)
            .ok_or(LedgerError::UnknownId {
                entity: "venue",
                id: venue_id.0,
            })?;
        venue.link_pricing_point(pricing_point_id, since);
        crate::events::ready_pending_events(&mut self.state, venue_id)?;
        Ok(())
    }

    pub fn link_venue_to_bank_account(
        &mut self,
        venue_id: VenueId,
        bank_account_id: BankAccountId,
    ) -> Result<(), LedgerError> {
        if self.state.bank_account(bank_account_id).is_none() {
            return Err(LedgerError::UnknownId {
                entity: "bank account",
                id: bank_account_id.0,
            });
        }
        let venue = self
            .state
            .venue_mut(venue_id)
            .ok_or(LedgerError::UnknownId {
                entity: "venue",
                id: venue_id.0,
            })?;
        venue.link_bank_account(bank_account_id);
        Ok(())
    }

    pub fn add_custom_rule(
        &mut self,
        make: impl FnOnce(CustomRuleId) -> CustomReimbursementRule,
    ) -> CustomRuleId {
        self.state.insert_custom_rule(make)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_rejects_unknown_references() {
        let mut ledger = Ledger::new();
        let err = ledger
            .add_stock(VenueId(99), 10_00, None, None, false, OfferCategory::General)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownId { entity: "venue", .. }));
    }

    #[test]
    fn test_state_survives_serde_round_trip() {
        let mut ledger = Ledger::new();
        let venue = ledger.add_venue("Le Rex");
        ledger
            .add_stock(venue, 10_00, Some(5), None, false, OfferCategory::General)
            .unwrap();
        let json = serde_json::to_string(ledger.state()).unwrap();
        let restored: LedgerState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.stocks().count(), 1);
        // sequences survive too: the next stock id is 2, not 1
        let mut ledger = Ledger::from_state(restored);
        let stock2 = ledger
            .add_stock(venue, 5_00, None, None, true, OfferCategory::Book)
            .unwrap();
        assert_eq!(stock2, StockId(2));
    }
}
