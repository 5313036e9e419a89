//! Cashflow Batcher Tests - Labels, Grouping, Acceptance
//!
//! Critical invariants tested:
//! - A pricing enters at most one live cashflow, flipped to PROCESSED
//!   in the same scope that links it
//! - Batch labels are issued monotonically (VIR1, VIR2, ...)
//! - Payees without a payable bank account are skipped, not fatal
//! - Rejection reverts pricings so a later batch picks them up

use chrono::{DateTime, TimeZone, Utc};
use reimbursement_ledger_core_rs::{
    accept_cashflow, create_booking, generate_batch, mark_booking_used, next_batch_label,
    price_event, reject_cashflow, BankAccountStatus, CashflowStatus, Deposit, Ledger, LedgerError,
    OfferCategory, PricingId, PricingLogReason, PricingStatus, StockId, UserId, VenueId,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn t(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, day, 12, 0, 0).unwrap()
}

fn cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap()
}

fn setup() -> (Ledger, VenueId, UserId) {
    let mut ledger = Ledger::new();
    let venue = ledger.add_venue("Cinéma payé");
    ledger
        .link_venue_to_pricing_point(venue, venue, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    let account = ledger.add_bank_account("FR76 main account", BankAccountStatus::Accepted);
    ledger.link_venue_to_bank_account(venue, account).unwrap();
    let user = ledger.add_user(Deposit::uncapped(1_000_000_00));
    (ledger, venue, user)
}

fn priced_booking(
    ledger: &mut Ledger,
    user: UserId,
    venue: VenueId,
    price: i64,
    day: u32,
) -> PricingId {
    let stock: StockId = ledger
        .add_stock(venue, price, None, None, false, OfferCategory::General)
        .unwrap();
    let booking = ledger
        .atomic(|tx| create_booking(tx, user, stock, 1, t(day)))
        .unwrap();
    let event = ledger
        .atomic(|tx| mark_booking_used(tx, booking, t(day)))
        .unwrap();
    price_event(ledger, event).unwrap()
}

// ============================================================================
// Batching
// ============================================================================

#[test]
fn test_batch_groups_pricings_into_one_cashflow_per_payee() {
    let (mut ledger, venue, user) = setup();
    let p1 = priced_booking(&mut ledger, user, venue, 10_00, 2);
    let p2 = priced_booking(&mut ledger, user, venue, 5_00, 3);

    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    assert_eq!(report.cashflow_ids.len(), 1);
    assert!(report.skipped_payees.is_empty());

    let cashflow = ledger.state().cashflow(report.cashflow_ids[0]).unwrap();
    assert_eq!(cashflow.amount(), -15_00);
    assert_eq!(cashflow.status(), CashflowStatus::PendingAcceptance);

    for pricing_id in [p1, p2] {
        let pricing = ledger.state().pricing(pricing_id).unwrap();
        assert_eq!(pricing.status(), PricingStatus::Processed);
        assert_eq!(
            pricing.logs().last().map(|log| log.reason),
            Some(PricingLogReason::GenerateCashflow)
        );
    }
    assert_eq!(
        ledger.state().pricing_ids_for_cashflow(cashflow.id()),
        vec![p1, p2]
    );
}

#[test]
fn test_rerun_with_nothing_validated_yields_empty_batch() {
    let (mut ledger, venue, user) = setup();
    priced_booking(&mut ledger, user, venue, 10_00, 2);

    let first = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    assert_eq!(first.cashflow_ids.len(), 1);

    // everything is already PROCESSED, so the batch comes out empty
    let second = generate_batch(&mut ledger, "VIR2", cutoff(), cutoff()).unwrap();
    assert!(second.cashflow_ids.is_empty());
    assert_eq!(ledger.state().cashflows().count(), 1);
    assert!(ledger.state().cashflow_batch_by_label("VIR2").is_some());
}

#[test]
fn test_duplicate_label_is_refused() {
    let (mut ledger, _, _) = setup();
    generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    let result = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff());
    assert!(matches!(result, Err(LedgerError::DuplicateBatchLabel(_))));
}

#[test]
fn test_next_batch_label_sequence() {
    let (mut ledger, _, _) = setup();
    assert_eq!(next_batch_label(ledger.state()), "VIR1");
    generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    assert_eq!(next_batch_label(ledger.state()), "VIR2");
    generate_batch(&mut ledger, "VIR2", cutoff(), cutoff()).unwrap();
    assert_eq!(next_batch_label(ledger.state()), "VIR3");
}

#[test]
fn test_value_date_cutoff_filters_pricings() {
    let (mut ledger, venue, user) = setup();
    priced_booking(&mut ledger, user, venue, 10_00, 2);
    // used after the cutoff: must wait for the next batch
    let late = priced_booking(&mut ledger, user, venue, 5_00, 28);

    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    let cashflow = ledger.state().cashflow(report.cashflow_ids[0]).unwrap();
    assert_eq!(cashflow.amount(), -10_00);
    assert_eq!(
        ledger.state().pricing(late).unwrap().status(),
        PricingStatus::Validated
    );
}

#[test]
fn test_future_event_offers_wait_for_their_date() {
    let (mut ledger, venue, user) = setup();
    // a show scheduled after the cutoff, somehow already marked used
    let show = ledger
        .add_stock(venue, 20_00, None, Some(t(27)), false, OfferCategory::General)
        .unwrap();
    let booking = ledger
        .atomic(|tx| create_booking(tx, user, show, 1, t(2)))
        .unwrap();
    let event = ledger
        .atomic(|tx| mark_booking_used(tx, booking, t(2)))
        .unwrap();
    let pricing = price_event(&mut ledger, event).unwrap();

    let early_cutoff = t(20);
    let report = generate_batch(&mut ledger, "VIR1", early_cutoff, early_cutoff).unwrap();
    assert!(report.cashflow_ids.is_empty());
    assert_eq!(
        ledger.state().pricing(pricing).unwrap().status(),
        PricingStatus::Validated
    );
}

#[test]
fn test_payee_without_payable_account_is_skipped() {
    let (mut ledger, venue, user) = setup();
    priced_booking(&mut ledger, user, venue, 10_00, 2);

    let orphan = ledger.add_venue("no bank account");
    ledger
        .link_venue_to_pricing_point(orphan, orphan, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    let orphan_pricing = priced_booking(&mut ledger, user, orphan, 7_00, 3);

    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    // only the payable venue got a cashflow; the other pricing just
    // stays validated (no account to even report against)
    assert_eq!(report.cashflow_ids.len(), 1);
    assert_eq!(
        ledger.state().pricing(orphan_pricing).unwrap().status(),
        PricingStatus::Validated
    );
}

#[test]
fn test_pending_compliance_account_is_not_payable() {
    let mut ledger = Ledger::new();
    let venue = ledger.add_venue("pending compliance");
    ledger
        .link_venue_to_pricing_point(venue, venue, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .unwrap();
    let account = ledger.add_bank_account("under review", BankAccountStatus::Pending);
    ledger.link_venue_to_bank_account(venue, account).unwrap();
    let user = ledger.add_user(Deposit::uncapped(100_00));
    priced_booking(&mut ledger, user, venue, 10_00, 2);

    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    assert!(report.cashflow_ids.is_empty());
}

// ============================================================================
// Acceptance and rejection
// ============================================================================

#[test]
fn test_accept_then_reject_is_refused() {
    let (mut ledger, venue, user) = setup();
    priced_booking(&mut ledger, user, venue, 10_00, 2);
    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    let cashflow_id = report.cashflow_ids[0];

    accept_cashflow(&mut ledger, cashflow_id, cutoff()).unwrap();
    assert!(reject_cashflow(&mut ledger, cashflow_id, cutoff()).is_err());
    assert_eq!(
        ledger.state().cashflow(cashflow_id).unwrap().status(),
        CashflowStatus::Accepted
    );
}

#[test]
fn test_rejected_cashflow_frees_pricings_for_the_next_batch() {
    let (mut ledger, venue, user) = setup();
    let pricing = priced_booking(&mut ledger, user, venue, 10_00, 2);
    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    let rejected = report.cashflow_ids[0];

    reject_cashflow(&mut ledger, rejected, cutoff()).unwrap();
    let reverted = ledger.state().pricing(pricing).unwrap();
    assert_eq!(reverted.status(), PricingStatus::Validated);
    assert_eq!(
        reverted.logs().last().map(|log| log.reason),
        Some(PricingLogReason::RejectCashflow)
    );

    let retry = generate_batch(&mut ledger, "VIR2", cutoff(), cutoff()).unwrap();
    assert_eq!(retry.cashflow_ids.len(), 1);
    let new_cashflow = retry.cashflow_ids[0];
    assert_ne!(new_cashflow, rejected);
    // the pricing is now linked to both cashflows, one dead, one live
    assert_eq!(
        ledger.state().pricing(pricing).unwrap().status(),
        PricingStatus::Processed
    );
}

#[test]
fn test_zero_amount_payee_gets_no_cashflow() {
    let (mut ledger, venue, user) = setup();
    let stock = ledger
        .add_stock(venue, 10_00, None, None, false, OfferCategory::NotReimbursable)
        .unwrap();
    let booking = ledger
        .atomic(|tx| create_booking(tx, user, stock, 1, t(2)))
        .unwrap();
    let event = ledger
        .atomic(|tx| mark_booking_used(tx, booking, t(2)))
        .unwrap();
    let pricing = price_event(&mut ledger, event).unwrap();
    assert_eq!(ledger.state().pricing(pricing).unwrap().amount(), 0);

    let report = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
    assert!(report.cashflow_ids.is_empty());
    // a zero total is not an error; the pricing simply stays put
    assert_eq!(
        ledger.state().pricing(pricing).unwrap().status(),
        PricingStatus::Validated
    );
}
