//! Pricing Engine Tests - Rules, Ordering, Idempotence
//!
//! Critical invariants tested:
//! - One non-cancelled pricing per finance event, ever
//! - Standard rates follow the pricing point's yearly revenue tiers
//! - Custom rules override standard ones
//! - Events are priced oldest first; out-of-order calls defer

use chrono::{DateTime, TimeZone, Utc};
use reimbursement_ledger_core_rs::{
    create_booking, mark_booking_used, price_event, price_ready_events, BookingId, BookingStatus,
    CancellationReason, CustomReimbursementRule, CustomRuleKind, CustomRuleScope, Deposit,
    FinanceEventId, FinanceEventStatus, Ledger, LedgerError, OfferCategory, PricingLineCategory,
    PricingStatus, RuleRef, StandardRule, StockId, UserId, VenueId,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn t(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, day, 12, 0, 0).unwrap()
}

fn t_link() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A venue that is its own pricing point, and a user rich enough for
/// every scenario here.
fn setup() -> (Ledger, VenueId, UserId) {
    let mut ledger = Ledger::new();
    let venue = ledger.add_venue("Librairie des tests");
    ledger
        .link_venue_to_pricing_point(venue, venue, t_link())
        .unwrap();
    let user = ledger.add_user(Deposit::uncapped(1_000_000_00));
    (ledger, venue, user)
}

fn stock(ledger: &mut Ledger, venue: VenueId, price: i64, category: OfferCategory) -> StockId {
    ledger
        .add_stock(venue, price, None, None, false, category)
        .expect("stock setup")
}

fn book_and_use(
    ledger: &mut Ledger,
    user: UserId,
    stock: StockId,
    quantity: u32,
    day: u32,
) -> (BookingId, FinanceEventId) {
    let booking = ledger
        .atomic(|tx| create_booking(tx, user, stock, quantity, t(day)))
        .expect("booking");
    let event = ledger
        .atomic(|tx| mark_booking_used(tx, booking, t(day)))
        .expect("mark used");
    (booking, event)
}

// ============================================================================
// Basic pricing
// ============================================================================

#[test]
fn test_full_reimbursement_under_first_tier() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    let (_, event) = book_and_use(&mut ledger, user, stock, 1, 2);

    let pricing_id = price_event(&mut ledger, event).unwrap();
    let pricing = ledger.state().pricing(pricing_id).unwrap();
    assert_eq!(pricing.status(), PricingStatus::Validated);
    assert_eq!(pricing.amount(), -10_00);
    assert_eq!(pricing.revenue(), 10_00);
    assert_eq!(
        *pricing.rule(),
        RuleRef::Standard(StandardRule::FullReimbursementUnder20k)
    );
    assert_eq!(pricing.line_amount(PricingLineCategory::OffererRevenue), -10_00);
    assert_eq!(pricing.line_amount(PricingLineCategory::OffererContribution), 0);
    assert_eq!(
        ledger.state().finance_event(event).unwrap().status(),
        FinanceEventStatus::Priced
    );
}

#[test]
fn test_price_event_is_idempotent() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    let (_, event) = book_and_use(&mut ledger, user, stock, 1, 2);

    let first = price_event(&mut ledger, event).unwrap();
    let second = price_event(&mut ledger, event).unwrap();
    assert_eq!(first, second);
    assert_eq!(ledger.state().pricings().count(), 1);
}

#[test]
fn test_revenue_tier_lowers_the_rate() {
    let (mut ledger, venue, user) = setup();
    let big = stock(&mut ledger, venue, 19_000_00, OfferCategory::General);
    let small = stock(&mut ledger, venue, 2_000_00, OfferCategory::General);
    let (_, event1) = book_and_use(&mut ledger, user, big, 1, 2);
    let (_, event2) = book_and_use(&mut ledger, user, small, 1, 3);

    let p1 = price_event(&mut ledger, event1).unwrap();
    let p2 = price_event(&mut ledger, event2).unwrap();

    let first = ledger.state().pricing(p1).unwrap();
    assert_eq!(first.amount(), -19_000_00); // still under 20k: 100%

    let second = ledger.state().pricing(p2).unwrap();
    assert_eq!(second.revenue(), 21_000_00); // crossed into tier 2
    assert_eq!(
        *second.rule(),
        RuleRef::Standard(StandardRule::Rate95Between20kAnd40k)
    );
    assert_eq!(second.amount(), -1_900_00); // 95% of 2000.00
    assert_eq!(
        second.line_amount(PricingLineCategory::OffererContribution),
        100_00
    );
}

#[test]
fn test_books_keep_their_flat_rate() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::Book);
    let (_, event) = book_and_use(&mut ledger, user, stock, 1, 2);

    let pricing_id = price_event(&mut ledger, event).unwrap();
    let pricing = ledger.state().pricing(pricing_id).unwrap();
    assert_eq!(*pricing.rule(), RuleRef::Standard(StandardRule::BookRate95));
    assert_eq!(pricing.amount(), -9_50);
}

#[test]
fn test_not_reimbursable_still_writes_a_zero_pricing() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::NotReimbursable);
    let (_, event) = book_and_use(&mut ledger, user, stock, 1, 2);

    let pricing_id = price_event(&mut ledger, event).unwrap();
    let pricing = ledger.state().pricing(pricing_id).unwrap();
    assert_eq!(pricing.amount(), 0);
    assert_eq!(*pricing.rule(), RuleRef::Standard(StandardRule::NotReimbursed));
    // the event will not be reprocessed
    assert_eq!(
        ledger.state().finance_event(event).unwrap().status(),
        FinanceEventStatus::Priced
    );
}

// ============================================================================
// Custom rules
// ============================================================================

#[test]
fn test_custom_rate_overrides_standard() {
    let (mut ledger, venue, user) = setup();
    let stock_id = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    ledger.add_custom_rule(|id| {
        CustomReimbursementRule::new(
            id,
            CustomRuleScope::Stock(stock_id),
            CustomRuleKind::RateBps(8_000),
            t_link(),
            None,
        )
    });
    let (_, event) = book_and_use(&mut ledger, user, stock_id, 1, 2);

    let pricing_id = price_event(&mut ledger, event).unwrap();
    let pricing = ledger.state().pricing(pricing_id).unwrap();
    assert!(matches!(*pricing.rule(), RuleRef::Custom(_)));
    assert_eq!(pricing.amount(), -8_00);
}

#[test]
fn test_custom_per_unit_amount() {
    let (mut ledger, venue, user) = setup();
    let stock_id = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    ledger.add_custom_rule(|id| {
        CustomReimbursementRule::new(
            id,
            CustomRuleScope::Stock(stock_id),
            CustomRuleKind::AmountPerUnit(2_00),
            t_link(),
            None,
        )
    });
    let (_, event) = book_and_use(&mut ledger, user, stock_id, 3, 2);

    let pricing_id = price_event(&mut ledger, event).unwrap();
    let pricing = ledger.state().pricing(pricing_id).unwrap();
    assert_eq!(pricing.amount(), -6_00); // 2.00 per unit, 3 units
    assert_eq!(
        pricing.line_amount(PricingLineCategory::OffererContribution),
        24_00
    );
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_pricing_out_of_order_is_deferred() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    let (_, older) = book_and_use(&mut ledger, user, stock, 1, 2);
    let (_, newer) = book_and_use(&mut ledger, user, stock, 1, 3);

    let result = price_event(&mut ledger, newer);
    match result {
        Err(LedgerError::OrderingViolation { event, blocked_by }) => {
            assert_eq!(event, newer);
            assert_eq!(blocked_by, older);
        }
        other => panic!("expected OrderingViolation, got {other:?}"),
    }
    // nothing was written
    assert_eq!(ledger.state().pricings().count(), 0);

    let report = price_ready_events(&mut ledger, t(28));
    assert_eq!(report.priced.len(), 2);
    assert!(report.deferred.is_empty());
    assert!(report.failed.is_empty());
}

#[test]
fn test_same_ordering_date_breaks_tie_by_event_id() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    // both used at the same instant
    let (_, first) = book_and_use(&mut ledger, user, stock, 1, 2);
    let (_, second) = book_and_use(&mut ledger, user, stock, 1, 2);
    assert!(first < second);

    // the higher event id must wait for the lower one
    assert!(matches!(
        price_event(&mut ledger, second),
        Err(LedgerError::OrderingViolation { .. })
    ));
    price_event(&mut ledger, first).unwrap();
    price_event(&mut ledger, second).unwrap();
}

#[test]
fn test_pending_event_becomes_priceable_after_linking() {
    let mut ledger = Ledger::new();
    let venue = ledger.add_venue("no pricing point yet");
    let user = ledger.add_user(Deposit::uncapped(100_00));
    let stock_id = ledger
        .add_stock(venue, 10_00, None, None, false, OfferCategory::General)
        .unwrap();
    let booking = ledger
        .atomic(|tx| create_booking(tx, user, stock_id, 1, t(2)))
        .unwrap();
    let event = ledger
        .atomic(|tx| mark_booking_used(tx, booking, t(2)))
        .unwrap();
    assert_eq!(
        ledger.state().finance_event(event).unwrap().status(),
        FinanceEventStatus::Pending
    );

    ledger.link_venue_to_pricing_point(venue, venue, t(5)).unwrap();
    let ready = ledger.state().finance_event(event).unwrap();
    assert_eq!(ready.status(), FinanceEventStatus::Ready);
    // the link start pins the ordering date after the usage date
    assert_eq!(ready.pricing_ordering_date(), Some(t(5)));

    price_event(&mut ledger, event).unwrap();
}

// ============================================================================
// Cancellation and failure isolation
// ============================================================================

#[test]
fn test_cancelling_booking_cancels_pricing_and_event() {
    let (mut ledger, venue, user) = setup();
    let stock = stock(&mut ledger, venue, 10_00, OfferCategory::General);
    let (booking, event) = book_and_use(&mut ledger, user, stock, 1, 2);
    let pricing_id = price_event(&mut ledger, event).unwrap();

    ledger
        .atomic(|tx| {
            reimbursement_ledger_core_rs::cancel_booking(
                tx,
                booking,
                CancellationReason::Offerer,
                t(4),
            )
        })
        .unwrap();

    assert_eq!(
        ledger.state().booking(booking).unwrap().status(),
        BookingStatus::Cancelled
    );
    assert_eq!(
        ledger.state().pricing(pricing_id).unwrap().status(),
        PricingStatus::Cancelled
    );
    assert_eq!(
        ledger.state().finance_event(event).unwrap().status(),
        FinanceEventStatus::Cancelled
    );
    // its revenue no longer counts toward the tiers
    let other = stock;
    let (_, event2) = book_and_use(&mut ledger, user, other, 1, 5);
    let p2 = price_event(&mut ledger, event2).unwrap();
    assert_eq!(ledger.state().pricing(p2).unwrap().revenue(), 10_00);
}

#[test]
fn test_failure_isolation_per_pricing_point() {
    let (mut ledger, venue_ok, user) = setup();
    let venue_bad = ledger.add_venue("conflicting rules");
    ledger
        .link_venue_to_pricing_point(venue_bad, venue_bad, t_link())
        .unwrap();
    // two active venue-scoped custom rules: resolution must fail
    for rate in [8_000, 9_000] {
        ledger.add_custom_rule(|id| {
            CustomReimbursementRule::new(
                id,
                CustomRuleScope::Venue(venue_bad),
                CustomRuleKind::RateBps(rate),
                t_link(),
                None,
            )
        });
    }
    let stock_ok = stock(&mut ledger, venue_ok, 10_00, OfferCategory::General);
    let stock_bad = stock(&mut ledger, venue_bad, 10_00, OfferCategory::General);
    book_and_use(&mut ledger, user, stock_bad, 1, 2);
    book_and_use(&mut ledger, user, stock_bad, 1, 3);
    book_and_use(&mut ledger, user, stock_ok, 1, 4);

    let report = price_ready_events(&mut ledger, t(28));
    assert_eq!(report.priced.len(), 1); // the healthy venue
    assert_eq!(report.failed.len(), 1); // first event of the bad venue
    assert_eq!(report.skipped.len(), 1); // its younger sibling
    assert!(report.deferred.is_empty());
}
