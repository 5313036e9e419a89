//! Conservation Properties - Money In Equals Money Settled
//!
//! Property-based end-to-end runs: whatever mix of bookings goes in,
//! the invoice amount must equal the sum of its lines and the sum of
//! the pricings it settles, and every amount must match the tiered
//! rates recomputed independently.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use reimbursement_ledger_core_rs::models::apply_rate_bps;
use reimbursement_ledger_core_rs::{
    accept_batch, create_booking, generate_batch, generate_invoices, mark_booking_used,
    price_ready_events, BankAccountStatus, BookingStatus, Deposit, Ledger, MemoryInvoiceStorage,
    OfferCategory, PricingStatus, RecordingNotifier, StandardRule,
};

fn t(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, day, 12, 0, 0).unwrap()
}

fn cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap()
}

/// What the pipeline should reimburse for bookings priced in order,
/// recomputed from the tier table alone.
fn expected_reimbursement(bookings: &[(i64, u32)]) -> i64 {
    let mut revenue: i64 = 0;
    let mut reimbursed: i64 = 0;
    for &(price, quantity) in bookings {
        let total = price * quantity as i64;
        revenue += total;
        let rule = StandardRule::for_booking(OfferCategory::General, revenue);
        reimbursed += apply_rate_bps(total, rule.rate_bps());
    }
    reimbursed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_invoice_conserves_priced_amounts(
        bookings in prop::collection::vec((1_00i64..=10_000_00, 1u32..=3), 1..8)
    ) {
        let mut ledger = Ledger::new();
        let venue = ledger.add_venue("propriété");
        ledger
            .link_venue_to_pricing_point(
                venue,
                venue,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
        let account = ledger.add_bank_account("FR76", BankAccountStatus::Accepted);
        ledger.link_venue_to_bank_account(venue, account).unwrap();
        let user = ledger.add_user(Deposit::uncapped(1_000_000_00));

        for (i, &(price, quantity)) in bookings.iter().enumerate() {
            let day = 2 + i as u32; // distinct usage dates fix the order
            let stock = ledger
                .add_stock(venue, price, None, None, false, OfferCategory::General)
                .unwrap();
            let booking = ledger
                .atomic(|tx| create_booking(tx, user, stock, quantity, t(day)))
                .unwrap();
            ledger
                .atomic(|tx| mark_booking_used(tx, booking, t(day)))
                .unwrap();
        }

        let report = price_ready_events(&mut ledger, cutoff());
        prop_assert_eq!(report.priced.len(), bookings.len());
        prop_assert!(report.failed.is_empty());
        prop_assert!(report.deferred.is_empty());

        let batch = generate_batch(&mut ledger, "VIR1", cutoff(), cutoff()).unwrap();
        prop_assert_eq!(batch.cashflow_ids.len(), 1);
        accept_batch(&mut ledger, batch.batch_id, cutoff()).unwrap();

        let mut storage = MemoryInvoiceStorage::new();
        let mut notifier = RecordingNotifier::new();
        let invoices = generate_invoices(
            &mut ledger,
            batch.batch_id,
            &mut storage,
            &mut notifier,
            cutoff(),
        )
        .unwrap();
        prop_assert_eq!(invoices.len(), 1);

        let invoice = ledger.state().invoice(invoices[0]).unwrap();
        let line_total: i64 = invoice.lines().iter().map(|l| l.reimbursed_amount).sum();
        let pricing_total: i64 = ledger.state().pricings().map(|p| p.amount()).sum();
        prop_assert_eq!(invoice.amount(), line_total);
        prop_assert_eq!(invoice.amount(), pricing_total);
        prop_assert_eq!(invoice.amount(), -expected_reimbursement(&bookings));

        // terminal states across the board
        for pricing in ledger.state().pricings() {
            prop_assert_eq!(pricing.status(), PricingStatus::Invoiced);
        }
        for booking in ledger.state().bookings() {
            prop_assert_eq!(booking.status(), BookingStatus::Reimbursed);
        }

        // the invoiced cashflow amount matches the invoice
        let cashflow = ledger.state().cashflow(batch.cashflow_ids[0]).unwrap();
        prop_assert_eq!(cashflow.amount(), invoice.amount());
    }
}
