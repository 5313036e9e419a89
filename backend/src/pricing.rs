//! The pricing engine: turns READY finance events into pricings.
//!
//! Pricing is order-sensitive. Each pricing snapshots the pricing
//! point's cumulative yearly revenue, and the standard rules are
//! tiered on that revenue, so events of one pricing point must be
//! priced in ascending `(pricing_ordering_date, event id)` order. An
//! event whose older sibling is still unpriced is deferred, not
//! failed.

use chrono::{DateTime, Datelike, Utc};
use tracing::{info, warn};

use crate::atomic::{AtomicTx, LedgerError};
use crate::models::money::Cents;
use crate::models::{
    FinanceEventId, FinanceEventMotive, FinanceEventStatus, Pricing, PricingId, PricingLine,
    PricingLineCategory, PricingStatus, VenueId,
};
use crate::rules::{self, RuleAmount, RuleRef};
use crate::store::Ledger;

/// Outcome of one `price_ready_events` run.
#[derive(Debug, Default)]
pub struct PricingReport {
    pub priced: Vec<PricingId>,
    /// Deferred by the ordering rule; retried on the next run.
    pub deferred: Vec<FinanceEventId>,
    /// Skipped because an earlier event of the same pricing point
    /// failed in this run.
    pub skipped: Vec<FinanceEventId>,
    pub failed: Vec<(FinanceEventId, String)>,
}

/// Price one event in its own atomic scope.
pub fn price_event(ledger: &mut Ledger, event_id: FinanceEventId) -> Result<PricingId, LedgerError> {
    ledger.atomic(|tx| price_event_in(tx, event_id))
}

/// Price every READY event, oldest first, isolating failures per
/// pricing point: when one event fails, later events of the same
/// pricing point are skipped for this run (pricing them now would
/// snapshot revenue out of order) and every other pricing point
/// continues.
pub fn price_ready_events(ledger: &mut Ledger, now: DateTime<Utc>) -> PricingReport {
    let mut queue: Vec<(DateTime<Utc>, FinanceEventId, VenueId)> = ledger
        .state()
        .finance_events()
        .filter(|e| e.status() == FinanceEventStatus::Ready)
        .filter_map(|e| {
            let ordering = e.pricing_ordering_date()?;
            let pricing_point = e.pricing_point_id()?;
            Some((ordering, e.id(), pricing_point))
        })
        .filter(|&(ordering, _, _)| ordering <= now)
        .collect();
    queue.sort();

    let mut report = PricingReport::default();
    let mut errored_pricing_points: std::collections::BTreeSet<VenueId> =
        std::collections::BTreeSet::new();
    for (_, event_id, pricing_point) in queue {
        if errored_pricing_points.contains(&pricing_point) {
            report.skipped.push(event_id);
            continue;
        }
        match ledger.atomic(|tx| price_event_in(tx, event_id)) {
            Ok(pricing_id) => report.priced.push(pricing_id),
            Err(LedgerError::OrderingViolation { event, .. }) => report.deferred.push(event),
            Err(error) => {
                warn!(event = %event_id, pricing_point = %pricing_point, error = %error,
                    "pricing failed; skipping the pricing point for this run");
                errored_pricing_points.insert(pricing_point);
                report.failed.push((event_id, error.to_string()));
            }
        }
    }
    info!(
        priced = report.priced.len(),
        deferred = report.deferred.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "priced ready events"
    );
    report
}

/// Pricing within an already-open scope. Idempotent: an existing
/// non-cancelled pricing for the event is returned as-is.
pub fn price_event_in(
    tx: &mut AtomicTx,
    event_id: FinanceEventId,
) -> Result<PricingId, LedgerError> {
    if let Some(existing) = tx.active_pricing_for_event(event_id) {
        return Ok(existing.id());
    }
    let event = tx
        .finance_event(event_id)
        .ok_or(LedgerError::UnknownId {
            entity: "finance event",
            id: event_id.0,
        })?
        .clone();
    if event.status() != FinanceEventStatus::Ready {
        return Err(crate::models::FinanceEventError::InvalidTransition {
            id: event_id,
            from: event.status(),
            to: FinanceEventStatus::Priced,
        }
        .into());
    }
    // Ready implies both are set
    let pricing_point = event.pricing_point_id().ok_or(LedgerError::UnknownId {
        entity: "pricing point",
        id: 0,
    })?;
    let ordering_date = event.pricing_ordering_date().ok_or(LedgerError::UnknownId {
        entity: "pricing ordering date",
        id: event_id.0,
    })?;

    // ordering rule: no older READY sibling may be left unpriced
    if let Some(blocked_by) = tx
        .finance_events()
        .filter(|e| {
            e.id() != event_id
                && e.status() == FinanceEventStatus::Ready
                && e.pricing_point_id() == Some(pricing_point)
        })
        .filter_map(|e| e.pricing_ordering_date().map(|d| (d, e.id())))
        .filter(|&(d, id)| (d, id) < (ordering_date, event_id))
        .map(|(_, id)| id)
        .min()
    {
        return Err(LedgerError::OrderingViolation {
            event: event_id,
            blocked_by,
        });
    }

    let booking = tx
        .booking(event.booking_id())
        .ok_or(LedgerError::UnknownId {
            entity: "booking",
            id: event.booking_id().0,
        })?
        .clone();
    let stock = tx
        .stock(booking.stock_id())
        .ok_or(LedgerError::UnknownId {
            entity: "stock",
            id: booking.stock_id().0,
        })?
        .clone();

    let (booking_ref, amount, revenue, rule, lines) = match event.motive() {
        FinanceEventMotive::ReversalOfInvoicedPricing => {
            let original = tx
                .pricings()
                .find(|p| {
                    p.booking_id() == Some(booking.id()) && p.status() == PricingStatus::Invoiced
                })
                .ok_or(LedgerError::UnknownId {
                    entity: "invoiced pricing",
                    id: booking.id().0,
                })?;
            let lines: Vec<PricingLine> = original
                .lines()
                .iter()
                .map(|l| PricingLine {
                    category: l.category,
                    amount: -l.amount,
                })
                .collect();
            let revenue = current_revenue(tx, pricing_point, event.value_date());
            (None, -original.amount(), revenue, *original.rule(), lines)
        }
        _ => {
            let total = booking.total_amount();
            let revenue = current_revenue(tx, pricing_point, event.value_date()) + total;
            let rule = rules::resolve_rule(
                tx.custom_rules(),
                stock.id(),
                stock.venue_id(),
                stock.category(),
                event.value_date(),
                revenue,
            )?;
            let rule_amount = match rule {
                RuleRef::Standard(standard) => RuleAmount::RateBps(standard.rate_bps()),
                RuleRef::Custom(rule_id) => tx
                    .custom_rule(rule_id)
                    .ok_or(rules::RuleResolutionFailure::MissingCustomRule(rule_id))?
                    .kind()
                    .into(),
            };
            let reimbursed = rules::reimbursed_amount(rule_amount, total, booking.quantity());
            let lines = vec![
                PricingLine {
                    category: PricingLineCategory::OffererRevenue,
                    amount: -total,
                },
                PricingLine {
                    category: PricingLineCategory::OffererContribution,
                    amount: total - reimbursed,
                },
            ];
            (Some(booking.id()), -reimbursed, revenue, rule, lines)
        }
    };

    let venue_id = event.venue_id();
    let value_date = event.value_date();
    let pricing_id = tx.insert_pricing(|id| {
        Pricing::new(
            id,
            event_id,
            booking_ref,
            venue_id,
            pricing_point,
            amount,
            revenue,
            rule,
            value_date,
            lines,
        )
    });
    tx.finance_event_mut(event_id)
        .ok_or(LedgerError::UnknownId {
            entity: "finance event",
            id: event_id.0,
        })?
        .mark_priced()?;
    Ok(pricing_id)
}

/// Gross revenue already priced for a pricing point within the civil
/// year of `value_date`: the booking totals behind its non-cancelled
/// pricings (reversal pricings carry no booking and do not count).
pub fn current_revenue(
    tx: &AtomicTx,
    pricing_point: VenueId,
    value_date: DateTime<Utc>,
) -> Cents {
    let year = value_date.year();
    let mut revenue: Cents = 0;
    for pricing in tx.pricings() {
        if pricing.pricing_point_id() != pricing_point
            || pricing.status() == PricingStatus::Cancelled
            || pricing.value_date().year() != year
        {
            continue;
        }
        if let Some(booking_id) = pricing.booking_id() {
            if let Some(booking) = tx.booking(booking_id) {
                revenue += booking.total_amount();
            }
        }
    }
    revenue
}
