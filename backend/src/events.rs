//! Upstream boundary: booking lifecycle operations and the finance
//! events they produce.
//!
//! The web and admin layers only ever tell the core that a booking was
//! created, used, or cancelled. Everything downstream (pricing,
//! cashflows, invoices) is driven by the finance events recorded here.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::atomic::{AtomicTx, LedgerError};
use crate::models::{
    BookingId, CancellationReason, FinanceEvent, FinanceEventId, FinanceEventMotive,
    FinanceEventStatus, PricingStatus, StockId, UserId, VenueId,
};
use crate::store::LedgerState;

/// Insert a booking. The quantity and credit invariants are enforced
/// by the deferred guard at commit, not here, so several bookings
/// created in one scope are checked jointly.
pub fn create_booking(
    tx: &mut AtomicTx,
    user_id: UserId,
    stock_id: StockId,
    quantity: u32,
    now: DateTime<Utc>,
) -> Result<BookingId, LedgerError> {
    let stock = tx.stock(stock_id).ok_or(LedgerError::UnknownId {
        entity: "stock",
        id: stock_id.0,
    })?;
    if stock.is_soft_deleted() {
        return Err(LedgerError::UnknownId {
            entity: "stock",
            id: stock_id.0,
        });
    }
    let price = stock.price();
    if tx.user(user_id).is_none() {
        return Err(LedgerError::UnknownId {
            entity: "user",
            id: user_id.0,
        });
    }
    let booking_id = tx.insert_booking(user_id, stock_id, quantity, price, now);
    tx.touch_stock(stock_id);
    tx.touch_user(user_id);
    Ok(booking_id)
}

/// Mark a booking used and record the finance event that will get it
/// priced.
pub fn mark_booking_used(
    tx: &mut AtomicTx,
    booking_id: BookingId,
    when: DateTime<Utc>,
) -> Result<FinanceEventId, LedgerError> {
    let booking = tx.booking_mut(booking_id).ok_or(LedgerError::UnknownId {
        entity: "booking",
        id: booking_id.0,
    })?;
    booking.mark_used(when)?;
    add_event(tx, booking_id, FinanceEventMotive::BookingUsed, when)
}

/// Cancel a booking.
///
/// For a used booking the dependent pricing decides what happens:
/// - no pricing yet, or still VALIDATED: the pricing and its event are
///   cancelled;
/// - PROCESSED (already in a pending cashflow): cancellation is
///   refused — the transfer is in flight;
/// - INVOICED: the booking is cancelled and a reversal event is
///   recorded, priced later as the sign-flip of the original pricing.
pub fn cancel_booking(
    tx: &mut AtomicTx,
    booking_id: BookingId,
    reason: CancellationReason,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let booking = tx
        .booking(booking_id)
        .ok_or(LedgerError::UnknownId {
            entity: "booking",
            id: booking_id.0,
        })?
        .clone();

    let was_used = booking.date_used().is_some();
    let mut needs_reversal = false;
    if was_used {
        let pricing = tx
            .active_pricing_for_booking(booking_id)
            .map(|p| (p.id(), p.status()));
        match pricing {
            Some((pricing_id, PricingStatus::Processed)) => {
                return Err(crate::models::PricingError::NonCancellable { id: pricing_id }.into());
            }
            Some((_, PricingStatus::Invoiced)) => {
                needs_reversal = true;
            }
            _ => {
                cancel_latest_event(tx, booking_id, now)?;
            }
        }
    }

    let booking_row = tx.booking_mut(booking_id).ok_or(LedgerError::UnknownId {
        entity: "booking",
        id: booking_id.0,
    })?;
    booking_row.cancel(reason, now)?;
    tx.touch_stock(booking.stock_id());
    tx.touch_user(booking.user_id());

    if was_used {
        // audit trail: the cancellation itself is a finance fact
        add_event(tx, booking_id, FinanceEventMotive::BookingCancelledAfterUse, now)?;
        if needs_reversal {
            let event_id =
                add_event(tx, booking_id, FinanceEventMotive::ReversalOfInvoicedPricing, now)?;
            info!(booking = %booking_id, event = %event_id, "recorded reversal event for invoiced pricing");
        }
    }
    Ok(())
}

/// Record a finance event for a booking.
///
/// `BookingUsed` and `ReversalOfInvoicedPricing` events are priced;
/// they start READY when the venue has a pricing point, PENDING
/// otherwise. `BookingCancelledAfterUse` is audit-only
/// (NOT_TO_BE_PRICED).
pub fn add_event(
    tx: &mut AtomicTx,
    booking_id: BookingId,
    motive: FinanceEventMotive,
    now: DateTime<Utc>,
) -> Result<FinanceEventId, LedgerError> {
    let booking = tx
        .booking(booking_id)
        .ok_or(LedgerError::UnknownId {
            entity: "booking",
            id: booking_id.0,
        })?
        .clone();
    let stock = tx
        .stock(booking.stock_id())
        .ok_or(LedgerError::UnknownId {
            entity: "stock",
            id: booking.stock_id().0,
        })?
        .clone();
    let venue_id = stock.venue_id();
    let venue = tx.venue(venue_id).ok_or(LedgerError::UnknownId {
        entity: "venue",
        id: venue_id.0,
    })?;

    let (status, value_date, pricing_point, ordering_date) = match motive {
        FinanceEventMotive::BookingUsed | FinanceEventMotive::ReversalOfInvoicedPricing => {
            let value_date = match motive {
                FinanceEventMotive::BookingUsed => booking.date_used().unwrap_or(now),
                _ => now,
            };
            match venue.pricing_point() {
                Some(link) => {
                    let ordering =
                        pricing_ordering_date(link.since, stock.event_datetime(), value_date);
                    (
                        FinanceEventStatus::Ready,
                        value_date,
                        Some(link.pricing_point_id),
                        Some(ordering),
                    )
                }
                None => (FinanceEventStatus::Pending, value_date, None, None),
            }
        }
        FinanceEventMotive::BookingCancelledAfterUse => {
            (FinanceEventStatus::NotToBePriced, now, None, None)
        }
    };

    let event_id = tx.insert_finance_event(|id| {
        FinanceEvent::new(
            id,
            booking_id,
            venue_id,
            motive,
            status,
            value_date,
            pricing_point,
            ordering_date,
        )
    });
    Ok(event_id)
}

/// Cancel the latest priceable event of a booking, together with its
/// pricing when one exists. Returns the cancelled event, if any.
pub fn cancel_latest_event(
    tx: &mut AtomicTx,
    booking_id: BookingId,
    now: DateTime<Utc>,
) -> Result<Option<FinanceEventId>, LedgerError> {
    let candidate = tx
        .finance_events()
        .filter(|e| {
            e.booking_id() == booking_id
                && matches!(
                    e.motive(),
                    FinanceEventMotive::BookingUsed | FinanceEventMotive::ReversalOfInvoicedPricing
                )
                && matches!(
                    e.status(),
                    FinanceEventStatus::Pending
                        | FinanceEventStatus::Ready
                        | FinanceEventStatus::Priced
                )
        })
        .map(|e| e.id())
        .max();
    let Some(event_id) = candidate else {
        return Ok(None);
    };

    if let Some(pricing_id) = tx.active_pricing_for_event(event_id).map(|p| p.id()) {
        let pricing = tx.pricing_mut(pricing_id).ok_or(LedgerError::UnknownId {
            entity: "pricing",
            id: pricing_id.0,
        })?;
        pricing.cancel(now)?;
    }
    let event = tx
        .finance_event_mut(event_id)
        .ok_or(LedgerError::UnknownId {
            entity: "finance event",
            id: event_id.0,
        })?;
    event.cancel()?;
    info!(booking = %booking_id, event = %event_id, "cancelled finance event");
    Ok(Some(event_id))
}

/// `max(pricing-point link start, stock event date, usage date)`.
///
/// Using the link start pins events of a re-linked venue after all
/// already-priced revenue of the new pricing point; using the stock
/// event date keeps pricing after the show actually happened.
pub fn pricing_ordering_date(
    link_since: DateTime<Utc>,
    stock_event: Option<DateTime<Utc>>,
    used_date: DateTime<Utc>,
) -> DateTime<Utc> {
    let mut ordering = link_since.max(used_date);
    if let Some(event_date) = stock_event {
        ordering = ordering.max(event_date);
    }
    ordering
}

/// Promote PENDING events of a venue to READY once the venue gets a
/// pricing point. Called by the setup path that creates the link.
pub(crate) fn ready_pending_events(
    state: &mut LedgerState,
    venue_id: VenueId,
) -> Result<(), LedgerError> {
    let Some(link) = state.venue(venue_id).and_then(|v| v.pricing_point()).cloned() else {
        return Ok(());
    };
    let pending: Vec<FinanceEventId> = state
        .finance_events()
        .filter(|e| e.venue_id() == venue_id && e.status() == FinanceEventStatus::Pending)
        .map(|e| e.id())
        .collect();
    for event_id in pending {
        let Some(event) = state.finance_event(event_id) else {
            continue;
        };
        let booking_id = event.booking_id();
        let value_date = event.value_date();
        let stock_event = state
            .booking(booking_id)
            .and_then(|b| state.stock(b.stock_id()))
            .and_then(|s| s.event_datetime());
        let ordering = pricing_ordering_date(link.since, stock_event, value_date);
        if let Some(event) = state.finance_event_mut(event_id) {
            event.make_ready(link.pricing_point_id, ordering)?;
        }
    }
    Ok(())
}
