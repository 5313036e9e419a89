//! Finance events: the facts the pricing engine consumes.
//!
//! A finance event records that a booking became reimbursement-relevant
//! (or stopped being so). Events for a pricing point must be priced in
//! ascending `(pricing_ordering_date, id)` order, because each pricing
//! snapshots the cumulative revenue at its value date.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{BookingId, FinanceEventId, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinanceEventStatus {
    /// Waiting for the venue to get a pricing point.
    Pending,
    /// Ready to be priced.
    Ready,
    Priced,
    Cancelled,
    /// Recorded for audit but never priced (e.g. the cancellation of
    /// an already-used booking).
    NotToBePriced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinanceEventMotive {
    BookingUsed,
    BookingCancelledAfterUse,
    /// Reverses an already-invoiced pricing after a post-hoc
    /// cancellation; priced as the sign-flip of the original.
    ReversalOfInvoicedPricing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinanceEventError {
    #[error("finance event {id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: FinanceEventId,
        from: FinanceEventStatus,
        to: FinanceEventStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceEvent {
    id: FinanceEventId,
    booking_id: BookingId,
    venue_id: VenueId,
    motive: FinanceEventMotive,
    status: FinanceEventStatus,
    /// The date the priced amount is accounted under.
    value_date: DateTime<Utc>,
    /// Set when the venue has a pricing point; `None` while Pending.
    pricing_point_id: Option<VenueId>,
    /// max(pricing-point link start, stock event date, booking usage
    /// date). `None` while Pending.
    pricing_ordering_date: Option<DateTime<Utc>>,
}

impl FinanceEvent {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: FinanceEventId,
        booking_id: BookingId,
        venue_id: VenueId,
        motive: FinanceEventMotive,
        status: FinanceEventStatus,
        value_date: DateTime<Utc>,
        pricing_point_id: Option<VenueId>,
        pricing_ordering_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            booking_id,
            venue_id,
            motive,
            status,
            value_date,
            pricing_point_id,
            pricing_ordering_date,
        }
    }

    pub fn id(&self) -> FinanceEventId {
        self.id
    }

    pub fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    pub fn motive(&self) -> FinanceEventMotive {
        self.motive
    }

    pub fn status(&self) -> FinanceEventStatus {
        self.status
    }

    pub fn value_date(&self) -> DateTime<Utc> {
        self.value_date
    }

    pub fn pricing_point_id(&self) -> Option<VenueId> {
        self.pricing_point_id
    }

    pub fn pricing_ordering_date(&self) -> Option<DateTime<Utc>> {
        self.pricing_ordering_date
    }

    /// PENDING -> READY, once the venue's pricing point is known.
    pub(crate) fn make_ready(
        &mut self,
        pricing_point_id: VenueId,
        pricing_ordering_date: DateTime<Utc>,
    ) -> Result<(), FinanceEventError> {
        match self.status {
            FinanceEventStatus::Pending => {
                self.status = FinanceEventStatus::Ready;
                self.pricing_point_id = Some(pricing_point_id);
                self.pricing_ordering_date = Some(pricing_ordering_date);
                Ok(())
            }
            from => Err(FinanceEventError::InvalidTransition {
                id: self.id,
                from,
                to: FinanceEventStatus::Ready,
            }),
        }
    }

    /// READY -> PRICED, set by the pricing engine.
    pub(crate) fn mark_priced(&mut self) -> Result<(), FinanceEventError> {
        match self.status {
            FinanceEventStatus::Ready => {
                self.status = FinanceEventStatus::Priced;
                Ok(())
            }
            from => Err(FinanceEventError::InvalidTransition {
                id: self.id,
                from,
                to: FinanceEventStatus::Priced,
            }),
        }
    }

    /// Any non-terminal status -> CANCELLED.
    pub(crate) fn cancel(&mut self) -> Result<(), FinanceEventError> {
        match self.status {
            FinanceEventStatus::Pending
            | FinanceEventStatus::Ready
            | FinanceEventStatus::Priced => {
                self.status = FinanceEventStatus::Cancelled;
                Ok(())
            }
            from => Err(FinanceEventError::InvalidTransition {
                id: self.id,
                from,
                to: FinanceEventStatus::Cancelled,
            }),
        }
    }
}
