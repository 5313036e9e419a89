//! Pricings: the computed reimbursement for one finance event.
//!
//! Pricings are append-only. A wrong pricing is never edited in place:
//! it is cancelled (if not yet invoiced) or reversed by a sign-flipped
//! sibling (if already invoiced). Every status change appends a
//! `PricingLog` entry, so the full history of a pricing is on the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{BookingId, FinanceEventId, PricingId, VenueId};
use super::money::Cents;
use crate::rules::RuleRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingStatus {
    /// Computed, waiting to enter a cashflow batch.
    Validated,
    /// Linked to a cashflow; leaves this status when invoiced, or
    /// returns to Validated if the cashflow is rejected.
    Processed,
    /// Settled by an invoice. Terminal.
    Invoiced,
    /// Reversed before invoicing. Terminal.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingLineCategory {
    /// The venue's gross revenue for the booking, negated (we owe it).
    OffererRevenue,
    /// The part the offerer contributes back when reimbursement is
    /// partial.
    OffererContribution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingLine {
    pub category: PricingLineCategory,
    pub amount: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingLogReason {
    GenerateCashflow,
    GenerateInvoice,
    RejectCashflow,
    CancelBooking,
}

/// One status change of a pricing, kept on the row forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingLog {
    pub timestamp: DateTime<Utc>,
    pub status_before: PricingStatus,
    pub status_after: PricingStatus,
    pub reason: PricingLogReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("pricing {id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: PricingId,
        from: PricingStatus,
        to: PricingStatus,
    },
    #[error("pricing {id} is invoiced and can no longer be cancelled")]
    NonCancellable { id: PricingId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    id: PricingId,
    event_id: FinanceEventId,
    /// `None` for reversal pricings, which must not count against the
    /// one-non-cancelled-pricing-per-booking rule.
    booking_id: Option<BookingId>,
    venue_id: VenueId,
    pricing_point_id: VenueId,
    status: PricingStatus,
    /// Sum of the lines. Negative means we owe the payee.
    amount: Cents,
    /// Pricing-point cumulative revenue at the value date, including
    /// the priced booking. Snapshot used by the tiered rules.
    revenue: Cents,
    rule: RuleRef,
    value_date: DateTime<Utc>,
    lines: Vec<PricingLine>,
    logs: Vec<PricingLog>,
}

impl Pricing {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PricingId,
        event_id: FinanceEventId,
        booking_id: Option<BookingId>,
        venue_id: VenueId,
        pricing_point_id: VenueId,
        amount: Cents,
        revenue: Cents,
        rule: RuleRef,
        value_date: DateTime<Utc>,
        lines: Vec<PricingLine>,
    ) -> Self {
        debug_assert_eq!(amount, lines.iter().map(|l| l.amount).sum::<Cents>());
        Self {
            id,
            event_id,
            booking_id,
            venue_id,
            pricing_point_id,
            status: PricingStatus::Validated,
            amount,
            revenue,
            rule,
            value_date,
            lines,
            logs: Vec::new(),
        }
    }

    pub fn id(&self) -> PricingId {
        self.id
    }

    pub fn event_id(&self) -> FinanceEventId {
        self.event_id
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        self.booking_id
    }

    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    pub fn pricing_point_id(&self) -> VenueId {
        self.pricing_point_id
    }

    pub fn status(&self) -> PricingStatus {
        self.status
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn revenue(&self) -> Cents {
        self.revenue
    }

    pub fn rule(&self) -> &RuleRef {
        &self.rule
    }

    pub fn value_date(&self) -> DateTime<Utc> {
        self.value_date
    }

    pub fn lines(&self) -> &[PricingLine] {
        &self.lines
    }

    pub fn logs(&self) -> &[PricingLog] {
        &self.logs
    }

    pub fn line_amount(&self, category: PricingLineCategory) -> Cents {
        self.lines
            .iter()
            .filter(|l| l.category == category)
            .map(|l| l.amount)
            .sum()
    }

    fn log_transition(&mut self, to: PricingStatus, reason: PricingLogReason, now: DateTime<Utc>) {
        self.logs.push(PricingLog {
            timestamp: now,
            status_before: self.status,
            status_after: to,
            reason,
        });
        self.status = to;
    }

    /// VALIDATED -> PROCESSED, when the pricing enters a cashflow.
    pub(crate) fn mark_processed(&mut self, now: DateTime<Utc>) -> Result<(), PricingError> {
        match self.status {
            PricingStatus::Validated => {
                self.log_transition(PricingStatus::Processed, PricingLogReason::GenerateCashflow, now);
                Ok(())
            }
            from => Err(PricingError::InvalidTransition {
                id: self.id,
                from,
                to: PricingStatus::Processed,
            }),
        }
    }

    /// PROCESSED -> INVOICED. Terminal.
    pub(crate) fn mark_invoiced(&mut self, now: DateTime<Utc>) -> Result<(), PricingError> {
        match self.status {
            PricingStatus::Processed => {
                self.log_transition(PricingStatus::Invoiced, PricingLogReason::GenerateInvoice, now);
                Ok(())
            }
            from => Err(PricingError::InvalidTransition {
                id: self.id,
                from,
                to: PricingStatus::Invoiced,
            }),
        }
    }

    /// PROCESSED -> VALIDATED, when the linked cashflow is rejected by
    /// the bank. The pricing becomes eligible for the next batch. An
    /// invoiced pricing never reverts.
    pub(crate) fn revert_to_validated(&mut self, now: DateTime<Utc>) -> Result<(), PricingError> {
        match self.status {
            PricingStatus::Processed => {
                self.log_transition(PricingStatus::Validated, PricingLogReason::RejectCashflow, now);
                Ok(())
            }
            from => Err(PricingError::InvalidTransition {
                id: self.id,
                from,
                to: PricingStatus::Validated,
            }),
        }
    }

    /// VALIDATED -> CANCELLED (booking cancelled before the pricing
    /// reached a cashflow). Processed and invoiced pricings are
    /// non-cancellable.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), PricingError> {
        match self.status {
            PricingStatus::Validated => {
                self.log_transition(PricingStatus::Cancelled, PricingLogReason::CancelBooking, now);
                Ok(())
            }
            PricingStatus::Processed | PricingStatus::Invoiced => {
                Err(PricingError::NonCancellable { id: self.id })
            }
            from => Err(PricingError::InvalidTransition {
                id: self.id,
                from,
                to: PricingStatus::Cancelled,
            }),
        }
    }
}
