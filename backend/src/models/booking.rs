//! Bookings and their status lifecycle.
//!
//! Status moves forward only: CONFIRMED -> USED -> REIMBURSED, with
//! CANCELLED reachable from every other status (a reimbursed booking
//! can still be cancelled for fraud; the reimbursement is then
//! reversed). CANCELLED is terminal. Transition methods enforce this;
//! callers get an `InvalidTransition` error instead of a silently
//! corrupted row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{BookingId, StockId, UserId};
use super::money::Cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Used,
    Cancelled,
    Reimbursed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    Beneficiary,
    Offerer,
    Expired,
    Fraud,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("booking {id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
}

/// A reservation of `quantity` units of a stock by a user.
///
/// `amount` is the unit price frozen at booking time; the total value
/// of the booking is `amount * quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    user_id: UserId,
    stock_id: StockId,
    quantity: u32,
    amount: Cents,
    status: BookingStatus,
    date_created: DateTime<Utc>,
    date_used: Option<DateTime<Utc>>,
    cancellation_date: Option<DateTime<Utc>>,
    cancellation_reason: Option<CancellationReason>,
    reimbursement_date: Option<DateTime<Utc>>,
}

impl Booking {
    pub(crate) fn new(
        id: BookingId,
        user_id: UserId,
        stock_id: StockId,
        quantity: u32,
        amount: Cents,
        date_created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            stock_id,
            quantity,
            amount,
            status: BookingStatus::Confirmed,
            date_created,
            date_used: None,
            cancellation_date: None,
            cancellation_reason: None,
            reimbursement_date: None,
        }
    }

    pub fn id(&self) -> BookingId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn stock_id(&self) -> StockId {
        self.stock_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit price in euro cents.
    pub fn amount(&self) -> Cents {
        self.amount
    }

    /// Total value of the booking: unit price times quantity.
    pub fn total_amount(&self) -> Cents {
        self.amount * self.quantity as i64
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    pub fn date_used(&self) -> Option<DateTime<Utc>> {
        self.date_used
    }

    pub fn cancellation_reason(&self) -> Option<CancellationReason> {
        self.cancellation_reason
    }

    pub fn reimbursement_date(&self) -> Option<DateTime<Utc>> {
        self.reimbursement_date
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }

    /// CONFIRMED -> USED. Records the usage date the pricing engine
    /// later uses as part of the ordering date.
    pub(crate) fn mark_used(&mut self, when: DateTime<Utc>) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Confirmed => {
                self.status = BookingStatus::Used;
                self.date_used = Some(when);
                Ok(())
            }
            from => Err(BookingError::InvalidTransition {
                id: self.id,
                from,
                to: BookingStatus::Used,
            }),
        }
    }

    /// Any status but CANCELLED -> CANCELLED. Cancelling a reimbursed
    /// booking is the fraud path; the caller records the reversal.
    pub(crate) fn cancel(
        &mut self,
        reason: CancellationReason,
        when: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Confirmed | BookingStatus::Used | BookingStatus::Reimbursed => {
                self.status = BookingStatus::Cancelled;
                self.cancellation_date = Some(when);
                self.cancellation_reason = Some(reason);
                Ok(())
            }
            from => Err(BookingError::InvalidTransition {
                id: self.id,
                from,
                to: BookingStatus::Cancelled,
            }),
        }
    }

    /// USED -> REIMBURSED, set by the invoice generator. A booking
    /// cancelled between pricing and invoicing keeps its CANCELLED
    /// status; the generator skips it rather than calling this.
    pub(crate) fn mark_reimbursed(&mut self, when: DateTime<Utc>) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Used => {
                self.status = BookingStatus::Reimbursed;
                self.reimbursement_date = Some(when);
                Ok(())
            }
            from => Err(BookingError::InvalidTransition {
                id: self.id,
                from,
                to: BookingStatus::Reimbursed,
            }),
        }
    }
}
