//! Stock-quantity and wallet-balance invariants.
//!
//! Both invariants are aggregates over bookings, so a single-row check
//! at insert time is not enough: two writes in one transaction can
//! each pass alone and jointly overdraw. The atomic coordinator
//! therefore records which (stock, user) aggregates a transaction
//! touched and re-runs the guard once against the candidate state,
//! right before the outer commit. A failure rolls the whole
//! transaction back.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::money::Cents;
use crate::models::{BookingId, StockId, UserId};
use crate::store::LedgerState;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GuardError {
    #[error("too many bookings: stock {stock} holds {booked} booked units for a quantity of {quantity}")]
    TooManyBookings {
        stock: StockId,
        quantity: u32,
        booked: u64,
    },
    #[error("insufficient funds: user {user} would overdraw the {domain} credit pool by {overdraft} cents")]
    InsufficientFunds {
        user: UserId,
        domain: CreditDomain,
        overdraft: Cents,
    },
    #[error("booking {0} not found")]
    UnknownBooking(BookingId),
    #[error("booking {booking} references missing stock {stock}")]
    MissingStock { booking: BookingId, stock: StockId },
    #[error("booking {booking} references missing user {user}")]
    MissingUser { booking: BookingId, user: UserId },
}

/// Which credit pool a balance violation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditDomain {
    All,
    Digital,
    Physical,
}

impl std::fmt::Display for CreditDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CreditDomain::All => "overall",
            CreditDomain::Digital => "digital",
            CreditDomain::Physical => "physical",
        };
        f.write_str(name)
    }
}

/// Aggregates touched by a transaction, collected by the coordinator.
#[derive(Debug, Default)]
pub(crate) struct TouchedAggregates {
    stocks: BTreeSet<StockId>,
    users: BTreeSet<UserId>,
}

impl TouchedAggregates {
    pub(crate) fn touch_stock(&mut self, stock: StockId) {
        self.stocks.insert(stock);
    }

    pub(crate) fn touch_user(&mut self, user: UserId) {
        self.users.insert(user);
    }
}

/// Validate one booking write: its stock's quantity bound and its
/// user's wallet balance, both including the candidate row.
pub fn validate_booking_write(state: &LedgerState, booking_id: BookingId) -> Result<(), GuardError> {
    let booking = state
        .booking(booking_id)
        .ok_or(GuardError::UnknownBooking(booking_id))?;
    if state.stock(booking.stock_id()).is_none() {
        return Err(GuardError::MissingStock {
            booking: booking_id,
            stock: booking.stock_id(),
        });
    }
    if state.user(booking.user_id()).is_none() {
        return Err(GuardError::MissingUser {
            booking: booking_id,
            user: booking.user_id(),
        });
    }
    check_stock_quantity(state, booking.stock_id())?;
    check_wallet_balance(state, booking.user_id())
}

/// Run the deferred checks for every aggregate the transaction
/// touched. Called by the coordinator right before the outer commit.
pub(crate) fn run_deferred(
    state: &LedgerState,
    touched: &TouchedAggregates,
) -> Result<(), GuardError> {
    for &stock_id in &touched.stocks {
        check_stock_quantity(state, stock_id)?;
    }
    for &user_id in &touched.users {
        check_wallet_balance(state, user_id)?;
    }
    Ok(())
}

fn check_stock_quantity(state: &LedgerState, stock_id: StockId) -> Result<(), GuardError> {
    let Some(stock) = state.stock(stock_id) else {
        // a touched stock can have been deleted by the same
        // transaction; nothing left to bound
        return Ok(());
    };
    let Some(quantity) = stock.quantity() else {
        return Ok(());
    };
    // summed as u64: individual quantities fit u32, their sum may not
    let booked: u64 = state
        .bookings()
        .filter(|b| b.stock_id() == stock_id && !b.is_cancelled())
        .map(|b| u64::from(b.quantity()))
        .sum();
    if booked > u64::from(quantity) {
        return Err(GuardError::TooManyBookings {
            stock: stock_id,
            quantity,
            booked,
        });
    }
    Ok(())
}

fn check_wallet_balance(state: &LedgerState, user_id: UserId) -> Result<(), GuardError> {
    let Some(user) = state.user(user_id) else {
        return Ok(());
    };
    let deposit = user.deposit();

    let mut spent_total: Cents = 0;
    let mut spent_digital: Cents = 0;
    let mut spent_physical: Cents = 0;
    for booking in state.bookings() {
        if booking.user_id() != user_id || booking.is_cancelled() {
            continue;
        }
        let total = booking.total_amount();
        spent_total += total;
        let digital = state
            .stock(booking.stock_id())
            .map(|s| s.is_digital())
            .unwrap_or(false);
        if digital {
            spent_digital += total;
        } else {
            spent_physical += total;
        }
    }

    if spent_total > deposit.amount() {
        return Err(GuardError::InsufficientFunds {
            user: user_id,
            domain: CreditDomain::All,
            overdraft: spent_total - deposit.amount(),
        });
    }
    if let Some(cap) = deposit.digital_cap() {
        if spent_digital > cap {
            return Err(GuardError::InsufficientFunds {
                user: user_id,
                domain: CreditDomain::Digital,
                overdraft: spent_digital - cap,
            });
        }
    }
    if let Some(cap) = deposit.physical_cap() {
        if spent_physical > cap {
            return Err(GuardError::InsufficientFunds {
                user: user_id,
                domain: CreditDomain::Physical,
                overdraft: spent_physical - cap,
            });
        }
    }
    Ok(())
}

/// Remaining overall credit of a user: deposit minus non-cancelled
/// booking totals. Reporting helper; the guard itself works on the
/// per-domain sums.
pub fn wallet_balance(state: &LedgerState, user_id: UserId) -> Option<Cents> {
    let user = state.user(user_id)?;
    let spent: Cents = state
        .bookings()
        .filter(|b| b.user_id() == user_id && !b.is_cancelled())
        .map(|b| b.total_amount())
        .sum();
    Some(user.deposit().amount() - spent)
}
