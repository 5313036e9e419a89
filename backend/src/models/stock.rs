//! Stocks: the sellable units bookings are taken against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{StockId, VenueId};
use super::money::Cents;

/// Reimbursement category of the offer behind a stock.
///
/// Books are reimbursed at a flat rate regardless of revenue;
/// some categories are never reimbursed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferCategory {
    General,
    Book,
    NotReimbursable,
}

/// A stock row: unit price, optional quantity cap, optional event date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    id: StockId,
    venue_id: VenueId,
    /// Unit price in euro cents (never negative).
    price: Cents,
    /// `None` means unlimited.
    quantity: Option<u32>,
    /// Set for event offers (concerts, shows); `None` for goods.
    event_datetime: Option<DateTime<Utc>>,
    /// Digital goods draw on the digital credit pool.
    digital: bool,
    category: OfferCategory,
    soft_deleted: bool,
}

impl Stock {
    pub(crate) fn new(
        id: StockId,
        venue_id: VenueId,
        price: Cents,
        quantity: Option<u32>,
        event_datetime: Option<DateTime<Utc>>,
        digital: bool,
        category: OfferCategory,
    ) -> Self {
        Self {
            id,
            venue_id,
            price,
            quantity,
            event_datetime,
            digital,
            category,
            soft_deleted: false,
        }
    }

    pub fn id(&self) -> StockId {
        self.id
    }

    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    pub fn price(&self) -> Cents {
        self.price
    }

    pub fn quantity(&self) -> Option<u32> {
        self.quantity
    }

    pub fn event_datetime(&self) -> Option<DateTime<Utc>> {
        self.event_datetime
    }

    pub fn is_digital(&self) -> bool {
        self.digital
    }

    pub fn category(&self) -> OfferCategory {
        self.category
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.soft_deleted
    }

    pub(crate) fn soft_delete(&mut self) {
        self.soft_deleted = true;
    }
}
