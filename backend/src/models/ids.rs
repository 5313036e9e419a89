//! Typed identifiers
//!
//! Every table in the ledger is keyed by its own id newtype. Ids are
//! plain `u64` values issued by per-table sequences (see `store`), so
//! they can safely cross the atomic-scope boundary: post-commit
//! callbacks receive ids, never live row handles.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// A sellable unit of an offer.
    StockId
);
define_id!(
    /// A reservation of a stock by a user.
    BookingId
);
define_id!(
    /// A beneficiary with a credit deposit.
    UserId
);
define_id!(
    /// A venue; also used for pricing points, which are venues.
    VenueId
);
define_id!(
    /// A payee bank account.
    BankAccountId
);
define_id!(
    /// A reimbursement-relevant fact about a booking.
    FinanceEventId
);
define_id!(
    /// The computed reimbursement for one finance event.
    PricingId
);
define_id!(
    /// A transfer instruction for one payee.
    CashflowId
);
define_id!(
    /// A dated, labeled run grouping cashflows.
    CashflowBatchId
);
define_id!(
    /// An immutable accounting document.
    InvoiceId
);
define_id!(
    /// An offer/venue-specific reimbursement override.
    CustomRuleId
);

/// Monotonic id generator for one table.
///
/// Ids start at 1 so that 0 never refers to a row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    /// Issue the next id value. Never reuses a value.
    pub fn next_value(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}
