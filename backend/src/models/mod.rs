//! Domain models for the reimbursement ledger

pub mod booking;
pub mod cashflow;
pub mod event;
pub mod ids;
pub mod invoice;
pub mod money;
pub mod pricing;
pub mod stock;
pub mod user;
pub mod venue;

// Re-exports
pub use booking::{Booking, BookingError, BookingStatus, CancellationReason};
pub use cashflow::{
    Cashflow, CashflowBatch, CashflowError, CashflowLog, CashflowLogReason, CashflowStatus,
    CASHFLOW_BATCH_LABEL_PREFIX,
};
pub use event::{FinanceEvent, FinanceEventError, FinanceEventMotive, FinanceEventStatus};
pub use ids::{
    BankAccountId, BookingId, CashflowBatchId, CashflowId, CustomRuleId, FinanceEventId,
    IdSequence, InvoiceId, PricingId, StockId, UserId, VenueId,
};
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus, ReferenceScheme};
pub use money::{apply_rate_bps, format_cents, ratio_as_bps, Cents, BPS_SCALE};
pub use pricing::{
    Pricing, PricingError, PricingLine, PricingLineCategory, PricingLog, PricingLogReason,
    PricingStatus,
};
pub use stock::{OfferCategory, Stock};
pub use user::{Deposit, User};
pub use venue::{BankAccount, BankAccountStatus, PricingPointLink, Venue};
