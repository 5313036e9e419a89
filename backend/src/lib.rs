//! Reimbursement Ledger Core
//!
//! In-memory financial core of a cultural-booking platform: used
//! bookings become priced reimbursements, reimbursements are batched
//! into bank transfers, and accepted transfers are settled by
//! numbered, immutable invoices.
//!
//! # Architecture
//!
//! - **models**: Domain rows (Stock, Booking, FinanceEvent, Pricing,
//!   Cashflow, Invoice) with monotonic status lifecycles
//! - **store**: The relational state and the `Ledger` handle
//! - **atomic**: Atomic scopes with savepoints, deferred invariant
//!   checks and post-commit callbacks
//! - **guard**: Stock-quantity and wallet-balance invariants
//! - **rules**: Standard tiered and custom reimbursement rules
//! - **events**: Booking lifecycle hooks producing finance events
//! - **pricing / cashflow / invoice**: The three batch stages
//! - **external**: Object-store and notification seams
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 euro cents; rates are basis points
//! 2. Statuses only move forward; corrections are appended, never
//!    edited in place
//! 3. Every mutation goes through an atomic scope

// Module declarations
pub mod atomic;
pub mod cashflow;
pub mod events;
pub mod external;
pub mod guard;
pub mod invoice;
pub mod models;
pub mod pricing;
pub mod rules;
pub mod store;

// Re-exports for convenience
pub use atomic::{AtomicTx, LedgerError};
pub use cashflow::{
    accept_batch, accept_cashflow, generate_batch, next_batch_label, reject_cashflow, BatchReport,
};
pub use events::{cancel_booking, create_booking, mark_booking_used};
pub use external::{
    BatchExportNotifier, InvoiceStorage, MemoryInvoiceStorage, NotifyError, RecordingNotifier,
    StorageError,
};
pub use guard::{validate_booking_write, wallet_balance, CreditDomain, GuardError};
pub use invoice::{generate_invoices, mark_invoice_paid};
pub use models::{
    BankAccount, BankAccountId, BankAccountStatus, Booking, BookingId, BookingStatus,
    CancellationReason, Cashflow, CashflowBatch, CashflowBatchId, CashflowId, CashflowLog,
    CashflowLogReason, CashflowStatus, Cents, CustomRuleId, Deposit, FinanceEvent,
    FinanceEventId, FinanceEventMotive, FinanceEventStatus, Invoice, InvoiceId, InvoiceLine,
    InvoiceStatus, OfferCategory, Pricing, PricingError, PricingId, PricingLine,
    PricingLineCategory, PricingLog, PricingLogReason, PricingStatus, Stock, StockId, User, UserId,
    Venue, VenueId,
};
pub use pricing::{price_event, price_ready_events, PricingReport};
pub use rules::{
    CustomReimbursementRule, CustomRuleKind, CustomRuleScope, RuleGroup, RuleRef,
    RuleResolutionFailure, StandardRule,
};
pub use store::{Ledger, LedgerState};
