//! Atomic scopes over the ledger state.
//!
//! Every mutation of the ledger happens inside `Ledger::atomic`, which
//! snapshots the state on entry and either keeps the result (commit)
//! or restores the snapshot (rollback). Scopes nest through
//! `AtomicTx::nested`, which pushes a savepoint: an error or an
//! invalidation inside the nested closure rolls back to that savepoint
//! only, unless it keeps propagating.
//!
//! Three things distinguish this from a plain checkpoint/restore:
//!
//! - deferred invariant checks: the transaction records which stock
//!   and user aggregates it touched, and the guard re-runs once against
//!   the candidate state right before the outer commit;
//! - `mark_invalid()`: forces the current scope to roll back at exit
//!   without unwinding, for callers that detect a poisoned state while
//!   holding partial work;
//! - post-commit callbacks: closures over plain values (ids, amounts;
//!   never a live row reference) that run in registration order after
//!   a successful commit, and are discarded on rollback.

use thiserror::Error;
use tracing::{error, warn};

use crate::guard::{self, GuardError, TouchedAggregates};
use crate::models::{
    BookingError, CashflowError, FinanceEventError, FinanceEventId, PricingError, StockId, UserId,
};
use crate::rules::RuleResolutionFailure;
use crate::store::{Ledger, LedgerState};

/// Top-level error for every ledger operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Event(#[from] FinanceEventError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Cashflow(#[from] CashflowError),
    #[error(transparent)]
    RuleResolution(#[from] RuleResolutionFailure),
    /// An older event of the same pricing point is still unpriced;
    /// pricing this one now would snapshot revenue out of order. The
    /// batch runner treats this as a deferral, not a failure.
    #[error("event {event} must wait for older event {blocked_by} of the same pricing point")]
    OrderingViolation {
        event: FinanceEventId,
        blocked_by: FinanceEventId,
    },
    #[error("cashflow batch label {0:?} already exists")]
    DuplicateBatchLabel(String),
    /// A candidate pricing's revenue line no longer matches its
    /// booking. The batcher skips the payee instead of paying a wrong
    /// amount.
    #[error("pricing {pricing}: revenue line does not match the booking total")]
    PricingIntegrityMismatch { pricing: crate::models::PricingId },
    #[error("unknown {entity} id {id}")]
    UnknownId { entity: &'static str, id: u64 },
    #[error("ledger integrity probe failed after commit: {0}")]
    ProbeFailed(String),
}

type PostCommitFn = Box<dyn FnOnce() -> Result<(), String>>;

struct PostCommit {
    label: &'static str,
    /// A robust callback failure is logged and the remaining callbacks
    /// still run; a non-robust failure stops the chain.
    robust: bool,
    run: PostCommitFn,
}

/// Handle to the state inside an atomic scope. Derefs to
/// [`LedgerState`], so reads and row mutations look the same inside
/// and outside a transaction.
pub struct AtomicTx<'a> {
    state: &'a mut LedgerState,
    savepoints: Vec<LedgerState>,
    /// One flag per open scope, outermost first. Never empty.
    invalid: Vec<bool>,
    touched: TouchedAggregates,
    callbacks: Vec<PostCommit>,
}

impl std::ops::Deref for AtomicTx<'_> {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        self.state
    }
}

impl std::ops::DerefMut for AtomicTx<'_> {
    fn deref_mut(&mut self) -> &mut LedgerState {
        self.state
    }
}

impl AtomicTx<'_> {
    /// Open a savepoint scope. On `Err` or `mark_invalid`, the state
    /// rolls back to the savepoint; the error still propagates to the
    /// caller (which may handle it), while an invalidation marks the
    /// parent scope invalid too.
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.savepoints.push(self.state.clone());
        self.invalid.push(false);
        let result = f(self);
        let savepoint = self.savepoints.pop();
        let invalid = self.invalid.pop().unwrap_or(false);
        if result.is_err() || invalid {
            if let Some(savepoint) = savepoint {
                *self.state = savepoint;
            }
            if invalid {
                if let Some(parent) = self.invalid.last_mut() {
                    *parent = true;
                }
            }
        }
        result
    }

    /// Force the current scope to roll back when it exits, without
    /// unwinding. The scope's return value is still produced, but none
    /// of its writes survive.
    pub fn mark_invalid(&mut self) {
        if let Some(current) = self.invalid.last_mut() {
            *current = true;
        }
    }

    pub fn is_marked_invalid(&self) -> bool {
        self.invalid.last().copied().unwrap_or(false)
    }

    /// Queue a closure to run after the outer commit, in registration
    /// order. Capture ids and plain values only. Discarded if the
    /// transaction rolls back.
    pub fn on_commit(
        &mut self,
        label: &'static str,
        robust: bool,
        run: impl FnOnce() -> Result<(), String> + 'static,
    ) {
        self.callbacks.push(PostCommit {
            label,
            robust,
            run: Box::new(run),
        });
    }

    pub(crate) fn touch_stock(&mut self, stock: StockId) {
        self.touched.touch_stock(stock);
    }

    pub(crate) fn touch_user(&mut self, user: UserId) {
        self.touched.touch_user(user);
    }
}

impl Ledger {
    /// Run `f` in an atomic scope over the whole state.
    ///
    /// Commit path: deferred guard checks, then the commit itself,
    /// then a cheap integrity probe (a probe failure restores the
    /// snapshot and surfaces as `ProbeFailed`), then the post-commit
    /// callbacks. Rollback paths: `f` returns `Err`, a deferred check
    /// fails, or the outer scope was marked invalid — the last one
    /// rolls back silently and still returns `f`'s value.
    pub fn atomic<T>(
        &mut self,
        f: impl FnOnce(&mut AtomicTx) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let snapshot = self.state.clone();
        let mut tx = AtomicTx {
            state: &mut self.state,
            savepoints: Vec::new(),
            invalid: vec![false],
            touched: TouchedAggregates::default(),
            callbacks: Vec::new(),
        };
        let result = f(&mut tx);
        debug_assert!(tx.savepoints.is_empty(), "unbalanced savepoint scope");
        let invalid = tx.invalid.first().copied().unwrap_or(false);
        let touched = std::mem::take(&mut tx.touched);
        let callbacks = std::mem::take(&mut tx.callbacks);

        let value = match result {
            Err(e) => {
                self.state = snapshot;
                return Err(e);
            }
            Ok(value) if invalid => {
                warn!("atomic scope marked invalid; rolling back");
                self.state = snapshot;
                return Ok(value);
            }
            Ok(value) => value,
        };

        if let Err(guard_error) = guard::run_deferred(&self.state, &touched) {
            self.state = snapshot;
            return Err(guard_error.into());
        }

        // committed; the probe only catches operation bugs
        if let Err(probe) = self.state.integrity_probe() {
            error!(error = %probe, "integrity probe failed after commit; restoring snapshot");
            self.state = snapshot;
            return Err(LedgerError::ProbeFailed(probe));
        }

        for callback in callbacks {
            if let Err(message) = (callback.run)() {
                if callback.robust {
                    error!(callback = callback.label, error = %message, "post-commit callback failed; continuing");
                } else {
                    error!(callback = callback.label, error = %message, "post-commit callback failed; skipping the rest");
                    break;
                }
            }
        }

        Ok(value)
    }
}
