//! Monetary amounts and rates.
//!
//! All amounts in the ledger are signed euro cents (`i64`). The sign
//! convention follows accounting practice: a negative amount is money
//! we owe a payee, a positive amount is money owed to us.
//!
//! Reimbursement rates are integer basis points (1/100th of a percent),
//! so 9500 means 95%. This keeps the four-decimal rate precision exact
//! without a decimal type.

/// Signed euro cents.
pub type Cents = i64;

/// Number of basis points in 100%.
pub const BPS_SCALE: i64 = 10_000;

/// Apply a basis-point rate to an amount, rounding half away from zero.
///
/// `apply_rate_bps(10_00, 9500) == 9_50`.
pub fn apply_rate_bps(amount: Cents, rate_bps: i64) -> Cents {
    div_round_half_away(amount as i128 * rate_bps as i128, BPS_SCALE as i128)
}

/// Express `numer / denom` as basis points, rounding half away from zero.
///
/// Used to derive the effective rate of a fixed-amount custom rule for
/// invoice lines. `denom` must be non-zero; callers guard against
/// zero-revenue groups before calling.
pub fn ratio_as_bps(numer: Cents, denom: Cents) -> i64 {
    div_round_half_away(numer as i128 * BPS_SCALE as i128, denom as i128)
}

fn div_round_half_away(numer: i128, denom: i128) -> i64 {
    debug_assert!(denom != 0);
    let (numer, denom) = if denom < 0 { (-numer, -denom) } else { (numer, denom) };
    let half = denom / 2;
    let adjusted = if numer >= 0 { numer + half } else { numer - half };
    (adjusted / denom) as i64
}

/// Render cents as a human-readable euro string, e.g. `-5.00`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
