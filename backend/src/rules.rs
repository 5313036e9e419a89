//! Reimbursement rules.
//!
//! A pricing carries exactly one rule: either a standard rule, tiered
//! by the pricing point's cumulative yearly revenue, or a custom rule
//! negotiated for a specific stock or venue. Custom rules always win
//! over standard ones; two active custom rules for the same booking
//! are a resolution failure, never an arbitrary pick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::money::{apply_rate_bps, Cents};
use crate::models::{CustomRuleId, OfferCategory, StockId, VenueId};

/// Revenue tier bounds, in euro cents.
const TIER_1_MAX: Cents = 20_000_00;
const TIER_2_MAX: Cents = 40_000_00;
const TIER_3_MAX: Cents = 150_000_00;

/// Invoice-line grouping of rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleGroup {
    Standard,
    Book,
    NotReimbursed,
    Custom,
}

/// The standard reimbursement scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StandardRule {
    /// 100% while the pricing point's yearly revenue stays under 20k€.
    FullReimbursementUnder20k,
    /// 95% between 20k€ and 40k€.
    Rate95Between20kAnd40k,
    /// 92% between 40k€ and 150k€.
    Rate92Between40kAnd150k,
    /// 90% above 150k€.
    Rate90Above150k,
    /// Books are always reimbursed at 95%, whatever the revenue.
    BookRate95,
    /// Never reimbursed; a zero pricing is still written.
    NotReimbursed,
}

impl StandardRule {
    /// Pick the standard rule for a booking, given the pricing point's
    /// cumulative yearly revenue including that booking. Total over
    /// its inputs: some standard rule always applies.
    pub fn for_booking(category: OfferCategory, revenue: Cents) -> Self {
        match category {
            OfferCategory::NotReimbursable => StandardRule::NotReimbursed,
            OfferCategory::Book => StandardRule::BookRate95,
            OfferCategory::General => {
                if revenue <= TIER_1_MAX {
                    StandardRule::FullReimbursementUnder20k
                } else if revenue <= TIER_2_MAX {
                    StandardRule::Rate95Between20kAnd40k
                } else if revenue <= TIER_3_MAX {
                    StandardRule::Rate92Between40kAnd150k
                } else {
                    StandardRule::Rate90Above150k
                }
            }
        }
    }

    pub fn rate_bps(self) -> i64 {
        match self {
            StandardRule::FullReimbursementUnder20k => 10_000,
            StandardRule::Rate95Between20kAnd40k => 9_500,
            StandardRule::Rate92Between40kAnd150k => 9_200,
            StandardRule::Rate90Above150k => 9_000,
            StandardRule::BookRate95 => 9_500,
            StandardRule::NotReimbursed => 0,
        }
    }

    pub fn group(self) -> RuleGroup {
        match self {
            StandardRule::BookRate95 => RuleGroup::Book,
            StandardRule::NotReimbursed => RuleGroup::NotReimbursed,
            _ => RuleGroup::Standard,
        }
    }
}

/// What a custom rule grants: a rate, or a fixed amount per unit.
/// Exactly one of the two, by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomRuleKind {
    RateBps(i64),
    AmountPerUnit(Cents),
}

/// What a custom rule applies to. Stock scope beats venue scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomRuleScope {
    Stock(StockId),
    Venue(VenueId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomReimbursementRule {
    id: CustomRuleId,
    scope: CustomRuleScope,
    kind: CustomRuleKind,
    /// Inclusive start of validity.
    valid_from: DateTime<Utc>,
    /// Exclusive end; `None` means open-ended.
    valid_until: Option<DateTime<Utc>>,
}

impl CustomReimbursementRule {
    pub fn new(
        id: CustomRuleId,
        scope: CustomRuleScope,
        kind: CustomRuleKind,
        valid_from: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            scope,
            kind,
            valid_from,
            valid_until,
        }
    }

    pub fn id(&self) -> CustomRuleId {
        self.id
    }

    pub fn scope(&self) -> CustomRuleScope {
        self.scope
    }

    pub fn kind(&self) -> CustomRuleKind {
        self.kind
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_until.map_or(true, |until| at < until)
    }
}

/// The rule stored on a pricing: standard xor custom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleRef {
    Standard(StandardRule),
    Custom(CustomRuleId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleResolutionFailure {
    #[error("several custom rules are active for stock {stock}: {rules:?}")]
    ConflictingCustomRules {
        stock: StockId,
        rules: Vec<CustomRuleId>,
    },
    #[error("custom rule {0} referenced by a pricing no longer exists")]
    MissingCustomRule(CustomRuleId),
}

/// Resolve the rule for a booking of `stock`, priced at `value_date`
/// with the pricing point's yearly revenue (booking included) at
/// `revenue`.
///
/// `custom_rules` is the full rule table; the caller passes
/// `state.custom_rules()`.
pub fn resolve_rule<'a>(
    custom_rules: impl Iterator<Item = &'a CustomReimbursementRule>,
    stock_id: StockId,
    venue_id: VenueId,
    category: OfferCategory,
    value_date: DateTime<Utc>,
    revenue: Cents,
) -> Result<RuleRef, RuleResolutionFailure> {
    let mut stock_matches: Vec<CustomRuleId> = Vec::new();
    let mut venue_matches: Vec<CustomRuleId> = Vec::new();
    for rule in custom_rules {
        if !rule.is_active(value_date) {
            continue;
        }
        match rule.scope() {
            CustomRuleScope::Stock(s) if s == stock_id => stock_matches.push(rule.id()),
            CustomRuleScope::Venue(v) if v == venue_id => venue_matches.push(rule.id()),
            _ => {}
        }
    }
    let matches = if stock_matches.is_empty() {
        venue_matches
    } else {
        stock_matches
    };
    match matches.as_slice() {
        [] => Ok(RuleRef::Standard(StandardRule::for_booking(category, revenue))),
        [only] => Ok(RuleRef::Custom(*only)),
        _ => Err(RuleResolutionFailure::ConflictingCustomRules {
            stock: stock_id,
            rules: matches,
        }),
    }
}

/// Amount we reimburse for a booking under `kind`, as a positive
/// number of cents (the pricing layer negates it).
pub fn reimbursed_amount(kind: RuleAmount, total: Cents, quantity: u32) -> Cents {
    match kind {
        RuleAmount::RateBps(rate) => apply_rate_bps(total, rate),
        RuleAmount::AmountPerUnit(amount) => amount * quantity as i64,
    }
}

/// Flattened view of what a resolved rule grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAmount {
    RateBps(i64),
    AmountPerUnit(Cents),
}

impl From<CustomRuleKind> for RuleAmount {
    fn from(kind: CustomRuleKind) -> Self {
        match kind {
            CustomRuleKind::RateBps(rate) => RuleAmount::RateBps(rate),
            CustomRuleKind::AmountPerUnit(amount) => RuleAmount::AmountPerUnit(amount),
        }
    }
}
