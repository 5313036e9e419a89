//! Venues, pricing-point links, and payee bank accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BankAccountId, VenueId};

/// Link from a venue to the venue whose revenue its bookings count
/// toward. Most venues are their own pricing point; a venue without
/// one cannot have its finance events priced yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPointLink {
    pub pricing_point_id: VenueId,
    /// Start of the link's validity. Pricings are ordered no earlier
    /// than this, so re-linking a venue cannot reorder past revenue.
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    id: VenueId,
    name: String,
    pricing_point: Option<PricingPointLink>,
    bank_account: Option<BankAccountId>,
}

impl Venue {
    pub(crate) fn new(id: VenueId, name: String) -> Self {
        Self {
            id,
            name,
            pricing_point: None,
            bank_account: None,
        }
    }

    pub fn id(&self) -> VenueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pricing_point(&self) -> Option<&PricingPointLink> {
        self.pricing_point.as_ref()
    }

    pub fn bank_account(&self) -> Option<BankAccountId> {
        self.bank_account
    }

    pub(crate) fn link_pricing_point(&mut self, pricing_point_id: VenueId, since: DateTime<Utc>) {
        self.pricing_point = Some(PricingPointLink {
            pricing_point_id,
            since,
        });
    }

    pub(crate) fn link_bank_account(&mut self, bank_account_id: BankAccountId) {
        self.bank_account = Some(bank_account_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankAccountStatus {
    /// Compliance review pending; not yet payable.
    Pending,
    Accepted,
    Refused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    id: BankAccountId,
    label: String,
    status: BankAccountStatus,
}

impl BankAccount {
    pub(crate) fn new(id: BankAccountId, label: String, status: BankAccountStatus) -> Self {
        Self { id, label, status }
    }

    pub fn id(&self) -> BankAccountId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> BankAccountStatus {
        self.status
    }

    pub fn is_payable(&self) -> bool {
        self.status == BankAccountStatus::Accepted
    }
}
