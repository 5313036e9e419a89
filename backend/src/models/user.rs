//! Beneficiaries and their credit deposits.

use serde::{Deserialize, Serialize};

use super::ids::UserId;
use super::money::Cents;

/// The credit granted to a beneficiary, with optional per-domain caps.
///
/// The overall amount bounds total spending; the digital and physical
/// caps each bound spending on the corresponding kind of goods. The
/// wallet-balance guard evaluates all three bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    amount: Cents,
    digital_cap: Option<Cents>,
    physical_cap: Option<Cents>,
}

impl Deposit {
    pub fn new(amount: Cents, digital_cap: Option<Cents>, physical_cap: Option<Cents>) -> Self {
        Self {
            amount,
            digital_cap,
            physical_cap,
        }
    }

    /// Uncapped deposit: only the overall amount applies.
    pub fn uncapped(amount: Cents) -> Self {
        Self::new(amount, None, None)
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn digital_cap(&self) -> Option<Cents> {
        self.digital_cap
    }

    pub fn physical_cap(&self) -> Option<Cents> {
        self.physical_cap
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    deposit: Deposit,
}

impl User {
    pub(crate) fn new(id: UserId, deposit: Deposit) -> Self {
        Self { id, deposit }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn deposit(&self) -> &Deposit {
        &self.deposit
    }
}
