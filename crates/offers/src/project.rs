use serde::{Deserialize, Serialize};

use projectdesk_core::{AggregateId, DomainError, DomainResult, Money, UserId, ValueObject};

/// Project identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub AggregateId);

impl ProjectId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ProjectId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The subset of a project an offer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub owner: UserId,
    pub name: String,
}

/// One priced expense attached to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLine {
    pub name: String,
    pub category: String,
    /// Price per unit, in minor currency units.
    pub unit_price: Money,
    pub quantity: u32,
}

impl ValueObject for ExpenseLine {}

impl ExpenseLine {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("expense name must not be blank"));
        }
        if unit_price.is_negative() {
            return Err(DomainError::validation("unit price must not be negative"));
        }
        Ok(Self {
            name,
            category: category.into(),
            unit_price,
            quantity,
        })
    }

    pub fn line_total(&self) -> DomainResult<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Company details printed in the offer header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub email: String,
    pub address: String,
    pub vat_number: String,
    pub website: String,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self {
            name: "Your Company".to_string(),
            email: "info@company.com".to_string(),
            address: "123 Business St, City".to_string(),
            vat_number: "VAT123456789".to_string(),
            website: "www.company.com".to_string(),
        }
    }
}

/// A project with its expense lines and the owner's company, read at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub lines: Vec<ExpenseLine>,
    pub company: Option<CompanyProfile>,
}

impl ProjectSnapshot {
    /// Σ(unit price × quantity) over all lines, exact to the minor unit.
    pub fn offer_total(&self) -> DomainResult<Money> {
        let mut total = Money::ZERO;
        for line in &self.lines {
            total = total.checked_add(line.line_total()?)?;
        }
        Ok(total)
    }

    pub fn company_or_default(&self) -> CompanyProfile {
        self.company.clone().unwrap_or_default()
    }
}
