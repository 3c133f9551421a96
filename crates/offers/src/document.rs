//! Render-ready view of an offer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projectdesk_core::{DomainResult, Money};

use crate::offer::{OfferId, OfferRecord};
use crate::project::{CompanyProfile, ProjectId, ProjectSnapshot};

/// One table row of the offer document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub description: String,
    pub category: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Everything the render step needs, with totals already computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDocument {
    pub offer_id: OfferId,
    pub project_id: ProjectId,
    pub offer_name: String,
    pub project_name: String,
    pub company: CompanyProfile,
    pub lines: Vec<DocumentLine>,
    pub total: Money,
    pub issued_at: DateTime<Utc>,
}

impl OfferDocument {
    pub fn prepare(
        offer: &OfferRecord,
        snapshot: &ProjectSnapshot,
        issued_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let lines = snapshot
            .lines
            .iter()
            .map(|l| {
                Ok(DocumentLine {
                    description: l.name.clone(),
                    category: l.category.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    line_total: l.line_total()?,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(Self {
            offer_id: offer.id_typed(),
            project_id: snapshot.project.id,
            offer_name: offer.name().to_string(),
            project_name: snapshot.project.name.clone(),
            company: snapshot.company_or_default(),
            lines,
            total: snapshot.offer_total()?,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ExpenseLine, Project};
    use projectdesk_core::UserId;

    #[test]
    fn prepare_copies_lines_and_total() {
        let project_id = ProjectId::generate();
        let snapshot = ProjectSnapshot {
            project: Project {
                id: project_id,
                owner: UserId::new(),
                name: "Bridge".into(),
            },
            lines: vec![
                ExpenseLine::new("Cement", "Materials", Money::from_minor(10_000), 5).unwrap(),
                ExpenseLine::new("Labor", "Services", Money::from_minor(2_000), 10).unwrap(),
            ],
            company: None,
        };
        let offer = OfferRecord::request(OfferId::generate(), project_id, Some("Q3"), Utc::now()).unwrap();

        let doc = OfferDocument::prepare(&offer, &snapshot, Utc::now()).unwrap();

        assert_eq!(doc.offer_name, "Q3");
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.lines[0].line_total, Money::from_minor(50_000));
        assert_eq!(doc.total, Money::from_minor(70_000));
        assert_eq!(doc.company, CompanyProfile::default());
    }
}
