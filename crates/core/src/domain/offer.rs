use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::solicitud::{LineItemId, Solicitud, SolicitudId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDetail {
    pub line_item_id: LineItemId,
    pub price: Decimal,
    pub warranty_months: u32,
    pub delivery_days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub solicitud_id: SolicitudId,
    pub advisor_id: AdvisorId,
    pub details: Vec<OfferDetail>,
    pub submitted_at: DateTime<Utc>,
}

impl Offer {
    pub fn detail_for(&self, line_item_id: &LineItemId) -> Option<&OfferDetail> {
        self.details.iter().find(|detail| &detail.line_item_id == line_item_id)
    }

    /// Fraction of the solicitud's line items this offer prices, in `0.0..=1.0`.
    pub fn coverage(&self, total_line_items: usize) -> f64 {
        if total_line_items == 0 {
            return 0.0;
        }
        let priced: HashSet<&LineItemId> =
            self.details.iter().map(|detail| &detail.line_item_id).collect();
        (priced.len().min(total_line_items) as f64) / (total_line_items as f64)
    }

    pub fn is_complete(&self, total_line_items: usize) -> bool {
        total_line_items > 0 && self.coverage(total_line_items) >= 1.0
    }

    pub fn validate_against(&self, solicitud: &Solicitud) -> Result<(), DomainError> {
        if self.solicitud_id != solicitud.id {
            return Err(DomainError::InvariantViolation(format!(
                "offer `{}` targets solicitud `{}`, not `{}`",
                self.id.0, self.solicitud_id.0, solicitud.id.0
            )));
        }
        if self.details.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "offer `{}` prices no line items",
                self.id.0
            )));
        }

        let mut seen = HashSet::new();
        for detail in &self.details {
            if !solicitud.has_line_item(&detail.line_item_id) {
                return Err(DomainError::InvariantViolation(format!(
                    "offer `{}` prices unknown line item `{}`",
                    self.id.0, detail.line_item_id.0
                )));
            }
            if !seen.insert(&detail.line_item_id) {
                return Err(DomainError::InvariantViolation(format!(
                    "offer `{}` prices line item `{}` twice",
                    self.id.0, detail.line_item_id.0
                )));
            }
            if detail.price <= Decimal::ZERO {
                return Err(DomainError::InvariantViolation(format!(
                    "offer `{}` has a non-positive price for `{}`",
                    self.id.0, detail.line_item_id.0
                )));
            }
        }

        Ok(())
    }
}

/// Number of offers that price every line item.
pub fn count_complete(offers: &[Offer], total_line_items: usize) -> u32 {
    offers.iter().filter(|offer| offer.is_complete(total_line_items)).count() as u32
}
