use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SolicitudId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineItemId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolicitudState {
    Open,
    Evaluated,
    Accepted,
    Rejected,
    ClosedNoOffers,
}

impl SolicitudState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Evaluated => "evaluated",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::ClosedNoOffers => "closed_no_offers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "evaluated" => Some(Self::Evaluated),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "closed_no_offers" => Some(Self::ClosedNoOffers),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Vehicle the requested part must fit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDescriptor {
    pub brand: String,
    pub line: String,
    pub year: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub name: String,
    pub vehicle: VehicleDescriptor,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solicitud {
    pub id: SolicitudId,
    pub state: SolicitudState,
    pub current_tier: u8,
    pub tier_started_at: DateTime<Utc>,
    pub minimum_offers_desired: u32,
    pub origin_city: String,
    pub origin_department: Option<String>,
    pub line_items: Vec<LineItem>,
    pub offer_count: u32,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Solicitud {
    /// Builds a fresh request sitting at tier 1.
    pub fn open(
        id: SolicitudId,
        origin_city: impl Into<String>,
        origin_department: Option<String>,
        minimum_offers_desired: u32,
        line_items: Vec<LineItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if minimum_offers_desired == 0 {
            return Err(DomainError::InvariantViolation(
                "minimum_offers_desired must be at least 1".to_string(),
            ));
        }
        if line_items.is_empty() {
            return Err(DomainError::InvariantViolation(
                "a solicitud needs at least one line item".to_string(),
            ));
        }
        if let Some(item) = line_items.iter().find(|item| item.quantity == 0) {
            return Err(DomainError::InvariantViolation(format!(
                "line item `{}` has zero quantity",
                item.id.0
            )));
        }

        Ok(Self {
            id,
            state: SolicitudState::Open,
            current_tier: 1,
            tier_started_at: now,
            minimum_offers_desired,
            origin_city: origin_city.into(),
            origin_department,
            line_items,
            offer_count: 0,
            version: 1,
            created_at: now,
            closed_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == SolicitudState::Open
    }

    pub fn has_line_item(&self, id: &LineItemId) -> bool {
        self.line_items.iter().any(|item| &item.id == id)
    }

    pub fn can_transition_to(&self, next: SolicitudState) -> bool {
        matches!(
            (self.state, next),
            (SolicitudState::Open, SolicitudState::Evaluated)
                | (SolicitudState::Open, SolicitudState::ClosedNoOffers)
                | (SolicitudState::Evaluated, SolicitudState::Accepted)
                | (SolicitudState::Evaluated, SolicitudState::Rejected)
        )
    }

    pub fn transition_to(
        &mut self,
        next: SolicitudState,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidSolicitudTransition { from: self.state, to: next });
        }

        self.state = next;
        if self.closed_at.is_none() {
            self.closed_at = Some(now);
        }
        Ok(())
    }

    /// Moves the request to a later tier and restarts its wait clock.
    pub fn escalate_to(
        &mut self,
        tier: u8,
        now: DateTime<Utc>,
        max_tier: u8,
    ) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot escalate solicitud `{}` in state {}",
                self.id.0,
                self.state.as_str()
            )));
        }
        if tier <= self.current_tier || tier > max_tier {
            return Err(DomainError::InvalidTierChange {
                from: self.current_tier,
                to: tier,
                max_tier,
            });
        }

        self.current_tier = tier;
        self.tier_started_at = now;
        Ok(())
    }

    pub fn record_offer(&mut self) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::SolicitudClosed { state: self.state });
        }
        self.offer_count += 1;
        self.version += 1;
        Ok(())
    }
}
