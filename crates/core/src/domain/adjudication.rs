use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::offer::OfferId;
use crate::domain::solicitud::{LineItemId, SolicitudId, SolicitudState};
use crate::evaluation::ScoreBreakdown;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjudicationId(pub String);

/// Winning offer for one line item. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adjudication {
    pub id: AdjudicationId,
    pub solicitud_id: SolicitudId,
    pub line_item_id: LineItemId,
    pub offer_id: OfferId,
    pub advisor_id: AdvisorId,
    pub price: Decimal,
    pub delivery_days: u32,
    pub warranty_months: u32,
    pub scores: ScoreBreakdown,
    pub candidates_considered: u32,
    pub adjudicated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

/// Durable record of one scheduler decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolicitudTransition {
    pub id: TransitionId,
    pub solicitud_id: SolicitudId,
    pub decision: String,
    pub from_state: SolicitudState,
    pub to_state: SolicitudState,
    pub from_tier: u8,
    pub to_tier: u8,
    pub complete_offers: u32,
    pub total_offers: u32,
    pub decided_at: DateTime<Utc>,
}
