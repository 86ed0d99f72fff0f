//! Escalation decisions.
//!
//! `decide` is the whole timeout state machine for one solicitud. It reads a
//! snapshot and returns what should happen; persisting and notifying is the
//! caller's job, so the same snapshot always yields the same decision.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::offer::{count_complete, Offer};
use crate::domain::solicitud::{Solicitud, SolicitudState};
use crate::tiers::TierConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSnapshot {
    pub state: SolicitudState,
    pub current_tier: u8,
    pub tier_started_at: DateTime<Utc>,
    pub minimum_offers_desired: u32,
    pub complete_offers: u32,
    pub total_offers: u32,
}

impl EscalationSnapshot {
    pub fn capture(solicitud: &Solicitud, offers: &[Offer]) -> Self {
        Self {
            state: solicitud.state,
            current_tier: solicitud.current_tier,
            tier_started_at: solicitud.tier_started_at,
            minimum_offers_desired: solicitud.minimum_offers_desired,
            complete_offers: count_complete(offers, solicitud.line_items.len()),
            total_offers: offers.len() as u32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationTrigger {
    MinimumOffersReached,
    MaxTierReached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EscalationDecision {
    NotOpen,
    Wait { remaining_secs: i64 },
    Escalate { from: u8, to: u8 },
    Evaluate { trigger: EvaluationTrigger },
    CloseWithoutOffers,
}

impl EscalationDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotOpen => "not_open",
            Self::Wait { .. } => "wait",
            Self::Escalate { .. } => "escalate",
            Self::Evaluate { trigger: EvaluationTrigger::MinimumOffersReached } => {
                "evaluate_minimum_reached"
            }
            Self::Evaluate { trigger: EvaluationTrigger::MaxTierReached } => {
                "evaluate_max_tier_reached"
            }
            Self::CloseWithoutOffers => "close_without_offers",
        }
    }

    /// Whether the decision changes persisted state.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Escalate { .. } | Self::Evaluate { .. } | Self::CloseWithoutOffers)
    }
}

pub fn decide(
    tiers: &TierConfig,
    snapshot: &EscalationSnapshot,
    now: DateTime<Utc>,
) -> EscalationDecision {
    if snapshot.state != SolicitudState::Open {
        return EscalationDecision::NotOpen;
    }

    // Tiers past the configured maximum are treated as the maximum.
    let tier = snapshot.current_tier.clamp(1, tiers.max_tier.max(1));
    let wait = tiers.wait_for(tier).unwrap_or_else(Duration::zero);
    let elapsed = now - snapshot.tier_started_at;
    if elapsed < wait {
        return EscalationDecision::Wait { remaining_secs: (wait - elapsed).num_seconds() };
    }

    if snapshot.complete_offers >= snapshot.minimum_offers_desired {
        return EscalationDecision::Evaluate { trigger: EvaluationTrigger::MinimumOffersReached };
    }

    if tier < tiers.max_tier {
        return EscalationDecision::Escalate { from: tier, to: tier + 1 };
    }

    if snapshot.total_offers > 0 {
        EscalationDecision::Evaluate { trigger: EvaluationTrigger::MaxTierReached }
    } else {
        EscalationDecision::CloseWithoutOffers
    }
}
