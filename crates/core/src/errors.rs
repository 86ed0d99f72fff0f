use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::solicitud::SolicitudState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid solicitud transition from {from:?} to {to:?}")]
    InvalidSolicitudTransition { from: SolicitudState, to: SolicitudState },
    #[error("invalid tier change from {from} to {to} (max tier {max_tier})")]
    InvalidTierChange { from: u8, to: u8, max_tier: u8 },
    #[error("solicitud no longer accepts offers (state {state:?})")]
    SolicitudClosed { state: SolicitudState },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Non-fatal conditions the engine reports while working a solicitud.
///
/// None of these abort the engine. They are logged and, where operators
/// need to act, forwarded to the notification sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCondition {
    GeographyUnresolved,
    NoDataFallback,
    InsufficientOffers,
    UnresolvedLineItem,
    ConcurrentTransitionConflict,
}

impl EngineCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeographyUnresolved => "geography_unresolved",
            Self::NoDataFallback => "no_data_fallback",
            Self::InsufficientOffers => "insufficient_offers",
            Self::UnresolvedLineItem => "unresolved_line_item",
            Self::ConcurrentTransitionConflict => "concurrent_transition_conflict",
        }
    }

    /// Whether the condition should reach operators, not only the logs.
    pub fn alerts_operators(&self) -> bool {
        matches!(
            self,
            Self::GeographyUnresolved | Self::InsufficientOffers | Self::UnresolvedLineItem
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainError, EngineCondition};
    use crate::domain::solicitud::SolicitudState;

    #[test]
    fn transition_error_names_both_states() {
        let error = DomainError::InvalidSolicitudTransition {
            from: SolicitudState::ClosedNoOffers,
            to: SolicitudState::Evaluated,
        };
        let message = error.to_string();
        assert!(message.contains("ClosedNoOffers"));
        assert!(message.contains("Evaluated"));
    }

    #[test]
    fn only_actionable_conditions_alert_operators() {
        assert!(EngineCondition::InsufficientOffers.alerts_operators());
        assert!(EngineCondition::GeographyUnresolved.alerts_operators());
        assert!(!EngineCondition::NoDataFallback.alerts_operators());
        assert!(!EngineCondition::ConcurrentTransitionConflict.alerts_operators());
        assert_eq!(EngineCondition::UnresolvedLineItem.as_str(), "unresolved_line_item");
    }
}
