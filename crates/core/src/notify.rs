use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::advisor::AdvisorId;
use crate::domain::offer::OfferId;
use crate::domain::solicitud::{LineItemId, SolicitudId};
use crate::tiers::NotificationChannel;

/// Outbound events. Advisor-facing events and operator alerts share one
/// stream so they go through the same outbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    TierNotified {
        solicitud_id: SolicitudId,
        tier: u8,
        channel: NotificationChannel,
        advisor_ids: Vec<AdvisorId>,
    },
    Adjudicated {
        solicitud_id: SolicitudId,
        line_item_id: LineItemId,
        offer_id: OfferId,
        advisor_id: AdvisorId,
    },
    ClosedWithoutOffers {
        solicitud_id: SolicitudId,
    },
    PartialEvaluation {
        solicitud_id: SolicitudId,
        unresolved: Vec<LineItemId>,
    },
    GeographyUnresolved {
        solicitud_id: SolicitudId,
        origin_city: String,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TierNotified { .. } => "tier_notified",
            Self::Adjudicated { .. } => "adjudicated",
            Self::ClosedWithoutOffers { .. } => "closed_without_offers",
            Self::PartialEvaluation { .. } => "partial_evaluation",
            Self::GeographyUnresolved { .. } => "geography_unresolved",
        }
    }

    pub fn solicitud_id(&self) -> &SolicitudId {
        match self {
            Self::TierNotified { solicitud_id, .. }
            | Self::Adjudicated { solicitud_id, .. }
            | Self::ClosedWithoutOffers { solicitud_id }
            | Self::PartialEvaluation { solicitud_id, .. }
            | Self::GeographyUnresolved { solicitud_id, .. } => solicitud_id,
        }
    }

    /// Stable identity for outbox deduplication. Enqueuing the same logical
    /// event twice yields the same key.
    pub fn dedupe_key(&self) -> String {
        match self {
            Self::TierNotified { solicitud_id, tier, .. } => {
                format!("tier_notified:{}:{tier}", solicitud_id.0)
            }
            Self::Adjudicated { solicitud_id, line_item_id, .. } => {
                format!("adjudicated:{}:{}", solicitud_id.0, line_item_id.0)
            }
            other => format!("{}:{}", other.kind(), other.solicitud_id().0),
        }
    }

    /// Events meant for operators rather than advisors.
    pub fn is_operator_alert(&self) -> bool {
        matches!(
            self,
            Self::ClosedWithoutOffers { .. }
                | Self::PartialEvaluation { .. }
                | Self::GeographyUnresolved { .. }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Outbound notification collaborator. Delivery is at-least-once, so
/// implementations must tolerate the same event arriving twice.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &EngineEvent) -> Result<(), NotificationError>;

    fn notify_tier(
        &self,
        solicitud_id: &SolicitudId,
        tier: u8,
        channel: NotificationChannel,
        advisor_ids: &[AdvisorId],
    ) -> Result<(), NotificationError> {
        self.publish(&EngineEvent::TierNotified {
            solicitud_id: solicitud_id.clone(),
            tier,
            channel,
            advisor_ids: advisor_ids.to_vec(),
        })
    }

    fn notify_adjudicated(
        &self,
        solicitud_id: &SolicitudId,
        line_item_id: &LineItemId,
        offer_id: &OfferId,
        advisor_id: &AdvisorId,
    ) -> Result<(), NotificationError> {
        self.publish(&EngineEvent::Adjudicated {
            solicitud_id: solicitud_id.clone(),
            line_item_id: line_item_id.clone(),
            offer_id: offer_id.clone(),
            advisor_id: advisor_id.clone(),
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl InMemoryNotificationSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_for(&self, solicitud_id: &SolicitudId) -> Vec<EngineEvent> {
        self.events().into_iter().filter(|event| event.solicitud_id() == solicitud_id).collect()
    }

    /// While unavailable every publish fails and nothing is recorded.
    pub fn set_unavailable(&self, unavailable: bool) {
        match self.unavailable.lock() {
            Ok(mut flag) => *flag = unavailable,
            Err(poisoned) => *poisoned.into_inner() = unavailable,
        }
    }

    fn is_unavailable(&self) -> bool {
        match self.unavailable.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn publish(&self, event: &EngineEvent) -> Result<(), NotificationError> {
        if self.is_unavailable() {
            return Err(NotificationError::Unavailable("in-memory sink switched off".to_string()));
        }
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineEvent, InMemoryNotificationSink, NotificationError, NotificationSink};
    use crate::domain::advisor::AdvisorId;
    use crate::domain::offer::OfferId;
    use crate::domain::solicitud::{LineItemId, SolicitudId};
    use crate::tiers::NotificationChannel;

    #[test]
    fn in_memory_sink_records_tier_and_adjudication_events() {
        let sink = InMemoryNotificationSink::default();
        let solicitud = SolicitudId("SOL-2026-0042".to_owned());

        sink.notify_tier(
            &solicitud,
            2,
            NotificationChannel::DirectMessage,
            &[AdvisorId("ADV-1".to_owned()), AdvisorId("ADV-2".to_owned())],
        )
        .expect("sink available");
        sink.notify_adjudicated(
            &solicitud,
            &LineItemId("LI-1".to_owned()),
            &OfferId("OF-9".to_owned()),
            &AdvisorId("ADV-2".to_owned()),
        )
        .expect("sink available");

        let events = sink.events_for(&solicitud);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "tier_notified");
        assert!(matches!(
            &events[0],
            EngineEvent::TierNotified { tier: 2, advisor_ids, .. } if advisor_ids.len() == 2
        ));
        assert_eq!(events[1].kind(), "adjudicated");
        assert!(!events[1].is_operator_alert());
    }

    #[test]
    fn unavailable_sink_refuses_and_records_nothing() {
        let sink = InMemoryNotificationSink::default();
        sink.set_unavailable(true);

        let result = sink.publish(&EngineEvent::ClosedWithoutOffers {
            solicitud_id: SolicitudId("SOL-1".to_owned()),
        });

        assert!(matches!(result, Err(NotificationError::Unavailable(_))));
        assert!(sink.events().is_empty());

        sink.set_unavailable(false);
        assert!(sink
            .publish(&EngineEvent::ClosedWithoutOffers {
                solicitud_id: SolicitudId("SOL-1".to_owned())
            })
            .is_ok());
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = EngineEvent::PartialEvaluation {
            solicitud_id: SolicitudId("SOL-1".to_owned()),
            unresolved: vec![LineItemId("LI-3".to_owned())],
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "partial_evaluation");
        assert_eq!(event.dedupe_key(), "partial_evaluation:SOL-1");
        assert!(event.is_operator_alert());

        let back: EngineEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }
}
