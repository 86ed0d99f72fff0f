pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod evaluation;
pub mod geography;
pub mod notify;
pub mod scoring;
pub mod tiers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, EngineConfig};
pub use domain::adjudication::{Adjudication, AdjudicationId, SolicitudTransition, TransitionId};
pub use domain::advisor::{
    Advisor, AdvisorGeography, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
};
pub use domain::offer::{Offer, OfferDetail, OfferId};
pub use domain::solicitud::{
    LineItem, LineItemId, Solicitud, SolicitudId, SolicitudState, VehicleDescriptor,
};
pub use errors::{DomainError, EngineCondition};
pub use escalation::{decide, EscalationDecision, EscalationSnapshot, EvaluationTrigger};
pub use evaluation::{
    CandidateScore, EvaluationConfig, EvaluationOutcome, LineItemAward, OfferEvaluationEngine,
    ScoreBreakdown,
};
pub use geography::{EligibleAdvisor, GeographicEligibilityResolver, Municipality, ProximityMatch};
pub use notify::{EngineEvent, InMemoryNotificationSink, NotificationError, NotificationSink};
pub use scoring::{AdvisorScoringEngine, ScoredAdvisor, ScoringConfig};
pub use tiers::{NotificationChannel, TierClassifier, TierConfig, TierPlan};
