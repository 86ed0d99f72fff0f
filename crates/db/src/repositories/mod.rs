use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use repuestos_core::domain::adjudication::{Adjudication, SolicitudTransition};
use repuestos_core::domain::advisor::{
    Advisor, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
};
use repuestos_core::domain::offer::Offer;
use repuestos_core::domain::solicitud::{Solicitud, SolicitudId, SolicitudState};
use repuestos_core::errors::DomainError;
use repuestos_core::geography::Municipality;
use repuestos_core::notify::EngineEvent;
use repuestos_core::scoring::MetricWindows;
use repuestos_core::tiers::TierPlan;

pub mod adjudication;
pub mod advisor;
mod codec;
pub mod config_store;
pub mod geography;
pub mod memory;
pub mod outbox;
pub mod solicitud;
pub mod tier_plan;

pub use adjudication::SqlAdjudicationRepository;
pub use advisor::SqlAdvisorRepository;
pub use config_store::SqlConfigStore;
pub use geography::SqlGeographyLookup;
pub use memory::{
    InMemoryAdvisorRepository, InMemoryConfigStore, InMemoryEscalationStore,
    InMemoryGeographyLookup,
};
pub use outbox::SqlOutboxRepository;
pub use solicitud::SqlSolicitudRepository;
pub use tier_plan::SqlTierPlanRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("concurrent modification of solicitud `{0}`")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// A solicitud and every offer it has received, read together.
#[derive(Clone, Debug, PartialEq)]
pub struct SolicitudSnapshot {
    pub solicitud: Solicitud,
    pub offers: Vec<Offer>,
}

/// Everything needed to persist a new solicitud in one write.
#[derive(Clone, Debug)]
pub struct NewSolicitud {
    pub solicitud: Solicitud,
    pub plan: TierPlan,
    pub notifications: Vec<OutboxEntry>,
}

/// One scheduler decision, applied atomically.
///
/// The write only lands if the stored row still carries `expected_version`
/// and `expected_offer_count`; otherwise the whole commit is refused with
/// `RepositoryError::Conflict`. `updated` holds the new state, tier and
/// timestamps; its `version` is ignored and bumped by one in storage.
#[derive(Clone, Debug)]
pub struct DecisionCommit {
    pub updated: Solicitud,
    pub expected_version: u32,
    pub expected_offer_count: u32,
    pub transition: SolicitudTransition,
    pub adjudications: Vec<Adjudication>,
    pub notifications: Vec<OutboxEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommitReceipt {
    pub version: u32,
    /// Adjudications actually written; existing rows are left untouched.
    pub recorded: Vec<Adjudication>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub id: String,
    pub solicitud_id: SolicitudId,
    pub event: EngineEvent,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn pending(event: EngineEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: event.dedupe_key(),
            solicitud_id: event.solicitud_id().clone(),
            event,
            attempts: 0,
            last_error: None,
            created_at,
            dispatched_at: None,
        }
    }

    /// The notification that goes with a freshly written adjudication.
    pub fn adjudicated(adjudication: &Adjudication) -> Self {
        Self::pending(
            EngineEvent::Adjudicated {
                solicitud_id: adjudication.solicitud_id.clone(),
                line_item_id: adjudication.line_item_id.clone(),
                offer_id: adjudication.offer_id.clone(),
                advisor_id: adjudication.advisor_id.clone(),
            },
            adjudication.adjudicated_at,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SolicitudRepository: Send + Sync {
    /// Inserts the solicitud, its line items, tier plan and first
    /// notifications in one transaction.
    async fn create(&self, new: NewSolicitud) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &SolicitudId) -> Result<Option<Solicitud>, RepositoryError>;

    async fn list_ids_in_state(
        &self,
        state: SolicitudState,
    ) -> Result<Vec<SolicitudId>, RepositoryError>;

    async fn load_snapshot(
        &self,
        id: &SolicitudId,
    ) -> Result<Option<SolicitudSnapshot>, RepositoryError>;

    async fn commit_decision(&self, commit: DecisionCommit)
        -> Result<CommitReceipt, RepositoryError>;

    async fn list_transitions(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<SolicitudTransition>, RepositoryError>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    /// Stores the offer and bumps the solicitud's offer count and version.
    /// Refused with `DomainError::SolicitudClosed` once the solicitud has
    /// left `open`.
    async fn submit_offer(&self, offer: Offer) -> Result<Solicitud, RepositoryError>;

    async fn list_for_solicitud(&self, id: &SolicitudId) -> Result<Vec<Offer>, RepositoryError>;
}

#[async_trait]
pub trait AdjudicationRepository: Send + Sync {
    /// Insert-if-absent per (solicitud, line item). Each row actually written
    /// also enqueues its `adjudicated` notification in the same transaction.
    async fn record(
        &self,
        adjudications: Vec<Adjudication>,
    ) -> Result<Vec<Adjudication>, RepositoryError>;

    async fn list_for_solicitud(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<Adjudication>, RepositoryError>;
}

#[async_trait]
pub trait TierPlanRepository: Send + Sync {
    /// Returns `false` when a plan already existed; the stored plan wins.
    async fn save_if_absent(
        &self,
        plan: &TierPlan,
        created_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn find(&self, id: &SolicitudId) -> Result<Option<TierPlan>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Entries whose id is already present are skipped.
    async fn enqueue(&self, entries: Vec<OutboxEntry>) -> Result<u64, RepositoryError>;

    async fn list_pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, RepositoryError>;

    async fn mark_dispatched(
        &self,
        id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AdvisorDirectory: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError>;
    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError>;
}

/// History-derived advisor metrics. Rates are `0.0..=1.0`; trust expiry is
/// judged by the scorer from the audit timestamp.
#[async_trait]
pub trait AdvisorMetricsProvider: Send + Sync {
    async fn activity_rate(
        &self,
        advisor_id: &AdvisorId,
        since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError>;

    async fn performance_rate(
        &self,
        advisor_id: &AdvisorId,
        since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError>;

    async fn trust(&self, advisor_id: &AdvisorId) -> Result<TrustReading, RepositoryError>;

    async fn metrics(
        &self,
        advisor_id: &AdvisorId,
        windows: &MetricWindows,
        now: DateTime<Utc>,
    ) -> Result<AdvisorMetrics, RepositoryError> {
        Ok(AdvisorMetrics {
            activity: self.activity_rate(advisor_id, now - windows.activity()).await?,
            performance: self.performance_rate(advisor_id, now - windows.performance()).await?,
            trust: self.trust(advisor_id).await?,
        })
    }
}

#[async_trait]
pub trait GeographyLookup: Send + Sync {
    /// Matches on the normalized city name, narrowed by department when one
    /// is given. `None` when the city is unknown.
    async fn resolve(
        &self,
        city: &str,
        department: Option<&str>,
    ) -> Result<Option<Municipality>, RepositoryError>;

    async fn save(&self, municipality: Municipality) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, RepositoryError>;
    async fn put(&self, entry: ConfigEntry) -> Result<(), RepositoryError>;
}

/// Activity is offers per notification; performance is accepted and
/// delivered wins per offer.
/// Both are capped at 1.0 and report `NoData` with an empty denominator.
pub(crate) fn rate_from_counts(numerator: i64, denominator: i64) -> MetricReading {
    if denominator <= 0 {
        return MetricReading::NoData;
    }
    MetricReading::Rate((numerator.max(0) as f64 / denominator as f64).min(1.0))
}
