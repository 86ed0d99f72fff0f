use std::sync::Arc;

use repuestos_db::repositories::{
    AdjudicationRepository, AdvisorDirectory, AdvisorMetricsProvider, GeographyLookup,
    InMemoryAdvisorRepository, InMemoryEscalationStore, InMemoryGeographyLookup,
    OfferRepository, OutboxRepository, SolicitudRepository, SqlAdjudicationRepository,
    SqlAdvisorRepository, SqlGeographyLookup, SqlOutboxRepository, SqlSolicitudRepository,
    SqlTierPlanRepository, TierPlanRepository,
};
use repuestos_db::DbPool;

/// Repository handles the engine works through.
#[derive(Clone)]
pub struct EngineStores {
    pub solicitudes: Arc<dyn SolicitudRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub adjudications: Arc<dyn AdjudicationRepository>,
    pub tier_plans: Arc<dyn TierPlanRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub advisors: Arc<dyn AdvisorDirectory>,
    pub metrics: Arc<dyn AdvisorMetricsProvider>,
    pub geography: Arc<dyn GeographyLookup>,
}

impl EngineStores {
    pub fn sql(pool: DbPool) -> Self {
        let solicitudes = Arc::new(SqlSolicitudRepository::new(pool.clone()));
        let advisors = Arc::new(SqlAdvisorRepository::new(pool.clone()));

        Self {
            solicitudes: solicitudes.clone(),
            offers: solicitudes,
            adjudications: Arc::new(SqlAdjudicationRepository::new(pool.clone())),
            tier_plans: Arc::new(SqlTierPlanRepository::new(pool.clone())),
            outbox: Arc::new(SqlOutboxRepository::new(pool.clone())),
            advisors: advisors.clone(),
            metrics: advisors,
            geography: Arc::new(SqlGeographyLookup::new(pool)),
        }
    }

    pub fn in_memory(
        escalation: Arc<InMemoryEscalationStore>,
        advisors: Arc<InMemoryAdvisorRepository>,
        geography: Arc<InMemoryGeographyLookup>,
    ) -> Self {
        Self {
            solicitudes: escalation.clone(),
            offers: escalation.clone(),
            adjudications: escalation.clone(),
            tier_plans: escalation.clone(),
            outbox: escalation,
            advisors: advisors.clone(),
            metrics: advisors,
            geography,
        }
    }
}
