use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use repuestos_core::domain::adjudication::{Adjudication, SolicitudTransition};
use repuestos_core::domain::advisor::{
    Advisor, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
};
use repuestos_core::domain::offer::Offer;
use repuestos_core::domain::solicitud::{Solicitud, SolicitudId, SolicitudState};
use repuestos_core::geography::{normalize_place, Municipality};
use repuestos_core::tiers::TierPlan;

use super::{
    AdjudicationRepository, AdvisorDirectory, AdvisorMetricsProvider, CommitReceipt,
    ConfigEntry, ConfigStore, DecisionCommit, GeographyLookup, NewSolicitud, OfferRepository,
    OutboxEntry, OutboxRepository, RepositoryError, SolicitudRepository, SolicitudSnapshot,
    TierPlanRepository,
};

#[derive(Default)]
struct EscalationState {
    solicitudes: HashMap<String, Solicitud>,
    offers: HashMap<String, Vec<Offer>>,
    transitions: Vec<SolicitudTransition>,
    adjudications: BTreeMap<(String, String), Adjudication>,
    plans: HashMap<String, TierPlan>,
    outbox: BTreeMap<String, OutboxEntry>,
}

impl EscalationState {
    fn enqueue(&mut self, entries: &[OutboxEntry]) -> u64 {
        let mut written = 0;
        for entry in entries {
            if !self.outbox.contains_key(&entry.id) {
                self.outbox.insert(entry.id.clone(), entry.clone());
                written += 1;
            }
        }
        written
    }

    fn record(&mut self, adjudications: &[Adjudication]) -> Vec<Adjudication> {
        let mut recorded = Vec::new();
        for adjudication in adjudications {
            let key =
                (adjudication.solicitud_id.0.clone(), adjudication.line_item_id.0.clone());
            if self.adjudications.contains_key(&key) {
                continue;
            }
            self.adjudications.insert(key, adjudication.clone());
            recorded.push(adjudication.clone());
        }
        let notifications: Vec<OutboxEntry> =
            recorded.iter().map(OutboxEntry::adjudicated).collect();
        self.enqueue(&notifications);
        recorded
    }
}

/// Solicitudes, offers, plans, adjudications and the outbox behind one lock,
/// so every multi-record write is as atomic as the SQL transaction it mirrors.
#[derive(Default)]
pub struct InMemoryEscalationStore {
    state: RwLock<EscalationState>,
}

#[async_trait::async_trait]
impl SolicitudRepository for InMemoryEscalationStore {
    async fn create(&self, new: NewSolicitud) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let id = new.solicitud.id.0.clone();
        if state.solicitudes.contains_key(&id) {
            return Err(RepositoryError::Conflict(id));
        }
        state.plans.entry(new.plan.solicitud_id.0.clone()).or_insert(new.plan);
        state.enqueue(&new.notifications);
        state.solicitudes.insert(id, new.solicitud);
        Ok(())
    }

    async fn find_by_id(&self, id: &SolicitudId) -> Result<Option<Solicitud>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.solicitudes.get(&id.0).cloned())
    }

    async fn list_ids_in_state(
        &self,
        wanted: SolicitudState,
    ) -> Result<Vec<SolicitudId>, RepositoryError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Solicitud> =
            state.solicitudes.values().filter(|solicitud| solicitud.state == wanted).collect();
        matching.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(matching.into_iter().map(|solicitud| solicitud.id.clone()).collect())
    }

    async fn load_snapshot(
        &self,
        id: &SolicitudId,
    ) -> Result<Option<SolicitudSnapshot>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.solicitudes.get(&id.0).map(|solicitud| SolicitudSnapshot {
            solicitud: solicitud.clone(),
            offers: state.offers.get(&id.0).cloned().unwrap_or_default(),
        }))
    }

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<CommitReceipt, RepositoryError> {
        let mut state = self.state.write().await;
        let id = commit.updated.id.0.clone();
        let stored = state
            .solicitudes
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("solicitud `{id}`")))?;
        if stored.version != commit.expected_version
            || stored.offer_count != commit.expected_offer_count
        {
            return Err(RepositoryError::Conflict(id));
        }

        stored.state = commit.updated.state;
        stored.current_tier = commit.updated.current_tier;
        stored.tier_started_at = commit.updated.tier_started_at;
        stored.closed_at = commit.updated.closed_at;
        stored.version = commit.expected_version + 1;
        let version = stored.version;

        state.transitions.push(commit.transition);
        let recorded = state.record(&commit.adjudications);
        state.enqueue(&commit.notifications);

        Ok(CommitReceipt { version, recorded })
    }

    async fn list_transitions(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<SolicitudTransition>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .transitions
            .iter()
            .filter(|transition| &transition.solicitud_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl OfferRepository for InMemoryEscalationStore {
    async fn submit_offer(&self, offer: Offer) -> Result<Solicitud, RepositoryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let id = offer.solicitud_id.0.clone();
        let solicitud = state
            .solicitudes
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("solicitud `{id}`")))?;
        offer.validate_against(solicitud)?;

        let offers = state.offers.entry(id).or_default();
        if offers.iter().any(|existing| existing.id == offer.id) {
            return Err(RepositoryError::Conflict(offer.id.0));
        }
        solicitud.record_offer()?;
        let updated = solicitud.clone();

        offers.push(offer);
        offers.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(updated)
    }

    async fn list_for_solicitud(&self, id: &SolicitudId) -> Result<Vec<Offer>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.offers.get(&id.0).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl AdjudicationRepository for InMemoryEscalationStore {
    async fn record(
        &self,
        adjudications: Vec<Adjudication>,
    ) -> Result<Vec<Adjudication>, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.record(&adjudications))
    }

    async fn list_for_solicitud(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<Adjudication>, RepositoryError> {
        let state = self.state.read().await;
        let position = |line_item: &str| {
            state.solicitudes.get(&id.0).and_then(|solicitud| {
                solicitud.line_items.iter().position(|item| item.id.0 == line_item)
            })
        };

        let mut found: Vec<Adjudication> = state
            .adjudications
            .values()
            .filter(|adjudication| &adjudication.solicitud_id == id)
            .cloned()
            .collect();
        found.sort_by(|left, right| {
            position(&left.line_item_id.0)
                .cmp(&position(&right.line_item_id.0))
                .then_with(|| left.line_item_id.cmp(&right.line_item_id))
        });
        Ok(found)
    }
}

#[async_trait::async_trait]
impl TierPlanRepository for InMemoryEscalationStore {
    async fn save_if_absent(
        &self,
        plan: &TierPlan,
        _created_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        if state.plans.contains_key(&plan.solicitud_id.0) {
            return Ok(false);
        }
        state.plans.insert(plan.solicitud_id.0.clone(), plan.clone());
        Ok(true)
    }

    async fn find(&self, id: &SolicitudId) -> Result<Option<TierPlan>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.plans.get(&id.0).cloned())
    }
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryEscalationStore {
    async fn enqueue(&self, entries: Vec<OutboxEntry>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.enqueue(&entries))
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut pending: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|entry| entry.dispatched_at.is_none())
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_dispatched(
        &self,
        id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("outbox entry `{id}`")))?;
        entry.dispatched_at = Some(dispatched_at);
        entry.last_error = None;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .get_mut(id)
            .filter(|entry| entry.dispatched_at.is_none())
            .ok_or_else(|| RepositoryError::NotFound(format!("pending outbox entry `{id}`")))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        Ok(())
    }
}

/// Advisor directory with metrics set directly instead of derived from history.
#[derive(Default)]
pub struct InMemoryAdvisorRepository {
    advisors: RwLock<BTreeMap<String, Advisor>>,
    metrics: RwLock<HashMap<String, AdvisorMetrics>>,
}

impl InMemoryAdvisorRepository {
    pub async fn set_metrics(&self, advisor_id: &AdvisorId, metrics: AdvisorMetrics) {
        self.metrics.write().await.insert(advisor_id.0.clone(), metrics);
    }

    async fn stored_metrics(&self, advisor_id: &AdvisorId) -> AdvisorMetrics {
        self.metrics
            .read()
            .await
            .get(&advisor_id.0)
            .copied()
            .unwrap_or_else(AdvisorMetrics::unknown)
    }
}

#[async_trait::async_trait]
impl AdvisorDirectory for InMemoryAdvisorRepository {
    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError> {
        let advisors = self.advisors.read().await;
        Ok(advisors.values().filter(|advisor| advisor.active).cloned().collect())
    }

    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError> {
        let mut advisors = self.advisors.write().await;
        advisors.insert(advisor.id.0.clone(), advisor);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdvisorMetricsProvider for InMemoryAdvisorRepository {
    async fn activity_rate(
        &self,
        advisor_id: &AdvisorId,
        _since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError> {
        Ok(self.stored_metrics(advisor_id).await.activity)
    }

    async fn performance_rate(
        &self,
        advisor_id: &AdvisorId,
        _since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError> {
        Ok(self.stored_metrics(advisor_id).await.performance)
    }

    async fn trust(&self, advisor_id: &AdvisorId) -> Result<TrustReading, RepositoryError> {
        Ok(self.stored_metrics(advisor_id).await.trust)
    }
}

#[derive(Default)]
pub struct InMemoryGeographyLookup {
    municipalities: RwLock<BTreeMap<String, Municipality>>,
}

#[async_trait::async_trait]
impl GeographyLookup for InMemoryGeographyLookup {
    async fn resolve(
        &self,
        city: &str,
        department: Option<&str>,
    ) -> Result<Option<Municipality>, RepositoryError> {
        let city = normalize_place(city);
        let department = department.map(normalize_place).filter(|value| !value.is_empty());
        if city.is_empty() {
            return Ok(None);
        }

        let municipalities = self.municipalities.read().await;
        Ok(municipalities
            .values()
            .filter(|municipality| normalize_place(&municipality.name) == city)
            .find(|municipality| {
                department
                    .as_ref()
                    .map_or(true, |wanted| normalize_place(&municipality.department) == *wanted)
            })
            .cloned())
    }

    async fn save(&self, municipality: Municipality) -> Result<(), RepositoryError> {
        let mut municipalities = self.municipalities.write().await;
        municipalities.insert(municipality.code.clone(), municipality);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<BTreeMap<String, ConfigEntry>>,
}

#[async_trait::async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.values().cloned().collect())
    }

    async fn put(&self, entry: ConfigEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }
}
