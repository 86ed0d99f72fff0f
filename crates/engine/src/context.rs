use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use repuestos_core::clock::Clock;
use repuestos_core::config::EngineConfig;
use repuestos_core::domain::advisor::AdvisorId;
use repuestos_core::domain::offer::Offer;
use repuestos_core::domain::solicitud::{
    LineItem, LineItemId, Solicitud, SolicitudId, SolicitudState,
};
use repuestos_core::errors::EngineCondition;
use repuestos_core::evaluation::OfferEvaluationEngine;
use repuestos_core::notify::{EngineEvent, NotificationSink};
use repuestos_core::tiers::{NotificationChannel, TierPlan};
use repuestos_db::repositories::{NewSolicitud, OutboxEntry};

use crate::dispatch::{DispatchReport, OutboxDispatcher};
use crate::error::EngineError;
use crate::pool::AdvisorPoolBuilder;
use crate::recorder::AdjudicationRecorder;
use crate::stores::EngineStores;

/// What a caller supplies to open a solicitud.
#[derive(Clone, Debug)]
pub struct SolicitudRequest {
    pub id: SolicitudId,
    pub origin_city: String,
    pub origin_department: Option<String>,
    pub minimum_offers_desired: u32,
    pub line_items: Vec<LineItem>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OpenedSolicitud {
    pub solicitud: Solicitud,
    pub geography_resolved: bool,
    pub tier_one: Vec<AdvisorId>,
    pub pool_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReevaluationReport {
    pub solicitud_id: SolicitudId,
    pub awarded: usize,
    pub newly_recorded: usize,
    pub unresolved: Vec<LineItemId>,
}

/// Everything the engine needs, built once at startup and shared by
/// reference.
pub struct EngineContext {
    config: EngineConfig,
    stores: EngineStores,
    clock: Arc<dyn Clock>,
    pool_builder: AdvisorPoolBuilder,
    evaluator: OfferEvaluationEngine,
    recorder: AdjudicationRecorder,
    dispatcher: OutboxDispatcher,
    plans: RwLock<HashMap<SolicitudId, Arc<TierPlan>>>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        stores: EngineStores,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool_builder: AdvisorPoolBuilder::new(config.scoring, config.tiers.clone()),
            evaluator: OfferEvaluationEngine::new(config.evaluation),
            recorder: AdjudicationRecorder::new(stores.adjudications.clone()),
            dispatcher: OutboxDispatcher::new(stores.outbox.clone(), sink, clock.clone()),
            plans: RwLock::new(HashMap::new()),
            config,
            stores,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &EngineStores {
        &self.stores
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn evaluator(&self) -> &OfferEvaluationEngine {
        &self.evaluator
    }

    pub fn recorder(&self) -> &AdjudicationRecorder {
        &self.recorder
    }

    /// Persists a new solicitud at tier 1 with its tier plan, and notifies
    /// the tier-1 advisors through the outbox.
    pub async fn open_solicitud(
        &self,
        request: SolicitudRequest,
    ) -> Result<OpenedSolicitud, EngineError> {
        let now = self.clock.now();
        let solicitud = Solicitud::open(
            request.id,
            request.origin_city,
            request.origin_department,
            request.minimum_offers_desired,
            request.line_items,
            now,
        )?;

        let pool = self.pool_builder.build(&self.stores, &solicitud, now).await?;
        let tier_one = pool.plan.advisors_for(1);

        let mut notifications = Vec::new();
        if !pool.geography_resolved() {
            notifications.push(OutboxEntry::pending(
                EngineEvent::GeographyUnresolved {
                    solicitud_id: solicitud.id.clone(),
                    origin_city: solicitud.origin_city.clone(),
                },
                now,
            ));
        }
        if let Some(entry) = self.tier_notification(&solicitud.id, &pool.plan, 1, now) {
            notifications.push(entry);
        }

        self.stores
            .solicitudes
            .create(NewSolicitud {
                solicitud: solicitud.clone(),
                plan: pool.plan.clone(),
                notifications,
            })
            .await?;
        self.plans.write().await.insert(solicitud.id.clone(), Arc::new(pool.plan.clone()));

        info!(
            event_name = "engine.solicitud.opened",
            solicitud_id = %solicitud.id.0,
            origin_city = %solicitud.origin_city,
            line_items = solicitud.line_items.len(),
            pool_size = pool.scored.len(),
            tier_one = tier_one.len(),
            "solicitud opened at tier 1"
        );

        self.dispatch_pending().await?;

        Ok(OpenedSolicitud {
            geography_resolved: pool.geography_resolved(),
            pool_size: pool.scored.len(),
            tier_one,
            solicitud,
        })
    }

    /// Offer intake. Bumps the offer count and version, so a scheduler
    /// decision taken before the offer landed will be refused.
    pub async fn submit_offer(&self, offer: Offer) -> Result<Solicitud, EngineError> {
        let offer_id = offer.id.clone();
        let advisor_id = offer.advisor_id.clone();
        let solicitud = self.stores.offers.submit_offer(offer).await?;

        info!(
            event_name = "engine.offer.received",
            solicitud_id = %solicitud.id.0,
            offer_id = %offer_id.0,
            advisor_id = %advisor_id.0,
            offer_count = solicitud.offer_count,
            "offer received"
        );
        Ok(solicitud)
    }

    /// Tier plan for an existing solicitud: memory, then storage, then a
    /// fresh build. A freshly built plan only wins if none was stored first.
    pub async fn plan_for(&self, solicitud: &Solicitud) -> Result<Arc<TierPlan>, EngineError> {
        if let Some(plan) = self.plans.read().await.get(&solicitud.id) {
            return Ok(plan.clone());
        }

        let plan = match self.stores.tier_plans.find(&solicitud.id).await? {
            Some(plan) => plan,
            None => {
                let now = self.clock.now();
                let pool = self.pool_builder.build(&self.stores, solicitud, now).await?;
                if self.stores.tier_plans.save_if_absent(&pool.plan, now).await? {
                    pool.plan
                } else {
                    self.stores.tier_plans.find(&solicitud.id).await?.unwrap_or(pool.plan)
                }
            }
        };

        let plan = Arc::new(plan);
        self.plans.write().await.insert(solicitud.id.clone(), plan.clone());
        Ok(plan)
    }

    /// `tier_notified` outbox entry, or `None` when the tier has nobody in it.
    pub(crate) fn tier_notification(
        &self,
        solicitud_id: &SolicitudId,
        plan: &TierPlan,
        tier: u8,
        now: DateTime<Utc>,
    ) -> Option<OutboxEntry> {
        let advisor_ids = plan.advisors_for(tier);
        if advisor_ids.is_empty() {
            info!(
                event_name = "engine.tier.empty",
                solicitud_id = %solicitud_id.0,
                tier,
                "tier has no advisors; nobody to notify"
            );
            return None;
        }

        let channel = plan
            .tier(tier)
            .map(|assignment| assignment.channel)
            .or_else(|| self.config.tiers.channel_for(tier))
            .unwrap_or(NotificationChannel::Push);
        Some(OutboxEntry::pending(
            EngineEvent::TierNotified {
                solicitud_id: solicitud_id.clone(),
                tier,
                channel,
                advisor_ids,
            },
            now,
        ))
    }

    /// Runs evaluation again for an evaluated solicitud. Line items that
    /// already have an adjudication keep it.
    pub async fn reevaluate(
        &self,
        solicitud_id: &SolicitudId,
    ) -> Result<ReevaluationReport, EngineError> {
        let snapshot = self
            .stores
            .solicitudes
            .load_snapshot(solicitud_id)
            .await?
            .ok_or_else(|| EngineError::SolicitudNotFound(solicitud_id.0.clone()))?;
        if snapshot.solicitud.state != SolicitudState::Evaluated {
            return Err(EngineError::UnexpectedState {
                id: solicitud_id.0.clone(),
                state: snapshot.solicitud.state,
                expected: SolicitudState::Evaluated,
            });
        }

        let outcome = self.evaluator.evaluate(&snapshot.solicitud, &snapshot.offers);
        let adjudications = self.recorder.build(solicitud_id, &outcome, self.clock.now());
        let recorded = self.recorder.record(adjudications).await?;
        if outcome.is_partial() {
            warn!(
                event_name = "engine.evaluation.partial",
                condition = EngineCondition::UnresolvedLineItem.as_str(),
                solicitud_id = %solicitud_id.0,
                unresolved = outcome.unresolved.len(),
                "re-evaluation left line items without a qualifying offer"
            );
        }

        info!(
            event_name = "engine.solicitud.reevaluated",
            solicitud_id = %solicitud_id.0,
            awarded = outcome.awards.len(),
            newly_recorded = recorded.len(),
            "solicitud re-evaluated"
        );

        self.dispatch_pending().await?;

        Ok(ReevaluationReport {
            solicitud_id: solicitud_id.clone(),
            awarded: outcome.awards.len(),
            newly_recorded: recorded.len(),
            unresolved: outcome.unresolved,
        })
    }

    pub async fn dispatch_pending(&self) -> Result<DispatchReport, EngineError> {
        self.dispatcher.drain().await
    }
}
