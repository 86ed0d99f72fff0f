use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use repuestos_core::clock::{Clock, ManualClock};
use repuestos_core::config::EngineConfig;
use repuestos_core::domain::adjudication::SolicitudTransition;
use repuestos_core::domain::advisor::{
    Advisor, AdvisorGeography, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
};
use repuestos_core::domain::offer::{Offer, OfferDetail, OfferId};
use repuestos_core::domain::solicitud::{
    LineItem, LineItemId, Solicitud, SolicitudId, SolicitudState, VehicleDescriptor,
};
use repuestos_core::escalation::EvaluationTrigger;
use repuestos_core::geography::Municipality;
use repuestos_core::notify::{EngineEvent, InMemoryNotificationSink};
use repuestos_db::repositories::{
    AdvisorDirectory, CommitReceipt, DecisionCommit, GeographyLookup, InMemoryAdvisorRepository,
    InMemoryEscalationStore, InMemoryGeographyLookup, NewSolicitud, OfferRepository,
    OutboxRepository, RepositoryError, SolicitudRepository, SolicitudSnapshot,
};
use repuestos_engine::{
    EngineContext, EngineError, EngineStores, EscalationScheduler, SolicitudRequest, TickOutcome,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 8, 0, 0).single().expect("valid timestamp")
}

fn advisor(id: &str, city: &str, metro: Option<&str>) -> Advisor {
    Advisor {
        id: AdvisorId(id.to_string()),
        name: format!("Repuestos {id}"),
        geography: AdvisorGeography {
            city: city.to_string(),
            department: None,
            metro_area: metro.map(str::to_string),
            hub: None,
        },
        active: true,
    }
}

/// Shares its clock, sink and store with the test so each can be inspected.
struct Harness {
    context: Arc<EngineContext>,
    scheduler: EscalationScheduler,
    clock: ManualClock,
    sink: InMemoryNotificationSink,
    escalation: Arc<InMemoryEscalationStore>,
}

async fn harness_with(
    solicitudes: impl FnOnce(Arc<InMemoryEscalationStore>) -> Option<Arc<dyn SolicitudRepository>>,
) -> Harness {
    let escalation = Arc::new(InMemoryEscalationStore::default());
    let advisors = Arc::new(InMemoryAdvisorRepository::default());
    let geography = Arc::new(InMemoryGeographyLookup::default());

    geography
        .save(Municipality {
            code: "08001".to_string(),
            name: "Barranquilla".to_string(),
            department: "Atlántico".to_string(),
            metro_area: Some("AM BARRANQUILLA".to_string()),
            hub: Some("CARIBE".to_string()),
        })
        .await
        .expect("save municipality");
    advisors.save(advisor("ADV-CITY", "BARRANQUILLA", None)).await.expect("save advisor");
    advisors
        .save(advisor("ADV-METRO", "SOLEDAD", Some("AM BARRANQUILLA")))
        .await
        .expect("save advisor");
    advisors
        .set_metrics(
            &AdvisorId("ADV-CITY".to_string()),
            AdvisorMetrics {
                activity: MetricReading::Rate(1.0),
                performance: MetricReading::Rate(1.0),
                trust: TrustReading::Audited { score: 5.0, audited_at: start() },
            },
        )
        .await;

    let mut stores = EngineStores::in_memory(escalation.clone(), advisors, geography);
    if let Some(wrapped) = solicitudes(escalation.clone()) {
        stores.solicitudes = wrapped;
    }

    let clock = ManualClock::new(start());
    let sink = InMemoryNotificationSink::default();
    let context = Arc::new(EngineContext::new(
        EngineConfig::default(),
        stores,
        Arc::new(sink.clone()),
        Arc::new(clock.clone()),
    ));
    let scheduler = EscalationScheduler::new(context.clone(), StdDuration::from_millis(20));

    Harness { context, scheduler, clock, sink, escalation }
}

async fn harness() -> Harness {
    harness_with(|_| None).await
}

fn request(id: &str, city: &str, minimum_offers_desired: u32) -> SolicitudRequest {
    SolicitudRequest {
        id: SolicitudId(id.to_string()),
        origin_city: city.to_string(),
        origin_department: None,
        minimum_offers_desired,
        line_items: vec![LineItem {
            id: LineItemId("LI-1".to_string()),
            name: "Pastillas de freno delanteras".to_string(),
            vehicle: VehicleDescriptor {
                brand: "Renault".to_string(),
                line: "Logan".to_string(),
                year: 2019,
            },
            quantity: 2,
        }],
    }
}

fn offer(solicitud: &str, id: &str, advisor: &str, price: i64, at: DateTime<Utc>) -> Offer {
    Offer {
        id: OfferId(id.to_string()),
        solicitud_id: SolicitudId(solicitud.to_string()),
        advisor_id: AdvisorId(advisor.to_string()),
        details: vec![OfferDetail {
            line_item_id: LineItemId("LI-1".to_string()),
            price: Decimal::new(price, 0),
            warranty_months: 3,
            delivery_days: 2,
        }],
        submitted_at: at,
    }
}

fn sid(id: &str) -> SolicitudId {
    SolicitudId(id.to_string())
}

async fn stored(harness: &Harness, id: &str) -> Solicitud {
    harness
        .context
        .stores()
        .solicitudes
        .find_by_id(&sid(id))
        .await
        .expect("find solicitud")
        .expect("solicitud exists")
}

async fn transitions(harness: &Harness, id: &str) -> Vec<String> {
    harness
        .context
        .stores()
        .solicitudes
        .list_transitions(&sid(id))
        .await
        .expect("list transitions")
        .into_iter()
        .map(|transition: SolicitudTransition| transition.decision)
        .collect()
}

#[tokio::test]
async fn escalates_from_tier_four_and_evaluates_single_offer_at_max_tier() {
    let harness = harness().await;
    let opened =
        harness.context.open_solicitud(request("SOL-C", "barranquilla", 2)).await.expect("open");
    assert!(opened.geography_resolved);
    assert_eq!(opened.tier_one, vec![AdvisorId("ADV-CITY".to_string())]);
    assert_eq!(opened.pool_size, 2);

    let report = harness.scheduler.tick_all().await.expect("tick");
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].outcome, TickOutcome::Waiting { remaining_secs: 900 });

    let id = sid("SOL-C");
    for (minutes, from, to, notified) in [(15, 1, 2, 0), (20, 2, 3, 0), (25, 3, 4, 1)] {
        harness.clock.advance(Duration::minutes(minutes));
        assert_eq!(
            harness.scheduler.tick_solicitud(&id).await,
            TickOutcome::Escalated { from, to, notified }
        );
    }

    harness
        .context
        .submit_offer(offer("SOL-C", "OF-1", "ADV-METRO", 85_000, harness.clock.now()))
        .await
        .expect("submit offer");

    // One complete offer is short of two, and tier 4 is not the last tier.
    harness.clock.advance(Duration::minutes(30));
    assert_eq!(
        harness.scheduler.tick_solicitud(&id).await,
        TickOutcome::Escalated { from: 4, to: 5, notified: 0 }
    );

    // At the last tier a single offer is evaluated rather than discarded.
    harness.clock.advance(Duration::minutes(30));
    assert_eq!(
        harness.scheduler.tick_solicitud(&id).await,
        TickOutcome::Evaluated {
            trigger: EvaluationTrigger::MaxTierReached,
            awarded: 1,
            unresolved: 0,
        }
    );

    let solicitud = stored(&harness, "SOL-C").await;
    assert_eq!(solicitud.state, SolicitudState::Evaluated);
    assert_eq!(solicitud.current_tier, 5);
    assert_eq!(
        transitions(&harness, "SOL-C").await,
        vec!["escalate", "escalate", "escalate", "escalate", "evaluate_max_tier_reached"]
    );

    let adjudications = harness.context.recorder().list(&id).await.expect("list adjudications");
    assert_eq!(adjudications.len(), 1);
    assert_eq!(adjudications[0].offer_id, OfferId("OF-1".to_string()));
    assert_eq!(adjudications[0].price, Decimal::new(85_000, 0));

    let events = harness.sink.events_for(&id);
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::TierNotified { tier: 4, advisor_ids, .. }
            if advisor_ids == &vec![AdvisorId("ADV-METRO".to_string())]
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::Adjudicated { advisor_id, .. } if advisor_id.0 == "ADV-METRO"
    )));

    let after = harness.scheduler.tick_all().await.expect("tick");
    assert!(after.entries.is_empty(), "evaluated solicitudes are no longer ticked");
}

#[tokio::test]
async fn evaluates_once_wait_elapses_with_minimum_offers() {
    let harness = harness().await;
    harness.context.open_solicitud(request("SOL-MIN", "Barranquilla", 1)).await.expect("open");
    harness
        .context
        .submit_offer(offer("SOL-MIN", "OF-1", "ADV-CITY", 60_000, harness.clock.now()))
        .await
        .expect("submit offer");

    let id = sid("SOL-MIN");
    harness.clock.advance(Duration::minutes(5));
    assert_eq!(
        harness.scheduler.tick_solicitud(&id).await,
        TickOutcome::Waiting { remaining_secs: 600 }
    );

    harness.clock.advance(Duration::minutes(10));
    assert_eq!(
        harness.scheduler.tick_solicitud(&id).await,
        TickOutcome::Evaluated {
            trigger: EvaluationTrigger::MinimumOffersReached,
            awarded: 1,
            unresolved: 0,
        }
    );
    assert_eq!(stored(&harness, "SOL-MIN").await.current_tier, 1);
}

#[tokio::test]
async fn closes_without_offers_after_last_tier_and_refuses_late_offers() {
    let harness = harness().await;
    harness.context.open_solicitud(request("SOL-NONE", "Barranquilla", 1)).await.expect("open");

    let id = sid("SOL-NONE");
    for minutes in [15, 20, 25, 30] {
        harness.clock.advance(Duration::minutes(minutes));
        assert!(matches!(
            harness.scheduler.tick_solicitud(&id).await,
            TickOutcome::Escalated { .. }
        ));
    }
    harness.clock.advance(Duration::minutes(30));
    assert_eq!(harness.scheduler.tick_solicitud(&id).await, TickOutcome::ClosedWithoutOffers);

    let solicitud = stored(&harness, "SOL-NONE").await;
    assert_eq!(solicitud.state, SolicitudState::ClosedNoOffers);
    assert_eq!(solicitud.closed_at, Some(harness.clock.now()));
    assert!(harness
        .sink
        .events_for(&id)
        .iter()
        .any(|event| matches!(event, EngineEvent::ClosedWithoutOffers { .. })));

    let late = harness
        .context
        .submit_offer(offer("SOL-NONE", "OF-LATE", "ADV-CITY", 40_000, harness.clock.now()))
        .await;
    assert!(late.is_err(), "closed solicitudes take no more offers");
    assert_eq!(harness.scheduler.tick_solicitud(&id).await, TickOutcome::Skipped);
}

#[tokio::test]
async fn unresolved_origin_raises_operator_alert_and_notifies_nobody() {
    let harness = harness().await;
    let opened =
        harness.context.open_solicitud(request("SOL-GEO", "Macondo", 1)).await.expect("open");

    assert!(!opened.geography_resolved);
    assert!(opened.tier_one.is_empty());
    assert_eq!(opened.pool_size, 0);

    let events = harness.sink.events_for(&sid("SOL-GEO"));
    assert_eq!(
        events,
        vec![EngineEvent::GeographyUnresolved {
            solicitud_id: sid("SOL-GEO"),
            origin_city: "Macondo".to_string(),
        }]
    );

    // Empty tiers still run out their wait before escalating.
    harness.clock.advance(Duration::minutes(15));
    assert_eq!(
        harness.scheduler.tick_solicitud(&sid("SOL-GEO")).await,
        TickOutcome::Escalated { from: 1, to: 2, notified: 0 }
    );
}

/// Lands an offer between the scheduler's snapshot read and its commit.
struct RacingSolicitudes {
    inner: Arc<InMemoryEscalationStore>,
    racing: Arc<Mutex<Option<Offer>>>,
}

#[async_trait]
impl SolicitudRepository for RacingSolicitudes {
    async fn create(&self, new: NewSolicitud) -> Result<(), RepositoryError> {
        self.inner.create(new).await
    }

    async fn find_by_id(&self, id: &SolicitudId) -> Result<Option<Solicitud>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list_ids_in_state(
        &self,
        state: SolicitudState,
    ) -> Result<Vec<SolicitudId>, RepositoryError> {
        self.inner.list_ids_in_state(state).await
    }

    async fn load_snapshot(
        &self,
        id: &SolicitudId,
    ) -> Result<Option<SolicitudSnapshot>, RepositoryError> {
        let snapshot = self.inner.load_snapshot(id).await?;
        let racing = self.racing.lock().expect("racing lock").take();
        if let Some(offer) = racing {
            self.inner.submit_offer(offer).await?;
        }
        Ok(snapshot)
    }

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<CommitReceipt, RepositoryError> {
        self.inner.commit_decision(commit).await
    }

    async fn list_transitions(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<SolicitudTransition>, RepositoryError> {
        self.inner.list_transitions(id).await
    }
}

#[tokio::test]
async fn decision_is_refused_when_an_offer_lands_mid_tick() {
    let racing = Arc::new(Mutex::new(None));
    let slot = racing.clone();
    let harness = harness_with(move |inner| {
        let wrapped: Arc<dyn SolicitudRepository> =
            Arc::new(RacingSolicitudes { inner, racing: slot });
        Some(wrapped)
    })
    .await;
    let scheduler = &harness.scheduler;

    harness.context.open_solicitud(request("SOL-RACE", "Barranquilla", 1)).await.expect("open");
    harness.clock.advance(Duration::minutes(15));
    *racing.lock().expect("racing lock") =
        Some(offer("SOL-RACE", "OF-RACE", "ADV-CITY", 70_000, harness.clock.now()));

    let id = sid("SOL-RACE");
    assert_eq!(scheduler.tick_solicitud(&id).await, TickOutcome::Conflict);

    let solicitud = stored(&harness, "SOL-RACE").await;
    assert_eq!(solicitud.current_tier, 1, "the stale escalation must not land");
    assert_eq!(solicitud.offer_count, 1);
    assert!(transitions(&harness, "SOL-RACE").await.is_empty());

    // The next tick sees the offer and evaluates instead of escalating.
    assert_eq!(
        scheduler.tick_solicitud(&id).await,
        TickOutcome::Evaluated {
            trigger: EvaluationTrigger::MinimumOffersReached,
            awarded: 1,
            unresolved: 0,
        }
    );
}

#[tokio::test]
async fn failed_deliveries_stay_pending_until_the_sink_recovers() {
    let harness = harness().await;
    harness.sink.set_unavailable(true);
    harness.context.open_solicitud(request("SOL-OUT", "Barranquilla", 1)).await.expect("open");

    assert!(harness.sink.events().is_empty());
    let pending = harness.escalation.list_pending(10).await.expect("list pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "tier_notified:SOL-OUT:1");
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.is_some());

    harness.sink.set_unavailable(false);
    let report = harness.scheduler.tick_all().await.expect("tick");
    assert_eq!(report.dispatch.dispatched, 1);
    assert_eq!(report.dispatch.failed, 0);
    assert!(matches!(
        harness.sink.events().as_slice(),
        [EngineEvent::TierNotified { tier: 1, .. }]
    ));
    assert!(harness.escalation.list_pending(10).await.expect("list pending").is_empty());

    let again = harness.context.dispatch_pending().await.expect("drain");
    assert_eq!(again.dispatched, 0, "delivered entries are not sent twice");
}

#[tokio::test]
async fn reevaluation_keeps_existing_adjudications() {
    let harness = harness().await;
    harness.context.open_solicitud(request("SOL-RE", "Barranquilla", 1)).await.expect("open");

    let id = sid("SOL-RE");
    let early = harness.context.reevaluate(&id).await;
    assert!(matches!(
        early,
        Err(EngineError::UnexpectedState { state: SolicitudState::Open, .. })
    ));

    harness
        .context
        .submit_offer(offer("SOL-RE", "OF-1", "ADV-CITY", 90_000, harness.clock.now()))
        .await
        .expect("submit offer");
    harness.clock.advance(Duration::minutes(15));
    assert!(matches!(
        harness.scheduler.tick_solicitud(&id).await,
        TickOutcome::Evaluated { awarded: 1, .. }
    ));

    let report = harness.context.reevaluate(&id).await.expect("reevaluate");
    assert_eq!(report.awarded, 1);
    assert_eq!(report.newly_recorded, 0);
    assert!(report.unresolved.is_empty());

    let adjudicated = harness
        .sink
        .events_for(&id)
        .into_iter()
        .filter(|event| matches!(event, EngineEvent::Adjudicated { .. }))
        .count();
    assert_eq!(adjudicated, 1);

    let missing = harness.context.reevaluate(&sid("SOL-NOPE")).await;
    assert!(matches!(missing, Err(EngineError::SolicitudNotFound(_))));
}

#[tokio::test]
async fn run_loop_publishes_tick_summaries_until_cancelled() {
    let harness = harness().await;
    harness.context.open_solicitud(request("SOL-RUN", "Barranquilla", 1)).await.expect("open");

    let scheduler = Arc::new(harness.scheduler);
    let mut last_tick = scheduler.subscribe();
    assert!(last_tick.borrow().is_none());

    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tokio::time::timeout(StdDuration::from_secs(5), last_tick.changed())
        .await
        .expect("a tick completes")
        .expect("scheduler still running");
    let summary = (*last_tick.borrow()).expect("summary published");
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.transitions, 0);
    assert_eq!(summary.failures, 0);

    cancel.cancel();
    tokio::time::timeout(StdDuration::from_secs(5), runner)
        .await
        .expect("scheduler stops on cancel")
        .expect("scheduler task joins");
}
