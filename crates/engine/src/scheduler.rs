//! Timeout-driven escalation loop.
//!
//! Each tick reads a snapshot per open solicitud, asks
//! `repuestos_core::escalation::decide` what to do, and commits the decision
//! together with its transition log row, adjudications and notifications.
//! Notifications leave the outbox only after that commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use repuestos_core::domain::adjudication::{SolicitudTransition, TransitionId};
use repuestos_core::domain::solicitud::{SolicitudId, SolicitudState};
use repuestos_core::errors::EngineCondition;
use repuestos_core::escalation::{decide, EscalationDecision, EscalationSnapshot, EvaluationTrigger};
use repuestos_core::notify::EngineEvent;
use repuestos_db::repositories::{DecisionCommit, OutboxEntry, SolicitudSnapshot};

use crate::context::EngineContext;
use crate::dispatch::DispatchReport;
use crate::error::EngineError;
use crate::recorder::log_recorded;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Waiting { remaining_secs: i64 },
    Escalated { from: u8, to: u8, notified: usize },
    Evaluated { trigger: EvaluationTrigger, awarded: usize, unresolved: usize },
    ClosedWithoutOffers,
    /// The solicitud is gone or no longer open.
    Skipped,
    /// Another writer changed the solicitud after the snapshot; retried next tick.
    Conflict,
    Failed { error: String },
}

impl TickOutcome {
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            Self::Escalated { .. } | Self::Evaluated { .. } | Self::ClosedWithoutOffers
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickEntry {
    pub solicitud_id: SolicitudId,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<TickEntry>,
    pub dispatch: DispatchReport,
}

impl TickReport {
    pub fn summary(&self) -> TickSummary {
        TickSummary {
            finished_at: self.finished_at,
            examined: self.entries.len(),
            transitions: self.entries.iter().filter(|entry| entry.outcome.is_transition()).count(),
            conflicts: self
                .entries
                .iter()
                .filter(|entry| entry.outcome == TickOutcome::Conflict)
                .count(),
            failures: self
                .entries
                .iter()
                .filter(|entry| matches!(entry.outcome, TickOutcome::Failed { .. }))
                .count(),
        }
    }
}

/// What the health endpoint reports about the most recent tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub finished_at: DateTime<Utc>,
    pub examined: usize,
    pub transitions: usize,
    pub conflicts: usize,
    pub failures: usize,
}

pub struct EscalationScheduler {
    context: Arc<EngineContext>,
    tick_interval: Duration,
    last_tick: watch::Sender<Option<TickSummary>>,
}

impl EscalationScheduler {
    pub fn new(context: Arc<EngineContext>, tick_interval: Duration) -> Self {
        let (last_tick, _) = watch::channel(None);
        Self { context, tick_interval, last_tick }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Receiver that observes the summary of every completed tick.
    pub fn subscribe(&self) -> watch::Receiver<Option<TickSummary>> {
        self.last_tick.subscribe()
    }

    /// Ticks every `tick_interval` until `cancel` fires. The first tick runs
    /// immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            event_name = "engine.scheduler.started",
            tick_interval_secs = self.tick_interval.as_secs(),
            "escalation scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.tick_all().await {
                        error!(
                            event_name = "engine.scheduler.tick_failed",
                            error = %error,
                            "scheduler tick failed; retrying on next interval"
                        );
                    }
                }
            }
        }

        info!(event_name = "engine.scheduler.stopped", "escalation scheduler stopped");
    }

    /// One pass: deliver leftovers from earlier ticks, then decide every open
    /// solicitud.
    pub async fn tick_all(&self) -> Result<TickReport, EngineError> {
        let started_at = self.context.clock().now();
        let mut dispatch = self.context.dispatch_pending().await?;

        let open = self.context.stores().solicitudes.list_ids_in_state(SolicitudState::Open).await?;
        let mut entries = Vec::with_capacity(open.len());
        for solicitud_id in open {
            let (outcome, delivered) = self.tick_inner(&solicitud_id).await;
            dispatch.dispatched += delivered.dispatched;
            dispatch.failed += delivered.failed;
            entries.push(TickEntry { solicitud_id, outcome });
        }

        let report = TickReport {
            started_at,
            finished_at: self.context.clock().now(),
            entries,
            dispatch,
        };
        let summary = report.summary();
        info!(
            event_name = "engine.scheduler.tick_completed",
            examined = summary.examined,
            transitions = summary.transitions,
            conflicts = summary.conflicts,
            failures = summary.failures,
            dispatched = report.dispatch.dispatched,
            "scheduler tick completed"
        );
        self.last_tick.send_replace(Some(summary));
        Ok(report)
    }

    pub async fn tick_solicitud(&self, solicitud_id: &SolicitudId) -> TickOutcome {
        self.tick_inner(solicitud_id).await.0
    }

    async fn tick_inner(&self, solicitud_id: &SolicitudId) -> (TickOutcome, DispatchReport) {
        let outcome = match self.decide_and_commit(solicitud_id).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_conflict() => {
                warn!(
                    event_name = "engine.scheduler.conflict",
                    condition = EngineCondition::ConcurrentTransitionConflict.as_str(),
                    solicitud_id = %solicitud_id.0,
                    "solicitud changed while deciding; retrying next tick"
                );
                TickOutcome::Conflict
            }
            Err(error) => {
                error!(
                    event_name = "engine.scheduler.solicitud_failed",
                    solicitud_id = %solicitud_id.0,
                    error = %error,
                    "could not tick solicitud"
                );
                TickOutcome::Failed { error: error.to_string() }
            }
        };

        if !outcome.is_transition() {
            return (outcome, DispatchReport::default());
        }
        match self.context.dispatch_pending().await {
            Ok(report) => (outcome, report),
            Err(error) => {
                // The commit stands; the entries stay pending for the next drain.
                error!(
                    event_name = "engine.outbox.drain_failed",
                    solicitud_id = %solicitud_id.0,
                    error = %error,
                    "could not drain outbox after commit"
                );
                (outcome, DispatchReport::default())
            }
        }
    }

    async fn decide_and_commit(
        &self,
        solicitud_id: &SolicitudId,
    ) -> Result<TickOutcome, EngineError> {
        let Some(SolicitudSnapshot { solicitud, offers }) =
            self.context.stores().solicitudes.load_snapshot(solicitud_id).await?
        else {
            return Ok(TickOutcome::Skipped);
        };

        let now = self.context.clock().now();
        let tiers = &self.context.config().tiers;
        let snapshot = EscalationSnapshot::capture(&solicitud, &offers);
        let decision = decide(tiers, &snapshot, now);

        let mut updated = solicitud.clone();
        let mut adjudications = Vec::new();
        let mut notifications = Vec::new();
        let outcome = match decision {
            EscalationDecision::NotOpen => return Ok(TickOutcome::Skipped),
            EscalationDecision::Wait { remaining_secs } => {
                return Ok(TickOutcome::Waiting { remaining_secs })
            }
            EscalationDecision::Escalate { from, to } => {
                updated.escalate_to(to, now, tiers.max_tier)?;
                let plan = self.context.plan_for(&solicitud).await?;
                let notified = plan.advisors_for(to).len();
                if let Some(entry) = self.context.tier_notification(&solicitud.id, &plan, to, now) {
                    notifications.push(entry);
                }
                TickOutcome::Escalated { from, to, notified }
            }
            EscalationDecision::Evaluate { trigger } => {
                let evaluation = self.context.evaluator().evaluate(&solicitud, &offers);
                adjudications = self.context.recorder().build(&solicitud.id, &evaluation, now);
                updated.transition_to(SolicitudState::Evaluated, now)?;
                if evaluation.is_partial() {
                    warn!(
                        event_name = "engine.evaluation.partial",
                        condition = EngineCondition::UnresolvedLineItem.as_str(),
                        solicitud_id = %solicitud.id.0,
                        unresolved = evaluation.unresolved.len(),
                        "line items left without a qualifying offer"
                    );
                    notifications.push(OutboxEntry::pending(
                        EngineEvent::PartialEvaluation {
                            solicitud_id: solicitud.id.clone(),
                            unresolved: evaluation.unresolved.clone(),
                        },
                        now,
                    ));
                }
                TickOutcome::Evaluated {
                    trigger,
                    awarded: evaluation.awards.len(),
                    unresolved: evaluation.unresolved.len(),
                }
            }
            EscalationDecision::CloseWithoutOffers => {
                updated.transition_to(SolicitudState::ClosedNoOffers, now)?;
                warn!(
                    event_name = "engine.solicitud.closed_without_offers",
                    condition = EngineCondition::InsufficientOffers.as_str(),
                    solicitud_id = %solicitud.id.0,
                    tier = solicitud.current_tier,
                    "last tier timed out with no offers"
                );
                notifications.push(OutboxEntry::pending(
                    EngineEvent::ClosedWithoutOffers { solicitud_id: solicitud.id.clone() },
                    now,
                ));
                TickOutcome::ClosedWithoutOffers
            }
        };

        let transition = SolicitudTransition {
            id: TransitionId(Uuid::new_v4().to_string()),
            solicitud_id: solicitud.id.clone(),
            decision: decision.label().to_string(),
            from_state: solicitud.state,
            to_state: updated.state,
            from_tier: solicitud.current_tier,
            to_tier: updated.current_tier,
            complete_offers: snapshot.complete_offers,
            total_offers: snapshot.total_offers,
            decided_at: now,
        };
        let receipt = self
            .context
            .stores()
            .solicitudes
            .commit_decision(DecisionCommit {
                updated,
                expected_version: solicitud.version,
                expected_offer_count: solicitud.offer_count,
                transition,
                adjudications,
                notifications,
            })
            .await?;
        log_recorded(&receipt.recorded);

        info!(
            event_name = "engine.solicitud.transitioned",
            solicitud_id = %solicitud.id.0,
            decision = decision.label(),
            from_tier = solicitud.current_tier,
            complete_offers = snapshot.complete_offers,
            total_offers = snapshot.total_offers,
            version = receipt.version,
            "scheduler decision committed"
        );

        Ok(outcome)
    }
}
