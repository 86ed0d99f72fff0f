use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use repuestos_core::domain::adjudication::{Adjudication, AdjudicationId};
use repuestos_core::domain::solicitud::SolicitudId;
use repuestos_core::evaluation::EvaluationOutcome;
use repuestos_db::repositories::AdjudicationRepository;

use crate::error::EngineError;

/// Turns evaluation winners into adjudication records.
///
/// Storage keeps at most one adjudication per (solicitud, line item); a
/// repeated write is dropped, and only rows actually written produce an
/// `adjudicated` notification.
pub struct AdjudicationRecorder {
    adjudications: Arc<dyn AdjudicationRepository>,
}

impl AdjudicationRecorder {
    pub fn new(adjudications: Arc<dyn AdjudicationRepository>) -> Self {
        Self { adjudications }
    }

    pub fn build(
        &self,
        solicitud_id: &SolicitudId,
        outcome: &EvaluationOutcome,
        now: DateTime<Utc>,
    ) -> Vec<Adjudication> {
        outcome
            .awards
            .iter()
            .map(|award| Adjudication {
                id: AdjudicationId(Uuid::new_v4().to_string()),
                solicitud_id: solicitud_id.clone(),
                line_item_id: award.line_item_id.clone(),
                offer_id: award.offer_id.clone(),
                advisor_id: award.advisor_id.clone(),
                price: award.price,
                delivery_days: award.delivery_days,
                warranty_months: award.warranty_months,
                scores: award.scores,
                candidates_considered: award.candidates_considered,
                adjudicated_at: now,
            })
            .collect()
    }

    /// Writes outside a scheduler decision, e.g. an operator re-evaluation.
    pub async fn record(
        &self,
        adjudications: Vec<Adjudication>,
    ) -> Result<Vec<Adjudication>, EngineError> {
        let recorded = self.adjudications.record(adjudications).await?;
        log_recorded(&recorded);
        Ok(recorded)
    }

    pub async fn list(&self, solicitud_id: &SolicitudId) -> Result<Vec<Adjudication>, EngineError> {
        Ok(self.adjudications.list_for_solicitud(solicitud_id).await?)
    }
}

pub(crate) fn log_recorded(recorded: &[Adjudication]) {
    for adjudication in recorded {
        info!(
            event_name = "engine.adjudication.recorded",
            solicitud_id = %adjudication.solicitud_id.0,
            line_item_id = %adjudication.line_item_id.0,
            offer_id = %adjudication.offer_id.0,
            advisor_id = %adjudication.advisor_id.0,
            price = %adjudication.price,
            scaled_score = adjudication.scores.scaled,
            "line item adjudicated"
        );
    }
}
