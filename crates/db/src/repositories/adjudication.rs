use repuestos_core::domain::adjudication::Adjudication;
use repuestos_core::domain::solicitud::SolicitudId;

use super::codec::{adjudication_from_row, insert_adjudications};
use super::{AdjudicationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAdjudicationRepository {
    pool: DbPool,
}

impl SqlAdjudicationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AdjudicationRepository for SqlAdjudicationRepository {
    async fn record(
        &self,
        adjudications: Vec<Adjudication>,
    ) -> Result<Vec<Adjudication>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let recorded = insert_adjudications(&mut *tx, &adjudications).await?;
        tx.commit().await?;
        Ok(recorded)
    }

    async fn list_for_solicitud(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<Adjudication>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                a.id,
                a.solicitud_id,
                a.line_item_id,
                a.offer_id,
                a.advisor_id,
                a.price,
                a.delivery_days,
                a.warranty_months,
                a.scores_json,
                a.candidates_considered,
                a.adjudicated_at
             FROM adjudication a
             LEFT JOIN line_item l
                ON l.solicitud_id = a.solicitud_id AND l.id = a.line_item_id
             WHERE a.solicitud_id = ?
             ORDER BY l.position ASC, a.line_item_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(adjudication_from_row).collect()
    }
}
