use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use repuestos_core::domain::advisor::{
    Advisor, AdvisorGeography, AdvisorId, MetricReading, TrustReading,
};
use repuestos_core::domain::offer::OfferId;

use super::codec::{encode_timestamp, parse_timestamp};
use super::{rate_from_counts, AdvisorDirectory, AdvisorMetricsProvider, RepositoryError};
use crate::DbPool;

/// History rows the metrics are derived from. They are written by the
/// surrounding marketplace, not by the engine. Every kind except
/// `SolicitudNotified` refers to one offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryEventKind {
    SolicitudNotified,
    OfferSubmitted,
    /// The offer was adjudicated at least one line item.
    OfferWon,
    /// The client accepted the adjudicated offer.
    OfferAccepted,
    OfferDelivered,
}

impl HistoryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SolicitudNotified => "solicitud_notified",
            Self::OfferSubmitted => "offer_submitted",
            Self::OfferWon => "offer_won",
            Self::OfferAccepted => "offer_accepted",
            Self::OfferDelivered => "offer_delivered",
        }
    }
}

pub struct SqlAdvisorRepository {
    pool: DbPool,
}

impl SqlAdvisorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record_event(
        &self,
        advisor_id: &AdvisorId,
        kind: HistoryEventKind,
        offer_id: Option<&OfferId>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO advisor_history_event (advisor_id, kind, offer_id, occurred_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&advisor_id.0)
        .bind(kind.as_str())
        .bind(offer_id.map(|id| id.0.as_str()))
        .bind(encode_timestamp(occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_audit(
        &self,
        advisor_id: &AdvisorId,
        score: f64,
        audited_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO advisor_trust_audit (advisor_id, score, audited_at)
             VALUES (?, ?, ?)
             ON CONFLICT(advisor_id, audited_at) DO UPDATE SET score = excluded.score",
        )
        .bind(&advisor_id.0)
        .bind(score)
        .bind(encode_timestamp(audited_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_events(
        &self,
        advisor_id: &AdvisorId,
        kind: HistoryEventKind,
        since: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM advisor_history_event
             WHERE advisor_id = ? AND kind = ? AND occurred_at >= ?",
        )
        .bind(&advisor_id.0)
        .bind(kind.as_str())
        .bind(encode_timestamp(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("count")?)
    }

    /// Offers won since `since` that the client accepted and that were
    /// delivered after that acceptance.
    async fn count_fulfilled(
        &self,
        advisor_id: &AdvisorId,
        since: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT won.offer_id) AS count
             FROM advisor_history_event won
             JOIN advisor_history_event accepted
                ON accepted.advisor_id = won.advisor_id
               AND accepted.offer_id = won.offer_id
               AND accepted.kind = ?
             JOIN advisor_history_event delivered
                ON delivered.advisor_id = won.advisor_id
               AND delivered.offer_id = won.offer_id
               AND delivered.kind = ?
               AND delivered.occurred_at >= accepted.occurred_at
             WHERE won.advisor_id = ? AND won.kind = ? AND won.occurred_at >= ?",
        )
        .bind(HistoryEventKind::OfferAccepted.as_str())
        .bind(HistoryEventKind::OfferDelivered.as_str())
        .bind(&advisor_id.0)
        .bind(HistoryEventKind::OfferWon.as_str())
        .bind(encode_timestamp(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("count")?)
    }
}

#[async_trait::async_trait]
impl AdvisorDirectory for SqlAdvisorRepository {
    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, city, department, metro_area, hub, active
             FROM advisor
             WHERE active = 1
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(advisor_from_row).collect()
    }

    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO advisor (id, name, city, department, metro_area, hub, active)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                city = excluded.city,
                department = excluded.department,
                metro_area = excluded.metro_area,
                hub = excluded.hub,
                active = excluded.active",
        )
        .bind(&advisor.id.0)
        .bind(&advisor.name)
        .bind(&advisor.geography.city)
        .bind(advisor.geography.department.as_deref())
        .bind(advisor.geography.metro_area.as_deref())
        .bind(advisor.geography.hub.as_deref())
        .bind(advisor.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdvisorMetricsProvider for SqlAdvisorRepository {
    async fn activity_rate(
        &self,
        advisor_id: &AdvisorId,
        since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError> {
        let notified =
            self.count_events(advisor_id, HistoryEventKind::SolicitudNotified, since).await?;
        let submitted =
            self.count_events(advisor_id, HistoryEventKind::OfferSubmitted, since).await?;
        Ok(rate_from_counts(submitted, notified))
    }

    async fn performance_rate(
        &self,
        advisor_id: &AdvisorId,
        since: DateTime<Utc>,
    ) -> Result<MetricReading, RepositoryError> {
        let submitted =
            self.count_events(advisor_id, HistoryEventKind::OfferSubmitted, since).await?;
        let fulfilled = self.count_fulfilled(advisor_id, since).await?;
        Ok(rate_from_counts(fulfilled, submitted))
    }

    async fn trust(&self, advisor_id: &AdvisorId) -> Result<TrustReading, RepositoryError> {
        let row = sqlx::query(
            "SELECT score, audited_at
             FROM advisor_trust_audit
             WHERE advisor_id = ?
             ORDER BY audited_at DESC
             LIMIT 1",
        )
        .bind(&advisor_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(TrustReading::Audited {
                score: row.try_get("score")?,
                audited_at: parse_timestamp("audited_at", row.try_get("audited_at")?)?,
            }),
            None => Ok(TrustReading::Unaudited),
        }
    }
}

fn advisor_from_row(row: SqliteRow) -> Result<Advisor, RepositoryError> {
    Ok(Advisor {
        id: AdvisorId(row.try_get("id")?),
        name: row.try_get("name")?,
        geography: AdvisorGeography {
            city: row.try_get("city")?,
            department: row.try_get("department")?,
            metro_area: row.try_get("metro_area")?,
            hub: row.try_get("hub")?,
        },
        active: row.try_get("active")?,
    })
}
