use chrono::{DateTime, Utc};
use sqlx::Row;

use repuestos_core::domain::solicitud::SolicitudId;
use repuestos_core::tiers::TierPlan;

use super::codec::{encode_json, encode_timestamp, parse_json};
use super::{RepositoryError, TierPlanRepository};
use crate::DbPool;

/// Tier plans are computed once per solicitud and never rewritten, so later
/// changes to advisor metrics or tier config do not reshuffle who gets
/// notified next.
pub struct SqlTierPlanRepository {
    pool: DbPool,
}

impl SqlTierPlanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TierPlanRepository for SqlTierPlanRepository {
    async fn save_if_absent(
        &self,
        plan: &TierPlan,
        created_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO tier_plan (solicitud_id, plan_json, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(solicitud_id) DO NOTHING",
        )
        .bind(&plan.solicitud_id.0)
        .bind(encode_json("plan_json", plan)?)
        .bind(encode_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, id: &SolicitudId) -> Result<Option<TierPlan>, RepositoryError> {
        let row = sqlx::query("SELECT plan_json FROM tier_plan WHERE solicitud_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let plan_json = row.try_get::<String, _>("plan_json")?;
            parse_json("plan_json", &plan_json)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use repuestos_core::domain::advisor::AdvisorId;
    use repuestos_core::domain::solicitud::{
        LineItem, LineItemId, Solicitud, SolicitudId, VehicleDescriptor,
    };
    use repuestos_core::geography::ProximityMatch;
    use repuestos_core::scoring::{AdvisorComponents, ScoredAdvisor};
    use repuestos_core::tiers::{TierClassifier, TierConfig};

    use super::SqlTierPlanRepository;
    use crate::repositories::{
        NewSolicitud, SolicitudRepository, SqlSolicitudRepository, TierPlanRepository,
    };
    use crate::{connect_with_settings, migrations};

    fn scored(id: &str, score: f64) -> ScoredAdvisor {
        ScoredAdvisor {
            advisor_id: AdvisorId(id.to_string()),
            proximity: ProximityMatch::SameCity,
            components: AdvisorComponents {
                proximity: 5.0,
                activity: 3.0,
                performance: 3.0,
                trust: 3.0,
            },
            fallbacks: Vec::new(),
            score,
        }
    }

    #[tokio::test]
    async fn first_plan_wins() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let solicitudes = SqlSolicitudRepository::new(pool.clone());
        let repo = SqlTierPlanRepository::new(pool.clone());
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).single().expect("valid timestamp");
        let solicitud = Solicitud::open(
            SolicitudId("SOL-PLAN-1".to_string()),
            "TUNJA",
            None,
            1,
            vec![LineItem {
                id: LineItemId("LI-1".to_string()),
                name: "Bomba de agua".to_string(),
                vehicle: VehicleDescriptor {
                    brand: "Kia".to_string(),
                    line: "Picanto".to_string(),
                    year: 2019,
                },
                quantity: 1,
            }],
            now,
        )
        .expect("valid solicitud");
        let classifier = TierClassifier::new(TierConfig::default());

        let original =
            classifier.classify(&solicitud.id, &[scored("ADV-1", 4.8), scored("ADV-2", 3.1)]);
        solicitudes
            .create(NewSolicitud {
                solicitud: solicitud.clone(),
                plan: original.clone(),
                notifications: Vec::new(),
            })
            .await
            .expect("create");

        let reshuffled = classifier.classify(&solicitud.id, &[scored("ADV-1", 1.0)]);
        assert!(!repo.save_if_absent(&reshuffled, now).await.expect("second save"));

        let stored = repo.find(&solicitud.id).await.expect("find").expect("plan exists");
        assert_eq!(stored, original);
        assert_eq!(stored.advisors_for(1), vec![AdvisorId("ADV-1".to_string())]);
        assert!(repo.find(&SolicitudId("SOL-NONE".to_string())).await.expect("find").is_none());

        pool.close().await;
    }
}
