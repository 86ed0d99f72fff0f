//! Advisor pool construction: eligibility, then scoring, then tiering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use repuestos_core::domain::advisor::{Advisor, AdvisorId};
use repuestos_core::domain::solicitud::Solicitud;
use repuestos_core::errors::EngineCondition;
use repuestos_core::geography::{GeographicEligibilityResolver, Municipality};
use repuestos_core::scoring::{AdvisorScoringEngine, ScoredAdvisor, ScoringConfig};
use repuestos_core::tiers::{TierClassifier, TierConfig, TierPlan};

use crate::error::EngineError;
use crate::stores::EngineStores;

#[derive(Clone, Debug)]
pub struct AdvisorPool {
    pub origin: Option<Municipality>,
    pub scored: Vec<ScoredAdvisor>,
    pub plan: TierPlan,
}

impl AdvisorPool {
    pub fn geography_resolved(&self) -> bool {
        self.origin.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct AdvisorPoolBuilder {
    resolver: GeographicEligibilityResolver,
    scoring: AdvisorScoringEngine,
    classifier: TierClassifier,
}

impl AdvisorPoolBuilder {
    pub fn new(scoring: ScoringConfig, tiers: TierConfig) -> Self {
        Self {
            resolver: GeographicEligibilityResolver,
            scoring: AdvisorScoringEngine::new(scoring),
            classifier: TierClassifier::new(tiers),
        }
    }

    pub async fn build(
        &self,
        stores: &EngineStores,
        solicitud: &Solicitud,
        now: DateTime<Utc>,
    ) -> Result<AdvisorPool, EngineError> {
        let origin = stores
            .geography
            .resolve(&solicitud.origin_city, solicitud.origin_department.as_deref())
            .await?;
        if origin.is_none() {
            warn!(
                event_name = "engine.pool.geography_unresolved",
                condition = EngineCondition::GeographyUnresolved.as_str(),
                solicitud_id = %solicitud.id.0,
                origin_city = %solicitud.origin_city,
                "origin city did not resolve to a known municipality; advisor pool is empty"
            );
        }

        let advisors = match origin {
            Some(_) => stores.advisors.list_active().await?,
            None => Vec::new(),
        };
        let homes = resolve_homes(stores, &advisors).await?;
        let eligible =
            self.resolver.resolve(origin.as_ref(), &advisors, |advisor| homes.get(&advisor.id));

        let windows = self.scoring.config().windows;
        let mut scored = Vec::with_capacity(eligible.len());
        for candidate in &eligible {
            let metrics = stores.metrics.metrics(&candidate.advisor.id, &windows, now).await?;
            let advisor = self.scoring.score(candidate, &metrics, now);
            if !advisor.fallbacks.is_empty() {
                debug!(
                    event_name = "engine.pool.metric_fallback",
                    condition = EngineCondition::NoDataFallback.as_str(),
                    solicitud_id = %solicitud.id.0,
                    advisor_id = %advisor.advisor_id.0,
                    fallbacks = ?advisor.fallbacks,
                    "advisor scored with configured fallback values"
                );
            }
            scored.push(advisor);
        }

        let plan = self.classifier.classify(&solicitud.id, &scored);
        debug!(
            event_name = "engine.pool.classified",
            solicitud_id = %solicitud.id.0,
            eligible = eligible.len(),
            "advisor pool classified into tiers"
        );

        Ok(AdvisorPool { origin, scored, plan })
    }
}

/// Catalog entry for each advisor's own city, looked up once per distinct
/// city and department pair. Advisors in cities the catalog does not know are
/// left out and matched on their stored tags.
async fn resolve_homes(
    stores: &EngineStores,
    advisors: &[Advisor],
) -> Result<HashMap<AdvisorId, Municipality>, EngineError> {
    let mut lookups: HashMap<(String, Option<String>), Option<Municipality>> = HashMap::new();
    let mut homes = HashMap::with_capacity(advisors.len());
    for advisor in advisors {
        let key = (advisor.geography.city.clone(), advisor.geography.department.clone());
        let home = match lookups.get(&key).cloned() {
            Some(found) => found,
            None => {
                let found = stores.geography.resolve(&key.0, key.1.as_deref()).await?;
                lookups.insert(key, found.clone());
                found
            }
        };
        if let Some(home) = home {
            homes.insert(advisor.id.clone(), home);
        }
    }
    Ok(homes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use repuestos_core::domain::advisor::{
        Advisor, AdvisorGeography, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
    };
    use repuestos_core::domain::solicitud::{
        LineItem, LineItemId, Solicitud, SolicitudId, VehicleDescriptor,
    };
    use repuestos_core::geography::{Municipality, ProximityMatch};
    use repuestos_core::scoring::{MetricKind, ScoringConfig};
    use repuestos_core::tiers::TierConfig;
    use repuestos_db::repositories::{
        AdvisorDirectory, GeographyLookup, InMemoryAdvisorRepository, InMemoryEscalationStore,
        InMemoryGeographyLookup,
    };

    use super::AdvisorPoolBuilder;
    use crate::stores::EngineStores;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).single().expect("valid timestamp")
    }

    fn solicitud(city: &str) -> Solicitud {
        solicitud_in(city, None)
    }

    fn solicitud_in(city: &str, department: Option<&str>) -> Solicitud {
        Solicitud::open(
            SolicitudId("SOL-POOL".to_string()),
            city,
            department.map(str::to_string),
            1,
            vec![LineItem {
                id: LineItemId("LI-1".to_string()),
                name: "Kit de embrague".to_string(),
                vehicle: VehicleDescriptor {
                    brand: "Chevrolet".to_string(),
                    line: "Sail".to_string(),
                    year: 2017,
                },
                quantity: 1,
            }],
            now(),
        )
        .expect("valid solicitud")
    }

    fn advisor(id: &str, city: &str, metro: Option<&str>) -> Advisor {
        Advisor {
            id: AdvisorId(id.to_string()),
            name: format!("Advisor {id}"),
            geography: AdvisorGeography {
                city: city.to_string(),
                department: None,
                metro_area: metro.map(str::to_string),
                hub: None,
            },
            active: true,
        }
    }

    async fn stores() -> (EngineStores, Arc<InMemoryAdvisorRepository>) {
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
        advisors.save(advisor("ADV-CITY", "BARRANQUILLA", None)).await.expect("save");
        advisors
            .save(advisor("ADV-METRO", "SOLEDAD", Some("AM BARRANQUILLA")))
            .await
            .expect("save");
        advisors.save(advisor("ADV-FAR", "PASTO", None)).await.expect("save");

        let stores = EngineStores::in_memory(
            Arc::new(InMemoryEscalationStore::default()),
            advisors.clone(),
            geography,
        );
        (stores, advisors)
    }

    #[tokio::test]
    async fn builds_scored_plan_from_resolved_origin() {
        let (stores, advisors) = stores().await;
        advisors
            .set_metrics(
                &AdvisorId("ADV-CITY".to_string()),
                AdvisorMetrics {
                    activity: MetricReading::Rate(1.0),
                    performance: MetricReading::Rate(1.0),
                    trust: TrustReading::Audited { score: 5.0, audited_at: now() },
                },
            )
            .await;

        let builder = AdvisorPoolBuilder::new(ScoringConfig::default(), TierConfig::default());
        let pool = builder.build(&stores, &solicitud("barranquilla"), now()).await.expect("build");

        assert!(pool.geography_resolved());
        assert_eq!(pool.scored.len(), 2);
        assert_eq!(pool.plan.advisors_for(1), vec![AdvisorId("ADV-CITY".to_string())]);

        let metro = pool
            .scored
            .iter()
            .find(|scored| scored.advisor_id.0 == "ADV-METRO")
            .expect("metro advisor scored");
        assert_eq!(metro.proximity, ProximityMatch::SameMetroArea);
        assert_eq!(
            metro.fallbacks,
            vec![MetricKind::Activity, MetricKind::Performance, MetricKind::Trust]
        );
        // 0.40 * 3.5 + 0.60 * 3.0
        assert!((metro.score - 3.2).abs() < 1e-9);
        assert_eq!(pool.plan.advisors_for(4), vec![AdvisorId("ADV-METRO".to_string())]);
        assert!(pool.plan.advisors_for(5).is_empty());
    }

    #[tokio::test]
    async fn advisor_cities_resolve_through_the_catalog() {
        let (stores, advisors) = stores().await;
        let barbosa = |code: &str, department: &str, metro: Option<&str>, hub: &str| Municipality {
            code: code.to_string(),
            name: "Barbosa".to_string(),
            department: department.to_string(),
            metro_area: metro.map(str::to_string),
            hub: Some(hub.to_string()),
        };
        stores
            .geography
            .save(barbosa("05079", "Antioquia", Some("VALLE DE ABURRA"), "ANTIOQUIA"))
            .await
            .expect("save municipality");
        stores
            .geography
            .save(barbosa("68077", "Santander", Some("NONE"), "SANTANDERES"))
            .await
            .expect("save municipality");

        let mut antioquia = advisor("ADV-BARBOSA-ANT", "Barbosa", None);
        antioquia.geography.department = Some("Antioquia".to_string());
        let mut santander = advisor("ADV-BARBOSA-SAN", "Barbosa", None);
        santander.geography.department = Some("Santander".to_string());
        advisors.save(antioquia).await.expect("save");
        advisors.save(santander).await.expect("save");

        let builder = AdvisorPoolBuilder::new(ScoringConfig::default(), TierConfig::default());
        let pool = builder
            .build(&stores, &solicitud_in("Barbosa", Some("Santander")), now())
            .await
            .expect("build");

        let matched: Vec<(&str, ProximityMatch)> = pool
            .scored
            .iter()
            .map(|scored| (scored.advisor_id.0.as_str(), scored.proximity))
            .collect();
        assert_eq!(matched, vec![("ADV-BARBOSA-SAN", ProximityMatch::SameCity)]);
    }

    #[tokio::test]
    async fn unresolved_origin_yields_empty_plan() {
        let (stores, _) = stores().await;
        let builder = AdvisorPoolBuilder::new(ScoringConfig::default(), TierConfig::default());

        let pool = builder.build(&stores, &solicitud("Macondo"), now()).await.expect("build");

        assert!(!pool.geography_resolved());
        assert!(pool.scored.is_empty());
        assert_eq!(pool.plan.total_advisors(), 0);
        assert_eq!(pool.plan.tiers.len(), 5);
    }
}
