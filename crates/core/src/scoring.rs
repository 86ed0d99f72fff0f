//! Multi-criteria advisor scoring.
//!
//! Every factor lives on the same 1-5 scale so the weighted sum does too.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::advisor::{AdvisorId, AdvisorMetrics, MetricReading, TrustReading};
use crate::geography::{EligibleAdvisor, ProximityMatch};

/// Tolerance for "weights sum to 1.0".
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

pub const MIN_FACTOR: f64 = 1.0;
pub const MAX_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub proximity: f64,
    pub activity: f64,
    pub performance: f64,
    pub trust: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { proximity: 0.40, activity: 0.25, performance: 0.20, trust: 0.15 }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.proximity + self.activity + self.performance + self.trust
    }
}

/// Factor value awarded per geographic rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityScores {
    pub same_city: f64,
    pub same_metro_area: f64,
    pub same_hub: f64,
}

impl Default for ProximityScores {
    fn default() -> Self {
        Self { same_city: 5.0, same_metro_area: 3.5, same_hub: 2.0 }
    }
}

impl ProximityScores {
    pub fn for_match(&self, proximity: ProximityMatch) -> f64 {
        match proximity {
            ProximityMatch::SameCity => self.same_city,
            ProximityMatch::SameMetroArea => self.same_metro_area,
            ProximityMatch::SameHub => self.same_hub,
        }
    }
}

/// Factor values used when a metric has no data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackDefaults {
    pub activity: f64,
    pub performance: f64,
    pub trust: f64,
}

impl Default for FallbackDefaults {
    fn default() -> Self {
        Self { activity: 3.0, performance: 3.0, trust: 3.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWindows {
    pub activity_days: u32,
    pub performance_days: u32,
    pub audit_validity_days: u32,
}

impl Default for MetricWindows {
    fn default() -> Self {
        Self { activity_days: 30, performance_days: 180, audit_validity_days: 30 }
    }
}

impl MetricWindows {
    pub fn activity(&self) -> Duration {
        Duration::days(i64::from(self.activity_days))
    }

    pub fn performance(&self) -> Duration {
        Duration::days(i64::from(self.performance_days))
    }

    pub fn audit_validity(&self) -> Duration {
        Duration::days(i64::from(self.audit_validity_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub proximity: ProximityScores,
    pub fallback: FallbackDefaults,
    pub windows: MetricWindows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Activity,
    Performance,
    Trust,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvisorComponents {
    pub proximity: f64,
    pub activity: f64,
    pub performance: f64,
    pub trust: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAdvisor {
    pub advisor_id: AdvisorId,
    pub proximity: ProximityMatch,
    pub components: AdvisorComponents,
    /// Metrics that had no usable data and used the configured default.
    pub fallbacks: Vec<MetricKind>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct AdvisorScoringEngine {
    config: ScoringConfig,
}

impl AdvisorScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(
        &self,
        eligible: &EligibleAdvisor,
        metrics: &AdvisorMetrics,
        now: DateTime<Utc>,
    ) -> ScoredAdvisor {
        let mut fallbacks = Vec::new();
        let fallback = &self.config.fallback;

        let activity = rate_factor(metrics.activity).unwrap_or_else(|| {
            fallbacks.push(MetricKind::Activity);
            fallback.activity
        });
        let performance = rate_factor(metrics.performance).unwrap_or_else(|| {
            fallbacks.push(MetricKind::Performance);
            fallback.performance
        });
        let trust = self.trust_factor(metrics.trust, now).unwrap_or_else(|| {
            fallbacks.push(MetricKind::Trust);
            fallback.trust
        });

        let components = AdvisorComponents {
            proximity: self.config.proximity.for_match(eligible.proximity),
            activity,
            performance,
            trust,
        };

        ScoredAdvisor {
            advisor_id: eligible.advisor.id.clone(),
            proximity: eligible.proximity,
            score: self.composite(&components),
            components,
            fallbacks,
        }
    }

    pub fn composite(&self, components: &AdvisorComponents) -> f64 {
        let weights = &self.config.weights;
        components.proximity * weights.proximity
            + components.activity * weights.activity
            + components.performance * weights.performance
            + components.trust * weights.trust
    }

    fn trust_factor(&self, reading: TrustReading, now: DateTime<Utc>) -> Option<f64> {
        match reading {
            TrustReading::Audited { score, audited_at } => {
                let expired = now - audited_at > self.config.windows.audit_validity();
                (!expired && score.is_finite()).then(|| score.clamp(0.0, MAX_FACTOR))
            }
            TrustReading::Unaudited => None,
        }
    }
}

/// Maps a `0..=1` rate onto the factor scale; `None` when there is no data.
fn rate_factor(reading: MetricReading) -> Option<f64> {
    match reading {
        MetricReading::Rate(rate) if rate.is_finite() => {
            Some(MIN_FACTOR + rate.clamp(0.0, 1.0) * (MAX_FACTOR - MIN_FACTOR))
        }
        MetricReading::Rate(_) | MetricReading::NoData => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{AdvisorScoringEngine, MetricKind, ScoringConfig, ScoringWeights};
    use crate::domain::advisor::{
        Advisor, AdvisorGeography, AdvisorId, AdvisorMetrics, MetricReading, TrustReading,
    };
    use crate::geography::{EligibleAdvisor, ProximityMatch};

    fn eligible(proximity: ProximityMatch) -> EligibleAdvisor {
        EligibleAdvisor {
            advisor: Advisor {
                id: AdvisorId("ADV-7".to_string()),
                name: "Autopartes La 80".to_string(),
                geography: AdvisorGeography {
                    city: "MEDELLIN".to_string(),
                    department: None,
                    metro_area: None,
                    hub: None,
                },
                active: true,
            },
            proximity,
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((ScoringWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_activity_history_uses_configured_fallback() {
        let engine = AdvisorScoringEngine::new(ScoringConfig::default());
        let metrics = AdvisorMetrics {
            activity: MetricReading::NoData,
            performance: MetricReading::Rate(1.0),
            trust: TrustReading::Audited { score: 4.0, audited_at: now() - Duration::days(3) },
        };

        let scored = engine.score(&eligible(ProximityMatch::SameCity), &metrics, now());

        assert_eq!(scored.components.activity, 3.0);
        assert_eq!(scored.fallbacks, vec![MetricKind::Activity]);
        assert!(scored.components.activity > 0.0);
    }

    #[test]
    fn composite_follows_weighted_formula() {
        let engine = AdvisorScoringEngine::new(ScoringConfig::default());
        let metrics = AdvisorMetrics {
            activity: MetricReading::Rate(0.5),
            performance: MetricReading::Rate(0.25),
            trust: TrustReading::Audited { score: 4.5, audited_at: now() - Duration::days(1) },
        };

        let scored = engine.score(&eligible(ProximityMatch::SameMetroArea), &metrics, now());

        // proximity 3.5, activity 3.0, performance 2.0, trust 4.5
        let expected = 3.5 * 0.40 + 3.0 * 0.25 + 2.0 * 0.20 + 4.5 * 0.15;
        assert!((scored.score - expected).abs() < 1e-9);
        assert!(scored.fallbacks.is_empty());
    }

    #[test]
    fn expired_audit_falls_back() {
        let engine = AdvisorScoringEngine::new(ScoringConfig::default());
        let metrics = AdvisorMetrics {
            activity: MetricReading::Rate(1.0),
            performance: MetricReading::Rate(1.0),
            trust: TrustReading::Audited { score: 5.0, audited_at: now() - Duration::days(45) },
        };

        let scored = engine.score(&eligible(ProximityMatch::SameHub), &metrics, now());

        assert_eq!(scored.components.trust, 3.0);
        assert_eq!(scored.components.proximity, 2.0);
        assert_eq!(scored.fallbacks, vec![MetricKind::Trust]);
    }

    #[test]
    fn fallbacks_are_configurable() {
        let mut config = ScoringConfig::default();
        config.fallback.performance = 2.5;
        let engine = AdvisorScoringEngine::new(config);

        let scored =
            engine.score(&eligible(ProximityMatch::SameCity), &AdvisorMetrics::unknown(), now());

        assert_eq!(scored.components.performance, 2.5);
        assert_eq!(scored.fallbacks.len(), 3);
    }
}
