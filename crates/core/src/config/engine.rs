//! Engine tunables: advisor scoring, tier policy and offer evaluation.
//!
//! The same values can come from the TOML `[engine]` section or from
//! key/value entries in the configuration store; `apply_entry` maps a store
//! key onto the matching field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ConfigError;
use crate::evaluation::EvaluationConfig;
use crate::scoring::{ScoringConfig, MAX_FACTOR, WEIGHT_SUM_TOLERANCE};
use crate::tiers::{NotificationChannel, TierConfig};

/// Upper bound for `tiers.max_tier`.
pub const TIER_LIMIT: u8 = 10;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub tiers: TierConfig,
    pub evaluation: EvaluationConfig,
}

impl EngineConfig {
    /// Every store key this config understands, in display order.
    pub const KEYS: &'static [&'static str] = &[
        "scoring.weights.proximity",
        "scoring.weights.activity",
        "scoring.weights.performance",
        "scoring.weights.trust",
        "scoring.proximity.same_city",
        "scoring.proximity.same_metro_area",
        "scoring.proximity.same_hub",
        "scoring.fallback.activity",
        "scoring.fallback.performance",
        "scoring.fallback.trust",
        "scoring.windows.activity_days",
        "scoring.windows.performance_days",
        "scoring.windows.audit_validity_days",
        "tiers.max_tier",
        "tiers.thresholds",
        "tiers.wait_minutes",
        "tiers.channels",
        "evaluation.min_coverage",
        "evaluation.weights.price",
        "evaluation.weights.time",
        "evaluation.weights.warranty",
    ];

    pub fn apply_entry(&mut self, key: &str, value: &Value) -> Result<(), ConfigError> {
        let scoring = &mut self.scoring;
        let evaluation = &mut self.evaluation;
        match key {
            "scoring.weights.proximity" => scoring.weights.proximity = number(key, value)?,
            "scoring.weights.activity" => scoring.weights.activity = number(key, value)?,
            "scoring.weights.performance" => scoring.weights.performance = number(key, value)?,
            "scoring.weights.trust" => scoring.weights.trust = number(key, value)?,
            "scoring.proximity.same_city" => scoring.proximity.same_city = number(key, value)?,
            "scoring.proximity.same_metro_area" => {
                scoring.proximity.same_metro_area = number(key, value)?
            }
            "scoring.proximity.same_hub" => scoring.proximity.same_hub = number(key, value)?,
            "scoring.fallback.activity" => scoring.fallback.activity = number(key, value)?,
            "scoring.fallback.performance" => scoring.fallback.performance = number(key, value)?,
            "scoring.fallback.trust" => scoring.fallback.trust = number(key, value)?,
            "scoring.windows.activity_days" => {
                scoring.windows.activity_days = unsigned(key, value)?
            }
            "scoring.windows.performance_days" => {
                scoring.windows.performance_days = unsigned(key, value)?
            }
            "scoring.windows.audit_validity_days" => {
                scoring.windows.audit_validity_days = unsigned(key, value)?
            }
            "tiers.max_tier" => {
                let max_tier = unsigned(key, value)?;
                self.tiers.max_tier = u8::try_from(max_tier).map_err(|_| ConfigError::InvalidEntry {
                    key: key.to_string(),
                    reason: format!("{max_tier} does not fit a tier number"),
                })?;
            }
            "tiers.thresholds" => self.tiers.thresholds = number_list(key, value)?,
            "tiers.wait_minutes" => {
                self.tiers.wait_minutes = list(key, value, |item| unsigned(key, item))?
            }
            "tiers.channels" => self.tiers.channels = list(key, value, |item| channel(key, item))?,
            "evaluation.min_coverage" => evaluation.min_coverage = number(key, value)?,
            "evaluation.weights.price" => evaluation.weights.price = number(key, value)?,
            "evaluation.weights.time" => evaluation.weights.time = number(key, value)?,
            "evaluation.weights.warranty" => evaluation.weights.warranty = number(key, value)?,
            other => return Err(ConfigError::UnknownEntry(other.to_string())),
        }
        Ok(())
    }

    /// Current value for a store key, in the shape `apply_entry` accepts.
    pub fn entry(&self, key: &str) -> Option<Value> {
        let scoring = &self.scoring;
        let evaluation = &self.evaluation;
        let value = match key {
            "scoring.weights.proximity" => json!(scoring.weights.proximity),
            "scoring.weights.activity" => json!(scoring.weights.activity),
            "scoring.weights.performance" => json!(scoring.weights.performance),
            "scoring.weights.trust" => json!(scoring.weights.trust),
            "scoring.proximity.same_city" => json!(scoring.proximity.same_city),
            "scoring.proximity.same_metro_area" => json!(scoring.proximity.same_metro_area),
            "scoring.proximity.same_hub" => json!(scoring.proximity.same_hub),
            "scoring.fallback.activity" => json!(scoring.fallback.activity),
            "scoring.fallback.performance" => json!(scoring.fallback.performance),
            "scoring.fallback.trust" => json!(scoring.fallback.trust),
            "scoring.windows.activity_days" => json!(scoring.windows.activity_days),
            "scoring.windows.performance_days" => json!(scoring.windows.performance_days),
            "scoring.windows.audit_validity_days" => json!(scoring.windows.audit_validity_days),
            "tiers.max_tier" => json!(self.tiers.max_tier),
            "tiers.thresholds" => json!(self.tiers.thresholds),
            "tiers.wait_minutes" => json!(self.tiers.wait_minutes),
            "tiers.channels" => {
                json!(self.tiers.channels.iter().map(|c| c.as_str()).collect::<Vec<_>>())
            }
            "evaluation.min_coverage" => json!(evaluation.min_coverage),
            "evaluation.weights.price" => json!(evaluation.weights.price),
            "evaluation.weights.time" => json!(evaluation.weights.time),
            "evaluation.weights.warranty" => json!(evaluation.weights.warranty),
            _ => return None,
        };
        Some(value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_scoring(&self.scoring)?;
        validate_tiers(&self.tiers)?;
        validate_evaluation(&self.evaluation)?;
        Ok(())
    }
}

fn validate_scoring(scoring: &ScoringConfig) -> Result<(), ConfigError> {
    let weights = &scoring.weights;
    let all = [weights.proximity, weights.activity, weights.performance, weights.trust];
    if all.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
        return Err(ConfigError::Validation(
            "scoring.weights must be finite and non-negative".to_string(),
        ));
    }
    if (weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::Validation(format!(
            "scoring.weights must sum to 1.0 (got {:.6})",
            weights.sum()
        )));
    }

    let factors = [
        ("scoring.proximity.same_city", scoring.proximity.same_city),
        ("scoring.proximity.same_metro_area", scoring.proximity.same_metro_area),
        ("scoring.proximity.same_hub", scoring.proximity.same_hub),
        ("scoring.fallback.activity", scoring.fallback.activity),
        ("scoring.fallback.performance", scoring.fallback.performance),
        ("scoring.fallback.trust", scoring.fallback.trust),
    ];
    for (key, factor) in factors {
        if !(0.0..=MAX_FACTOR).contains(&factor) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=5.0")));
        }
    }

    let windows = &scoring.windows;
    if windows.activity_days == 0
        || windows.performance_days == 0
        || windows.audit_validity_days == 0
    {
        return Err(ConfigError::Validation(
            "scoring.windows must all be at least one day".to_string(),
        ));
    }

    Ok(())
}

fn validate_tiers(tiers: &TierConfig) -> Result<(), ConfigError> {
    if tiers.max_tier == 0 || tiers.max_tier > TIER_LIMIT {
        return Err(ConfigError::Validation(format!(
            "tiers.max_tier must be in range 1..={TIER_LIMIT}"
        )));
    }

    let levels = usize::from(tiers.max_tier);
    if tiers.thresholds.len() != levels - 1 {
        return Err(ConfigError::Validation(format!(
            "tiers.thresholds needs {} entries for {} tiers (the last tier takes the rest)",
            levels - 1,
            levels
        )));
    }
    if tiers.thresholds.windows(2).any(|pair| pair[0] <= pair[1]) {
        return Err(ConfigError::Validation(
            "tiers.thresholds must be strictly descending".to_string(),
        ));
    }
    if tiers.wait_minutes.len() != levels {
        return Err(ConfigError::Validation(format!(
            "tiers.wait_minutes needs one entry per tier ({levels})"
        )));
    }
    if tiers.wait_minutes.iter().any(|minutes| *minutes == 0) {
        return Err(ConfigError::Validation(
            "tiers.wait_minutes entries must be greater than zero".to_string(),
        ));
    }
    if tiers.channels.len() != levels {
        return Err(ConfigError::Validation(format!(
            "tiers.channels needs one entry per tier ({levels})"
        )));
    }

    Ok(())
}

fn validate_evaluation(evaluation: &EvaluationConfig) -> Result<(), ConfigError> {
    let weights = &evaluation.weights;
    if [weights.price, weights.time, weights.warranty]
        .iter()
        .any(|weight| !weight.is_finite() || *weight < 0.0)
    {
        return Err(ConfigError::Validation(
            "evaluation.weights must be finite and non-negative".to_string(),
        ));
    }
    if (weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::Validation(format!(
            "evaluation.weights must sum to 1.0 (got {:.6})",
            weights.sum()
        )));
    }
    if !(evaluation.min_coverage > 0.0 && evaluation.min_coverage <= 1.0) {
        return Err(ConfigError::Validation(
            "evaluation.min_coverage must be in range (0.0, 1.0]".to_string(),
        ));
    }
    Ok(())
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEntry { key: key.to_string(), reason: reason.into() }
}

fn number(key: &str, value: &Value) -> Result<f64, ConfigError> {
    value.as_f64().ok_or_else(|| invalid(key, format!("expected a number, got {value}")))
}

fn unsigned(key: &str, value: &Value) -> Result<u32, ConfigError> {
    value
        .as_u64()
        .and_then(|raw| u32::try_from(raw).ok())
        .ok_or_else(|| invalid(key, format!("expected a non-negative integer, got {value}")))
}

fn channel(key: &str, value: &Value) -> Result<NotificationChannel, ConfigError> {
    value
        .as_str()
        .and_then(NotificationChannel::parse)
        .ok_or_else(|| invalid(key, format!("expected `push` or `direct_message`, got {value}")))
}

fn number_list(key: &str, value: &Value) -> Result<Vec<f64>, ConfigError> {
    list(key, value, |item| number(key, item))
}

fn list<T>(
    key: &str,
    value: &Value,
    parse: impl Fn(&Value) -> Result<T, ConfigError>,
) -> Result<Vec<T>, ConfigError> {
    value
        .as_array()
        .ok_or_else(|| invalid(key, format!("expected an array, got {value}")))?
        .iter()
        .map(parse)
        .collect()
}
