use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdvisorId(pub String);

/// Where an advisor operates.
///
/// `city` and `department` locate the advisor in the municipality catalog.
/// `metro_area` and `hub` are only consulted when the catalog has no entry
/// for that city.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorGeography {
    pub city: String,
    #[serde(default)]
    pub department: Option<String>,
    pub metro_area: Option<String>,
    pub hub: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisor {
    pub id: AdvisorId,
    pub name: String,
    pub geography: AdvisorGeography,
    pub active: bool,
}

/// A rate metric as reported by the history tables.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetricReading {
    /// Fraction in `0.0..=1.0`.
    Rate(f64),
    NoData,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrustReading {
    Audited { score: f64, audited_at: DateTime<Utc> },
    Unaudited,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvisorMetrics {
    pub activity: MetricReading,
    pub performance: MetricReading,
    pub trust: TrustReading,
}

impl AdvisorMetrics {
    pub fn unknown() -> Self {
        Self {
            activity: MetricReading::NoData,
            performance: MetricReading::NoData,
            trust: TrustReading::Unaudited,
        }
    }
}
