use std::cmp::Ordering;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::solicitud::SolicitudId;
use crate::scoring::ScoredAdvisor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Push,
    DirectMessage,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::DirectMessage => "direct_message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" => Some(Self::Push),
            "direct_message" | "direct-message" | "dm" => Some(Self::DirectMessage),
            _ => None,
        }
    }
}

/// Per-tier thresholds, channels and wait times.
///
/// `thresholds[i]` is the minimum score for tier `i + 1`; the last tier has no
/// threshold and takes everyone left over, so `thresholds` is one shorter than
/// the other two lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub max_tier: u8,
    pub thresholds: Vec<f64>,
    pub wait_minutes: Vec<u32>,
    pub channels: Vec<NotificationChannel>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            max_tier: 5,
            thresholds: vec![4.5, 4.0, 3.5, 3.0],
            wait_minutes: vec![15, 20, 25, 30, 30],
            channels: vec![
                NotificationChannel::DirectMessage,
                NotificationChannel::DirectMessage,
                NotificationChannel::Push,
                NotificationChannel::Push,
                NotificationChannel::Push,
            ],
        }
    }
}

impl TierConfig {
    fn index(&self, tier: u8) -> Option<usize> {
        (1..=self.max_tier).contains(&tier).then(|| usize::from(tier - 1))
    }

    pub fn wait_for(&self, tier: u8) -> Option<Duration> {
        let index = self.index(tier)?;
        self.wait_minutes.get(index).map(|minutes| Duration::minutes(i64::from(*minutes)))
    }

    pub fn channel_for(&self, tier: u8) -> Option<NotificationChannel> {
        let index = self.index(tier)?;
        self.channels.get(index).copied()
    }

    /// `None` for the catch-all last tier.
    pub fn min_score_for(&self, tier: u8) -> Option<f64> {
        let index = self.index(tier)?;
        self.thresholds.get(index).copied()
    }

    pub fn smallest_wait_minutes(&self) -> Option<u32> {
        self.wait_minutes.iter().copied().min()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierMember {
    pub advisor_id: AdvisorId,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub level: u8,
    pub channel: NotificationChannel,
    pub wait_minutes: u32,
    pub members: Vec<TierMember>,
}

impl TierAssignment {
    pub fn advisor_ids(&self) -> Vec<AdvisorId> {
        self.members.iter().map(|member| member.advisor_id.clone()).collect()
    }
}

/// Advisors bucketed into notification waves for one solicitud.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierPlan {
    pub solicitud_id: SolicitudId,
    pub tiers: Vec<TierAssignment>,
}

impl TierPlan {
    pub fn tier(&self, level: u8) -> Option<&TierAssignment> {
        self.tiers.iter().find(|tier| tier.level == level)
    }

    pub fn advisors_for(&self, level: u8) -> Vec<AdvisorId> {
        self.tier(level).map(TierAssignment::advisor_ids).unwrap_or_default()
    }

    pub fn total_advisors(&self) -> usize {
        self.tiers.iter().map(|tier| tier.members.len()).sum()
    }
}

#[derive(Clone, Debug)]
pub struct TierClassifier {
    config: TierConfig,
}

impl TierClassifier {
    pub fn new(config: TierConfig) -> Self {
        Self { config }
    }

    /// Sorts by score descending (advisor id ascending on ties) and drops each
    /// advisor into the first tier whose threshold it meets.
    pub fn classify(&self, solicitud_id: &SolicitudId, scored: &[ScoredAdvisor]) -> TierPlan {
        let mut ranked: Vec<&ScoredAdvisor> = scored.iter().collect();
        ranked.sort_by(|left, right| {
            right
                .score
                .partial_cmp(&left.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.advisor_id.cmp(&right.advisor_id))
        });

        let mut tiers: Vec<TierAssignment> = (1..=self.config.max_tier)
            .map(|level| TierAssignment {
                level,
                channel: self
                    .config
                    .channel_for(level)
                    .unwrap_or(NotificationChannel::Push),
                wait_minutes: self
                    .config
                    .wait_minutes
                    .get(usize::from(level - 1))
                    .copied()
                    .unwrap_or_default(),
                members: Vec::new(),
            })
            .collect();

        for advisor in ranked {
            let level = self.level_for(advisor.score);
            if let Some(tier) = tiers.get_mut(usize::from(level).saturating_sub(1)) {
                tier.members.push(TierMember {
                    advisor_id: advisor.advisor_id.clone(),
                    score: advisor.score,
                });
            }
        }

        TierPlan { solicitud_id: solicitud_id.clone(), tiers }
    }

    pub fn level_for(&self, score: f64) -> u8 {
        (1..self.config.max_tier)
            .find(|level| {
                self.config.min_score_for(*level).is_some_and(|threshold| score >= threshold)
            })
            .unwrap_or(self.config.max_tier)
    }
}
