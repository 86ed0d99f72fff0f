//! Per-line-item offer evaluation.
//!
//! Each line item is judged on its own: only offers covering enough of the
//! solicitud compete, each criterion is min-max normalized across that
//! competing set, and the weighted total picks the winner. Different line
//! items of one solicitud can go to different advisors.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::offer::{Offer, OfferDetail, OfferId};
use crate::domain::solicitud::{LineItemId, Solicitud};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationWeights {
    pub price: f64,
    pub time: f64,
    pub warranty: f64,
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self { price: 0.50, time: 0.35, warranty: 0.15 }
    }
}

impl EvaluationWeights {
    pub fn sum(&self) -> f64 {
        self.price + self.time + self.warranty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub weights: EvaluationWeights,
    /// Minimum fraction of line items an offer must price to compete.
    pub min_coverage: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { weights: EvaluationWeights::default(), min_coverage: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price: f64,
    pub time: f64,
    pub warranty: f64,
    /// Weighted composite in `0.0..=1.0`.
    pub total: f64,
    /// `1 + total * 4`, in `1.0..=5.0`.
    pub scaled: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemAward {
    pub line_item_id: LineItemId,
    pub offer_id: OfferId,
    pub advisor_id: AdvisorId,
    pub price: Decimal,
    pub delivery_days: u32,
    pub warranty_months: u32,
    pub scores: ScoreBreakdown,
    pub candidates_considered: u32,
}

/// One competing offer's scores for a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub offer_id: OfferId,
    pub advisor_id: AdvisorId,
    pub scores: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub awards: Vec<LineItemAward>,
    /// Line items with no qualifying offer.
    pub unresolved: Vec<LineItemId>,
}

impl EvaluationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn award_for(&self, line_item_id: &LineItemId) -> Option<&LineItemAward> {
        self.awards.iter().find(|award| &award.line_item_id == line_item_id)
    }
}

/// Totals are compared at this many decimal places, so criteria that tie in
/// exact arithmetic also tie here.
const TOTAL_SCALE: u32 = 12;

struct Scored<'a> {
    offer: &'a Offer,
    detail: &'a OfferDetail,
    total: Decimal,
    scores: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy)]
struct DecimalWeights {
    price: Decimal,
    time: Decimal,
    warranty: Decimal,
}

impl DecimalWeights {
    // Weights are validated finite and non-negative at config load.
    fn from_config(weights: &EvaluationWeights) -> Self {
        let convert = |weight: f64| Decimal::from_f64(weight).unwrap_or_default();
        Self {
            price: convert(weights.price),
            time: convert(weights.time),
            warranty: convert(weights.warranty),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfferEvaluationEngine {
    config: EvaluationConfig,
    weights: DecimalWeights,
}

impl OfferEvaluationEngine {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { weights: DecimalWeights::from_config(&config.weights), config }
    }

    pub fn evaluate(&self, solicitud: &Solicitud, offers: &[Offer]) -> EvaluationOutcome {
        let qualifying = self.qualifying(solicitud, offers);

        let mut outcome = EvaluationOutcome::default();
        for item in &solicitud.line_items {
            let ranked = self.rank(&item.id, &qualifying);
            match ranked.first() {
                Some(winner) => outcome.awards.push(LineItemAward {
                    line_item_id: item.id.clone(),
                    offer_id: winner.offer.id.clone(),
                    advisor_id: winner.offer.advisor_id.clone(),
                    price: winner.detail.price,
                    delivery_days: winner.detail.delivery_days,
                    warranty_months: winner.detail.warranty_months,
                    scores: winner.scores,
                    candidates_considered: ranked.len() as u32,
                }),
                None => outcome.unresolved.push(item.id.clone()),
            }
        }
        outcome
    }

    /// Every qualifying offer's scores for one line item, best first.
    pub fn score_line_item(
        &self,
        solicitud: &Solicitud,
        offers: &[Offer],
        line_item_id: &LineItemId,
    ) -> Vec<CandidateScore> {
        let qualifying = self.qualifying(solicitud, offers);
        self.rank(line_item_id, &qualifying)
            .into_iter()
            .map(|scored| CandidateScore {
                offer_id: scored.offer.id.clone(),
                advisor_id: scored.offer.advisor_id.clone(),
                scores: scored.scores,
            })
            .collect()
    }

    fn qualifying<'a>(&self, solicitud: &Solicitud, offers: &'a [Offer]) -> Vec<&'a Offer> {
        let total_items = solicitud.line_items.len();
        offers
            .iter()
            .filter(|offer| offer.solicitud_id == solicitud.id)
            .filter(|offer| offer.coverage(total_items) + 1e-9 >= self.config.min_coverage)
            .collect()
    }

    /// Higher total wins; on equal totals the earlier submission wins, then
    /// the lower price, then the smaller offer id.
    fn rank<'a>(&self, line_item_id: &LineItemId, qualifying: &[&'a Offer]) -> Vec<Scored<'a>> {
        let candidates: Vec<(&'a Offer, &'a OfferDetail)> = qualifying
            .iter()
            .copied()
            .filter_map(|offer| offer.detail_for(line_item_id).map(|detail| (offer, detail)))
            .collect();

        let prices = Range::of(candidates.iter().map(|(_, detail)| detail.price));
        let days =
            Range::of(candidates.iter().map(|(_, detail)| Decimal::from(detail.delivery_days)));
        let warranties =
            Range::of(candidates.iter().map(|(_, detail)| Decimal::from(detail.warranty_months)));

        let mut scored: Vec<Scored<'a>> = candidates
            .into_iter()
            .map(|(offer, detail)| {
                let price = prices.lower_is_better(detail.price);
                let time = days.lower_is_better(Decimal::from(detail.delivery_days));
                let warranty = warranties.higher_is_better(Decimal::from(detail.warranty_months));
                let total = self.total(price, time, warranty);
                Scored {
                    offer,
                    detail,
                    total,
                    scores: ScoreBreakdown {
                        price: to_score(price),
                        time: to_score(time),
                        warranty: to_score(warranty),
                        total: to_score(total),
                        scaled: to_score(Decimal::ONE + total * Decimal::from(4)),
                    },
                }
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .total
                .cmp(&left.total)
                .then_with(|| left.offer.submitted_at.cmp(&right.offer.submitted_at))
                .then_with(|| left.detail.price.cmp(&right.detail.price))
                .then_with(|| left.offer.id.cmp(&right.offer.id))
        });
        scored
    }

    fn total(&self, price: Decimal, time: Decimal, warranty: Decimal) -> Decimal {
        let weights = &self.weights;
        (price * weights.price + time * weights.time + warranty * weights.warranty)
            .round_dp(TOTAL_SCALE)
            .clamp(Decimal::ZERO, Decimal::ONE)
    }
}

/// Scores live in `0..=5`, which always fits an `f64`.
fn to_score(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

struct Range {
    min: Decimal,
    max: Decimal,
}

impl Range {
    fn of(values: impl Iterator<Item = Decimal>) -> Self {
        let mut range = Self { min: Decimal::MAX, max: Decimal::MIN };
        for value in values {
            range.min = range.min.min(value);
            range.max = range.max.max(value);
        }
        range
    }

    fn spread(&self) -> Option<Decimal> {
        let spread = self.max - self.min;
        (spread > Decimal::ZERO).then_some(spread)
    }

    fn lower_is_better(&self, value: Decimal) -> Decimal {
        match self.spread() {
            Some(spread) => ((self.max - value) / spread).clamp(Decimal::ZERO, Decimal::ONE),
            None => Decimal::ONE,
        }
    }

    fn higher_is_better(&self, value: Decimal) -> Decimal {
        match self.spread() {
            Some(spread) => ((value - self.min) / spread).clamp(Decimal::ZERO, Decimal::ONE),
            None => Decimal::ONE,
        }
    }
}
