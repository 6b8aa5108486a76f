//! Normalizers for market-wide inputs: overnight foreign indices and the fear/greed gauge.

use analysis_core::stats::mean;
use analysis_core::FearGreedReading;
use serde::{Deserialize, Serialize};

const EUROPEAN_WEIGHT: f64 = 0.3;
const ASIAN_WEIGHT: f64 = 0.2;

/// Average index move (percent) that maps to tanh(1) ≈ 0.76 influence.
const REGION_SCALE_PCT: f64 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMove {
    pub name: String,
    pub change_pct: f64,
}

/// Overnight session moves of foreign benchmark indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignMarketSnapshot {
    #[serde(default)]
    pub asian: Vec<IndexMove>,
    #[serde(default)]
    pub european: Vec<IndexMove>,
}

impl ForeignMarketSnapshot {
    fn region_score(moves: &[IndexMove]) -> Option<f64> {
        let changes: Vec<f64> = moves
            .iter()
            .map(|m| m.change_pct)
            .filter(|c| c.is_finite())
            .collect();
        if changes.is_empty() {
            return None;
        }
        Some((mean(&changes) / REGION_SCALE_PCT).tanh())
    }

    pub fn asian_score(&self) -> f64 {
        Self::region_score(&self.asian).unwrap_or(0.0)
    }

    pub fn european_score(&self) -> f64 {
        Self::region_score(&self.european).unwrap_or(0.0)
    }

    /// Europe and Asia blended 3:2, renormalized over the regions that reported.
    pub fn influence_score(&self) -> f64 {
        let parts: Vec<(f64, f64)> = [
            (Self::region_score(&self.european), EUROPEAN_WEIGHT),
            (Self::region_score(&self.asian), ASIAN_WEIGHT),
        ]
        .into_iter()
        .filter_map(|(score, weight)| score.map(|s| (s, weight)))
        .collect();

        let total_weight: f64 = parts.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let blended = parts.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight;
        bound_influence(blended)
    }
}

/// Sanitize an influence value from an external collaborator.
pub fn bound_influence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Contrarian read of the gauge: extreme fear leans bullish, extreme greed bearish.
pub fn fear_greed_contribution(reading: &FearGreedReading) -> f64 {
    if !reading.value.is_finite() {
        return 0.0;
    }
    ((50.0 - reading.value) / 50.0).clamp(-1.0, 1.0)
}
