use analysis_core::AnalysisError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MODEL_VERSION: &str = "signal-fusion-1";

/// Relative weight of each input in the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub sentiment: f64,
    pub technical: f64,
    pub influence: f64,
    pub fear_greed: f64,
    pub momentum: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            sentiment: 0.35,
            technical: 0.30,
            influence: 0.20,
            fear_greed: 0.05,
            momentum: 0.10,
        }
    }
}

impl SignalWeights {
    pub fn total(&self) -> f64 {
        self.sentiment + self.technical + self.influence + self.fear_greed + self.momentum
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReboundConfig {
    pub base_confidence: f64,
    pub max_confidence: f64,
}

impl Default for ReboundConfig {
    fn default() -> Self {
        Self {
            base_confidence: 50.0,
            max_confidence: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub max_scenarios: usize,
    /// Optional templates below this confidence are dropped
    pub min_optional_confidence: f64,
    /// Prediction confidence needed for the model-path scenario
    pub high_confidence_threshold: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            max_scenarios: 6,
            min_optional_confidence: 15.0,
            high_confidence_threshold: 70.0,
        }
    }
}

/// Tunable parameters of the aggregator and scenario generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: SignalWeights,
    /// k in sigmoid(k * score)
    pub probability_steepness: f64,
    /// Priority keywords only count for news published this recently
    pub session_window_hours: i64,
    pub rebound: ReboundConfig,
    /// Cap on |expected move| for one session, in percent
    pub max_expected_move_pct: f64,
    /// Instruments at or above this multiplier never project less than `min_high_vol_move_pct`
    pub high_vol_multiplier: f64,
    pub min_high_vol_move_pct: f64,
    pub scenarios: ScenarioConfig,
    pub model_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            probability_steepness: 5.0,
            session_window_hours: 24,
            rebound: ReboundConfig::default(),
            max_expected_move_pct: 10.0,
            high_vol_multiplier: 1.5,
            min_high_vol_move_pct: 2.0,
            scenarios: ScenarioConfig::default(),
            model_version: MODEL_VERSION.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, AnalysisError> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| AnalysisError::InvalidData(format!("engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::InvalidData(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let w = &self.weights;
        let all = [w.sentiment, w.technical, w.influence, w.fear_greed, w.momentum];
        if all.iter().any(|v| *v < 0.0) || w.total() <= 0.0 {
            return Err(AnalysisError::InvalidData(
                "signal weights must be non-negative with a positive total".to_string(),
            ));
        }
        if self.probability_steepness <= 0.0 {
            return Err(AnalysisError::InvalidData("probability_steepness must be positive".to_string()));
        }
        if self.rebound.max_confidence < self.rebound.base_confidence {
            return Err(AnalysisError::InvalidData(
                "rebound max_confidence is below base_confidence".to_string(),
            ));
        }
        if self.scenarios.max_scenarios < 2 {
            return Err(AnalysisError::InvalidData("max_scenarios must be at least 2".to_string()));
        }
        Ok(())
    }
}
