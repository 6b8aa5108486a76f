//! Signal fusion: turns a technical snapshot, scored news and market-wide
//! context into directional predictions and scenario sets, and resolves those
//! scenarios against the realized close.

pub mod aggregator;
pub mod config;
pub mod correction;
pub mod influence;
pub mod overrides;
pub mod projection;
pub mod rebound;
pub mod resolver;
pub mod scenarios;

#[cfg(test)]
mod test_support;

pub use aggregator::{
    decide_direction, CompositeAggregator, DecisionSource, DirectionDecision, PredictionInputs,
    PredictionOutcome, ScoreBreakdown,
};
pub use config::{EngineConfig, ReboundConfig, ScenarioConfig, SignalWeights, MODEL_VERSION};
pub use correction::{CorrectionSeverity, CorrectionWarning};
pub use influence::{ForeignMarketSnapshot, IndexMove};
pub use overrides::OverrideDecision;
pub use rebound::{ReboundAnalysis, ReboundStrength};
pub use resolver::{reference_price, resolve_batch, Resolution};
pub use scenarios::{
    regeneration_decision, PredictionBias, RegenerationDecision, ScenarioGenerator, ScenarioQuote,
    ScenarioSignals,
};
