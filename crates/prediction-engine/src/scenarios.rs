//! Scenario sets: a handful of mutually ranked price outcomes for one session.

use analysis_core::session::is_session_closed;
use analysis_core::stats::{round_cents, round_to};
use analysis_core::{Direction, Instrument, Prediction, Quote, Scenario, ScenarioBatch, ScenarioTimeframe, ScenarioType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use technical_analysis::{MacdState, TechnicalSnapshot, VolatilityLevel};

use crate::config::ScenarioConfig;

/// Daily sigma (percent) at which bands start to widen.
const BASELINE_VOLATILITY_PCT: f64 = 1.5;
const MIN_MODEL_BAND_PCT: f64 = 0.5;

/// Prices the scenario bands are anchored to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioQuote {
    pub current_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
}

impl ScenarioQuote {
    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            current_price: quote.current_price,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            previous_close: quote.previous_close,
        }
    }

    /// Next-session anchor: the predicted close stands in for the live price.
    pub fn from_prediction(prediction: &Prediction) -> Self {
        Self {
            current_price: prediction.predicted_price,
            open: prediction.predicted_price,
            high: prediction.predicted_high,
            low: prediction.predicted_low,
            previous_close: prediction.predicted_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionBias {
    pub direction: Direction,
    /// Display confidence, 0 to 100
    pub confidence: f64,
    pub expected_pct_move: f64,
}

impl From<&Prediction> for PredictionBias {
    fn from(p: &Prediction) -> Self {
        Self {
            direction: p.direction,
            confidence: p.confidence_score as f64,
            expected_pct_move: p.expected_pct_move,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSignals {
    pub rsi: f64,
    pub macd_state: MacdState,
    /// Daily sigma of returns, percent
    pub volatility: f64,
    pub volatility_level: VolatilityLevel,
    pub volume_ratio: f64,
    pub momentum: f64,
    /// -1.0 to 1.0
    pub sentiment: f64,
    pub bias: Option<PredictionBias>,
}

impl ScenarioSignals {
    pub fn from_snapshot(snapshot: &TechnicalSnapshot, sentiment: f64, bias: Option<PredictionBias>) -> Self {
        Self {
            rsi: snapshot.rsi,
            macd_state: snapshot.macd_state,
            volatility: snapshot.volatility,
            volatility_level: snapshot.volatility_level,
            volume_ratio: snapshot.volume_ratio,
            momentum: snapshot.momentum,
            sentiment: sentiment.clamp(-1.0, 1.0),
            bias,
        }
    }

    fn bias_direction(&self) -> Option<Direction> {
        self.bias.as_ref().map(|b| b.direction)
    }
}

struct Candidate {
    scenario_type: ScenarioType,
    min: f64,
    max: f64,
    confidence: f64,
    triggers: Vec<String>,
}

fn side_band(direction: Direction, near: f64, far: f64) -> (f64, f64) {
    match direction {
        Direction::Up => (near, far),
        Direction::Down => (-far, -near),
    }
}

pub struct ScenarioGenerator {
    config: ScenarioConfig,
}

impl ScenarioGenerator {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }

    /// Band multiplier from recent volatility and the instrument's own multiplier.
    pub fn band_scale(volatility: f64, volatility_multiplier: f64) -> f64 {
        (volatility / BASELINE_VOLATILITY_PCT).max(1.0) * volatility_multiplier.max(0.1)
    }

    /// Bullish and bearish are always present; optional shapes join when
    /// their confidence clears the floor. Sorted by confidence.
    pub fn generate(
        &self,
        instrument: &Instrument,
        timeframe: ScenarioTimeframe,
        quote: &ScenarioQuote,
        signals: &ScenarioSignals,
    ) -> Vec<Scenario> {
        let scale = Self::band_scale(signals.volatility, instrument.volatility_multiplier);

        let mut required = vec![self.bullish(signals, scale), self.bearish(signals, scale)];
        let mut optional: Vec<Candidate> = [
            self.neutral(signals, scale),
            self.momentum_reversal(signals, scale),
            self.volatility_breakout(signals, scale),
            self.volatility_expansion(signals, scale),
            self.accumulation(signals, scale),
            self.distribution(signals, scale),
            self.model_path(signals),
        ]
        .into_iter()
        .flatten()
        .filter(|c| c.confidence >= self.config.min_optional_confidence)
        .collect();

        sort_by_confidence(&mut optional);
        optional.truncate(self.config.max_scenarios.saturating_sub(required.len()));
        required.extend(optional);
        sort_by_confidence(&mut required);

        let total: f64 = required.iter().map(|c| c.confidence).sum();
        let scenarios: Vec<Scenario> = required
            .into_iter()
            .map(|c| self.materialize(c, quote, signals, total))
            .collect();

        tracing::debug!(
            symbol = %instrument.symbol,
            timeframe = timeframe.as_str(),
            count = scenarios.len(),
            scale,
            "Generated scenarios"
        );
        scenarios
    }

    fn bullish(&self, s: &ScenarioSignals, scale: f64) -> Candidate {
        let mut confidence = 30.0;
        let mut triggers = Vec::new();
        if s.macd_state == MacdState::Bullish {
            confidence += 10.0;
            triggers.push("MACD bullish".to_string());
        }
        if s.sentiment > 0.0 {
            confidence += 20.0 * s.sentiment;
            triggers.push(format!("Positive news {:+.2}", s.sentiment));
        }
        if s.bias_direction() == Some(Direction::Up) {
            confidence += 10.0;
            triggers.push("Model leans bullish".to_string());
        }
        Candidate {
            scenario_type: ScenarioType::Bullish,
            min: 0.5 * scale,
            max: 3.0 * scale,
            confidence,
            triggers,
        }
    }

    fn bearish(&self, s: &ScenarioSignals, scale: f64) -> Candidate {
        let mut confidence = 30.0;
        let mut triggers = Vec::new();
        if s.macd_state == MacdState::Bearish {
            confidence += 10.0;
            triggers.push("MACD bearish".to_string());
        }
        if s.sentiment < 0.0 {
            confidence += 20.0 * s.sentiment.abs();
            triggers.push(format!("Negative news {:+.2}", s.sentiment));
        }
        if s.bias_direction() == Some(Direction::Down) {
            confidence += 10.0;
            triggers.push("Model leans bearish".to_string());
        }
        Candidate {
            scenario_type: ScenarioType::Bearish,
            min: -3.0 * scale,
            max: -0.5 * scale,
            confidence,
            triggers,
        }
    }

    fn neutral(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        let mut confidence = 25.0;
        let mut triggers = Vec::new();
        if s.volatility_level == VolatilityLevel::Low {
            confidence += 10.0;
            triggers.push("Low volatility".to_string());
        }
        if (40.0..=60.0).contains(&s.rsi) {
            confidence += 10.0;
            triggers.push(format!("RSI mid-range {:.1}", s.rsi));
        }
        Some(Candidate {
            scenario_type: ScenarioType::Neutral,
            min: -0.5 * scale,
            max: 0.5 * scale,
            confidence,
            triggers,
        })
    }

    fn momentum_reversal(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        let stretched = s.momentum.abs() > 3.0 || s.rsi < 30.0 || s.rsi > 70.0;
        if !stretched {
            return None;
        }
        let reversal = if s.rsi > 70.0 || (s.rsi >= 30.0 && s.momentum > 3.0) {
            Direction::Down
        } else {
            Direction::Up
        };
        let extremity = ((s.rsi - 50.0).abs() - 20.0).max(0.0) + (s.momentum.abs() - 3.0).max(0.0) * 2.0;
        let (min, max) = side_band(reversal, 0.5 * scale, 2.5 * scale);
        Some(Candidate {
            scenario_type: ScenarioType::MomentumReversal,
            min,
            max,
            confidence: 15.0 + extremity.min(45.0),
            triggers: vec![format!("RSI {:.1}, momentum {:+.1}%", s.rsi, s.momentum)],
        })
    }

    fn breakout_side(s: &ScenarioSignals) -> Direction {
        s.bias_direction().unwrap_or_else(|| Direction::from_score(s.momentum))
    }

    fn volatility_breakout(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        let mut confidence = 10.0;
        let mut triggers = Vec::new();
        match s.volatility_level {
            VolatilityLevel::High => confidence += 12.0,
            VolatilityLevel::Medium => confidence += 5.0,
            VolatilityLevel::Low => {}
        }
        if s.volume_ratio > 1.5 {
            confidence += 8.0;
            triggers.push(format!("Volume {:.1}x average", s.volume_ratio));
        } else if s.volume_ratio > 1.2 {
            confidence += 4.0;
        }
        triggers.push(format!("Daily volatility {:.2}%", s.volatility));
        let (min, max) = side_band(Self::breakout_side(s), 3.0 * scale, 8.0 * scale);
        Some(Candidate {
            scenario_type: ScenarioType::VolatilityBreakout,
            min,
            max,
            confidence,
            triggers,
        })
    }

    fn volatility_expansion(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        let confidence = 8.0
            + match s.volatility_level {
                VolatilityLevel::High => 12.0,
                VolatilityLevel::Medium => 4.0,
                VolatilityLevel::Low => 0.0,
            };
        let (min, max) = side_band(Self::breakout_side(s).opposite(), 3.0 * scale, 8.0 * scale);
        Some(Candidate {
            scenario_type: ScenarioType::VolatilityExpansion,
            min,
            max,
            confidence,
            triggers: vec![format!("Daily volatility {:.2}%", s.volatility)],
        })
    }

    fn accumulation(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        if !(s.volume_ratio > 1.2 && s.rsi < 45.0) {
            return None;
        }
        let confidence = 12.0 + ((s.volume_ratio - 1.2) * 10.0).min(10.0) + ((45.0 - s.rsi) / 2.0).min(10.0);
        Some(Candidate {
            scenario_type: ScenarioType::AccumulationPhase,
            min: 0.0,
            max: 1.5 * scale,
            confidence,
            triggers: vec![format!("Heavy volume {:.1}x with RSI {:.1}", s.volume_ratio, s.rsi)],
        })
    }

    fn distribution(&self, s: &ScenarioSignals, scale: f64) -> Option<Candidate> {
        if !(s.volume_ratio > 1.2 && s.rsi > 55.0) {
            return None;
        }
        let confidence = 12.0 + ((s.volume_ratio - 1.2) * 10.0).min(10.0) + ((s.rsi - 55.0) / 2.0).min(10.0);
        Some(Candidate {
            scenario_type: ScenarioType::DistributionPhase,
            min: -1.5 * scale,
            max: 0.0,
            confidence,
            triggers: vec![format!("Heavy volume {:.1}x with RSI {:.1}", s.volume_ratio, s.rsi)],
        })
    }

    fn model_path(&self, s: &ScenarioSignals) -> Option<Candidate> {
        let bias = s.bias.as_ref()?;
        if bias.confidence < self.config.high_confidence_threshold {
            return None;
        }
        let half = s.volatility.max(MIN_MODEL_BAND_PCT);
        Some(Candidate {
            scenario_type: ScenarioType::AiHighConfidence,
            min: bias.expected_pct_move - half,
            max: bias.expected_pct_move + half,
            confidence: bias.confidence.min(100.0),
            triggers: vec![format!(
                "Model {} at {:.0}% confidence",
                bias.direction.label(),
                bias.confidence
            )],
        })
    }

    fn materialize(&self, c: Candidate, quote: &ScenarioQuote, s: &ScenarioSignals, total: f64) -> Scenario {
        let min = round_to(c.min, 2);
        let max = round_to(c.max, 2);
        let expected = round_to((c.min + c.max) / 2.0, 2);
        let target_price = round_cents(quote.current_price * (1.0 + expected / 100.0));
        let confidence = round_to(c.confidence.clamp(0.0, 100.0), 1);
        Scenario {
            id: None,
            scenario_type: c.scenario_type,
            expected_change_percent: expected,
            min_change_percent: min,
            max_change_percent: max,
            target_price,
            current_price: quote.current_price,
            confidence_level: confidence,
            probability: if total > 0.0 { round_to(c.confidence / total, 4) } else { 0.0 },
            trigger_indicators: json!({
                "rsi": round_to(s.rsi, 1),
                "macd_state": s.macd_state,
                "volatility": round_to(s.volatility, 2),
                "volume_ratio": round_to(s.volume_ratio, 2),
                "momentum": round_to(s.momentum, 2),
                "sentiment": round_to(s.sentiment, 2),
                "triggers": c.triggers,
            }),
            suggested_action: suggested_action(c.scenario_type, target_price),
            is_winner: false,
            actual_close_price: None,
            actual_change_percent: None,
            votes: 0,
        }
    }
}

fn sort_by_confidence(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn suggested_action(scenario_type: ScenarioType, target: f64) -> String {
    match scenario_type {
        ScenarioType::Bullish => format!("Hold longs, trail stops toward ${:.2}", target),
        ScenarioType::Bearish => format!("Tighten stops; pullback toward ${:.2}", target),
        ScenarioType::Neutral => "Range trade or stay flat".to_string(),
        ScenarioType::MomentumReversal => format!("Fade the recent move; watch ${:.2}", target),
        ScenarioType::VolatilityBreakout => format!("Size down; breakout target ${:.2}", target),
        ScenarioType::VolatilityExpansion => "Hedge exposure against a sharp swing".to_string(),
        ScenarioType::AccumulationPhase => "Scale in on weakness".to_string(),
        ScenarioType::DistributionPhase => "Trim into strength".to_string(),
        ScenarioType::AiHighConfidence => format!("Follow model path to ${:.2}", target),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationDecision {
    Generate,
    /// Existing batch is recent enough
    Fresh,
    /// Resolved batches are final
    Frozen,
    /// Next-session scenarios are built only on an explicit request
    RequiresForce,
    MissingPrediction,
}

/// Whether to rebuild the scenarios for a timeframe given what is stored.
pub fn regeneration_decision(
    existing: Option<&ScenarioBatch>,
    timeframe: ScenarioTimeframe,
    force: bool,
    has_prediction: bool,
    now: DateTime<Utc>,
    stale_after_secs: i64,
) -> RegenerationDecision {
    if existing.is_some_and(|b| b.is_frozen()) {
        return RegenerationDecision::Frozen;
    }
    match timeframe {
        ScenarioTimeframe::Today => match existing {
            None => RegenerationDecision::Generate,
            // a closed session's set is held as generated until it resolves
            Some(batch) if is_session_closed(batch.scenario_date, now) => RegenerationDecision::Fresh,
            Some(_) if force => RegenerationDecision::Generate,
            Some(batch) if batch.age_secs(now) > stale_after_secs => RegenerationDecision::Generate,
            Some(_) => RegenerationDecision::Fresh,
        },
        ScenarioTimeframe::Tomorrow => {
            if !force {
                return match existing {
                    Some(_) => RegenerationDecision::Fresh,
                    None => RegenerationDecision::RequiresForce,
                };
            }
            if has_prediction {
                RegenerationDecision::Generate
            } else {
                RegenerationDecision::MissingPrediction
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{instrument, now, quote, snapshot};
    use chrono::Duration;

    fn generator() -> ScenarioGenerator {
        ScenarioGenerator::new(ScenarioConfig::default())
    }

    fn quiet_signals() -> ScenarioSignals {
        ScenarioSignals::from_snapshot(&snapshot(), 0.0, None)
    }

    fn batch(age_secs: i64, resolved: bool) -> ScenarioBatch {
        let mut scenarios = generator().generate(
            &instrument(),
            ScenarioTimeframe::Today,
            &ScenarioQuote::from_quote(&quote(100.0, 100.0, 100.0)),
            &quiet_signals(),
        );
        scenarios[0].is_winner = resolved;
        ScenarioBatch {
            id: Some(1),
            symbol: "TEST".into(),
            timeframe: ScenarioTimeframe::Today,
            scenario_date: now().date_naive(),
            generated_at: now() - Duration::seconds(age_secs),
            resolved_at: None,
            reference_price: Some(100.0),
            scenarios,
        }
    }

    #[test]
    fn test_quiet_session_scenarios() {
        let q = ScenarioQuote::from_quote(&quote(100.0, 100.0, 100.0));
        let scenarios = generator().generate(&instrument(), ScenarioTimeframe::Today, &q, &quiet_signals());

        let types: Vec<ScenarioType> = scenarios.iter().map(|s| s.scenario_type).collect();
        assert_eq!(types, vec![ScenarioType::Neutral, ScenarioType::Bullish, ScenarioType::Bearish]);

        let bullish = &scenarios[1];
        assert_eq!(bullish.min_change_percent, 0.5);
        assert_eq!(bullish.max_change_percent, 3.0);
        assert_eq!(bullish.expected_change_percent, 1.75);
        assert_eq!(bullish.target_price, 101.75);
        assert!(scenarios[2].expected_change_percent < 0.0);

        let total: f64 = scenarios.iter().map(|s| s.probability).sum();
        assert!((total - 1.0).abs() < 1e-3);
        assert!(scenarios.iter().all(|s| !s.is_winner && s.votes == 0));
    }

    #[test]
    fn test_stretched_session_caps_and_ranks() {
        let mut snap = snapshot();
        snap.rsi = 75.0;
        snap.macd_state = MacdState::Bullish;
        snap.volatility = 3.0;
        snap.volatility_level = VolatilityLevel::High;
        snap.volume_ratio = 1.8;
        snap.momentum = 5.0;
        let bias = PredictionBias {
            direction: Direction::Up,
            confidence: 80.0,
            expected_pct_move: 2.5,
        };
        let signals = ScenarioSignals::from_snapshot(&snap, 0.5, Some(bias));
        let q = ScenarioQuote::from_quote(&quote(100.0, 100.0, 100.0));
        let scenarios = generator().generate(&instrument(), ScenarioTimeframe::Today, &q, &signals);

        assert_eq!(scenarios.len(), 6);
        assert_eq!(scenarios[0].scenario_type, ScenarioType::AiHighConfidence);
        assert_eq!(scenarios[0].min_change_percent, -0.5);
        assert_eq!(scenarios[0].max_change_percent, 5.5);
        assert_eq!(scenarios[1].scenario_type, ScenarioType::Bullish);
        // sigma 3.0 doubles the template bands
        assert_eq!(scenarios[1].min_change_percent, 1.0);
        assert_eq!(scenarios[1].max_change_percent, 6.0);

        let types: Vec<ScenarioType> = scenarios.iter().map(|s| s.scenario_type).collect();
        assert!(types.contains(&ScenarioType::Bearish));
        assert!(types.contains(&ScenarioType::VolatilityBreakout));
        assert!(types.contains(&ScenarioType::DistributionPhase));
        assert!(!types.contains(&ScenarioType::VolatilityExpansion));
        assert!(scenarios.windows(2).all(|w| w[0].confidence_level >= w[1].confidence_level));
    }

    #[test]
    fn test_tomorrow_anchor_from_prediction() {
        let mut snap = snapshot();
        snap.volatility = 0.8;
        let q = ScenarioQuote {
            current_price: 105.0,
            open: 105.0,
            high: 107.1,
            low: 102.9,
            previous_close: 105.0,
        };
        let scenarios = generator().generate(
            &instrument(),
            ScenarioTimeframe::Tomorrow,
            &q,
            &ScenarioSignals::from_snapshot(&snap, 0.0, None),
        );
        assert!(scenarios.iter().all(|s| s.current_price == 105.0));
    }

    #[test]
    fn test_regeneration_policy() {
        let t = now();
        let today = ScenarioTimeframe::Today;
        assert_eq!(regeneration_decision(None, today, false, false, t, 30), RegenerationDecision::Generate);
        assert_eq!(
            regeneration_decision(Some(&batch(10, false)), today, false, false, t, 30),
            RegenerationDecision::Fresh
        );
        assert_eq!(
            regeneration_decision(Some(&batch(45, false)), today, false, false, t, 30),
            RegenerationDecision::Generate
        );
        // frozen even when forced
        assert_eq!(
            regeneration_decision(Some(&batch(45, true)), today, true, true, t, 30),
            RegenerationDecision::Frozen
        );
        // no rebuilds once the session has closed, forced or not
        let after_close = t + Duration::hours(6);
        assert_eq!(
            regeneration_decision(Some(&batch(45, false)), today, false, false, after_close, 30),
            RegenerationDecision::Fresh
        );
        assert_eq!(
            regeneration_decision(Some(&batch(45, false)), today, true, false, after_close, 30),
            RegenerationDecision::Fresh
        );

        let tomorrow = ScenarioTimeframe::Tomorrow;
        assert_eq!(
            regeneration_decision(None, tomorrow, false, true, t, 30),
            RegenerationDecision::RequiresForce
        );
        assert_eq!(
            regeneration_decision(None, tomorrow, true, false, t, 30),
            RegenerationDecision::MissingPrediction
        );
        assert_eq!(regeneration_decision(None, tomorrow, true, true, t, 30), RegenerationDecision::Generate);
    }
}
