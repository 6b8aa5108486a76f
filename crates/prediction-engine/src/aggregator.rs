//! Composite prediction: weighted signals, then correction damping, then the
//! priority-keyword override and rebound reclassification on top.

use analysis_core::session::session_date;
use analysis_core::stats::{round_to, sigmoid};
use analysis_core::{
    AnalysisError, Direction, FearGreedReading, Horizon, Instrument, NewsItem, Prediction, PriceBar,
    Quote,
};
use chrono::{DateTime, Utc};
use sentiment_analysis::{KeywordScorer, NewsSentiment};
use serde::{Deserialize, Serialize};
use serde_json::json;
use technical_analysis::{TechnicalAnalysisEngine, TechnicalSnapshot};

use crate::config::EngineConfig;
use crate::correction::{self, CorrectionWarning};
use crate::influence::{bound_influence, fear_greed_contribution};
use crate::overrides::{detect_override, in_session_window, OverrideDecision};
use crate::projection::{expected_move_pct, price_band, project_price};
use crate::rebound::{self, ReboundAnalysis};

/// A daily move beyond this (percent) halves sentiment that argues against it.
const CONTRADICTION_MOVE_PCT: f64 = 2.0;
const MOMENTUM_SCALE_PCT: f64 = 5.0;
const MAX_REASONS: usize = 6;

/// Everything one prediction is computed from.
pub struct PredictionInputs<'a> {
    pub instrument: &'a Instrument,
    pub horizon: Horizon,
    pub bars: &'a [PriceBar],
    pub quote: &'a Quote,
    pub news: &'a [NewsItem],
    pub foreign_influence: f64,
    pub fear_greed: &'a FearGreedReading,
    pub as_of: DateTime<Utc>,
}

/// Each weighted component, all in [-1, 1], and the scores built from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub sentiment: f64,
    pub sentiment_dampened: bool,
    pub technical: f64,
    pub influence: f64,
    pub fear_greed: f64,
    pub momentum: f64,
    pub base_score: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Score,
    Override,
    Rebound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionDecision {
    pub direction: Direction,
    /// Set when an override or rebound dictates the strength
    pub explicit_confidence: Option<f64>,
    pub source: DecisionSource,
}

/// Pick the final direction. An override always wins; a rebound flips to up
/// only when nothing overrides it.
pub fn decide_direction(
    final_score: f64,
    override_decision: Option<&OverrideDecision>,
    rebound: Option<&ReboundAnalysis>,
) -> DirectionDecision {
    match (override_decision, rebound) {
        (Some(o), Some(r)) if o.direction == Direction::Up => DirectionDecision {
            direction: Direction::Up,
            explicit_confidence: Some(o.confidence.max(r.confidence)),
            source: DecisionSource::Override,
        },
        (Some(o), _) => DirectionDecision {
            direction: o.direction,
            explicit_confidence: Some(o.confidence),
            source: DecisionSource::Override,
        },
        (None, Some(r)) => DirectionDecision {
            direction: Direction::Up,
            explicit_confidence: Some(r.confidence),
            source: DecisionSource::Rebound,
        },
        (None, None) => DirectionDecision {
            direction: Direction::from_score(final_score),
            explicit_confidence: None,
            source: DecisionSource::Score,
        },
    }
}

/// A prediction plus the intermediate analysis that produced it.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub prediction: Prediction,
    pub snapshot: TechnicalSnapshot,
    pub news_sentiment: NewsSentiment,
    pub breakdown: ScoreBreakdown,
    pub decision: DirectionDecision,
    pub override_decision: Option<OverrideDecision>,
    pub rebound: Option<ReboundAnalysis>,
    pub correction: Option<CorrectionWarning>,
}

pub struct CompositeAggregator {
    config: EngineConfig,
    technical: TechnicalAnalysisEngine,
}

impl CompositeAggregator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            technical: TechnicalAnalysisEngine::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Weighted, multiplier-scaled composite before correction damping.
    pub fn weigh(
        &self,
        snapshot: &TechnicalSnapshot,
        news_sentiment: &NewsSentiment,
        foreign_influence: f64,
        fear_greed: &FearGreedReading,
        volatility_multiplier: f64,
    ) -> ScoreBreakdown {
        let w = &self.config.weights;

        let mut sentiment = news_sentiment.normalized.clamp(-1.0, 1.0);
        let contradicts = (snapshot.change_1d_pct > CONTRADICTION_MOVE_PCT && sentiment < 0.0)
            || (snapshot.change_1d_pct < -CONTRADICTION_MOVE_PCT && sentiment > 0.0);
        if contradicts {
            sentiment *= 0.5;
        }

        let technical = snapshot.technical_score.clamp(-1.0, 1.0);
        let influence = bound_influence(foreign_influence);
        let fear_greed = fear_greed_contribution(fear_greed);
        let momentum = (snapshot.momentum / MOMENTUM_SCALE_PCT).tanh();

        let weighted = w.sentiment * sentiment
            + w.technical * technical
            + w.influence * influence
            + w.fear_greed * fear_greed
            + w.momentum * momentum;
        let base_score = weighted / w.total() * volatility_multiplier.max(0.0);

        ScoreBreakdown {
            sentiment,
            sentiment_dampened: contradicts,
            technical,
            influence,
            fear_greed,
            momentum,
            base_score,
            final_score: base_score,
        }
    }

    pub fn predict(
        &self,
        scorer: &KeywordScorer,
        inputs: &PredictionInputs<'_>,
    ) -> Result<PredictionOutcome, AnalysisError> {
        let symbol = inputs.instrument.symbol.as_str();
        let quote = inputs.quote;
        if !(quote.current_price > 0.0) || !quote.current_price.is_finite() {
            return Err(AnalysisError::InvalidData(format!(
                "non-positive current price for {}",
                symbol
            )));
        }

        let snapshot = self.technical.snapshot(symbol, inputs.bars)?;
        let multiplier = inputs.instrument.volatility_multiplier;

        let window = self.config.session_window_hours;
        let session_news: Vec<NewsItem> = inputs
            .news
            .iter()
            .filter(|n| in_session_window(n, inputs.as_of, window))
            .cloned()
            .collect();
        let news_sentiment = scorer.aggregate(&session_news);

        let mut breakdown = self.weigh(
            &snapshot,
            &news_sentiment,
            inputs.foreign_influence,
            inputs.fear_greed,
            multiplier,
        );
        let correction = correction::detect(&snapshot);
        if let Some(warning) = &correction {
            breakdown.final_score = warning.adjust(breakdown.base_score);
        }

        let override_decision = detect_override(scorer, &session_news, inputs.as_of, window);
        let rebound = match &override_decision {
            Some(o) if o.suppresses_rebound() => None,
            _ => rebound::evaluate(
                &self.config.rebound,
                news_sentiment.is_rebound,
                &snapshot,
                quote,
                news_sentiment.peak_score,
            ),
        };
        let decision = decide_direction(breakdown.final_score, override_decision.as_ref(), rebound.as_ref());

        let bullish_probability = sigmoid(self.config.probability_steepness * breakdown.final_score);
        let direction_probability = match decision.direction {
            Direction::Up => bullish_probability,
            Direction::Down => 1.0 - bullish_probability,
        };
        let (signal_strength, confidence_score, probability) = match decision.explicit_confidence {
            Some(explicit) => {
                let strength = explicit.clamp(0.0, self.config.rebound.max_confidence);
                let display = strength.min(100.0).round();
                (strength, display as u8, display / 100.0)
            }
            None => {
                let display = (direction_probability * 100.0).round().clamp(0.0, 100.0);
                (direction_probability * 100.0, display as u8, direction_probability)
            }
        };

        // Forced directions size the move from their own conviction.
        let magnitude = match decision.explicit_confidence {
            Some(_) => ((confidence_score as f64 - 50.0) / 50.0).max(0.1),
            None => breakdown.final_score.abs(),
        };
        let move_pct = expected_move_pct(
            &self.config,
            magnitude,
            snapshot.atr_percent,
            multiplier,
            inputs.horizon,
        );
        let expected_pct_move = round_to(move_pct * decision.direction.sign(), 2);

        let previous_close = if quote.previous_close > 0.0 {
            quote.previous_close
        } else {
            snapshot.last_close
        };
        let predicted_price = project_price(previous_close, expected_pct_move);
        let (predicted_low, predicted_high) =
            price_band(predicted_price, snapshot.volatility, multiplier, inputs.horizon);

        let reasoning = build_reasoning(
            &breakdown,
            &snapshot,
            &news_sentiment,
            &decision,
            override_decision.as_ref(),
            rebound.as_ref(),
            correction.as_ref(),
            inputs.fear_greed,
        );

        let indicators = json!({
            "technical": snapshot.metrics(),
            "components": &breakdown,
            "news": {
                "article_count": news_sentiment.article_count,
                "score": round_to(news_sentiment.score, 2),
                "is_rebound": news_sentiment.is_rebound,
                "top_keywords": &news_sentiment.top_keywords,
            },
            "decision_source": decision.source,
            "override": &override_decision,
            "rebound": &rebound,
            "correction": &correction,
            "fear_greed": inputs.fear_greed,
            "foreign_influence": round_to(breakdown.influence, 3),
            "volatility_multiplier": multiplier,
            "keyword_tables_version": scorer.version(),
        });

        let prediction = Prediction {
            id: None,
            symbol: symbol.to_string(),
            horizon: inputs.horizon,
            direction: decision.direction,
            probability: round_to(probability, 4),
            confidence_score,
            signal_strength: round_to(signal_strength, 2),
            current_price: quote.current_price,
            previous_close,
            predicted_price,
            predicted_low,
            predicted_high,
            expected_pct_move,
            reasoning,
            indicators,
            model_version: self.config.model_version.clone(),
            prediction_date: inputs.as_of,
            target_date: inputs.horizon.target_date(session_date(inputs.as_of)),
            is_active: false,
        };

        tracing::debug!(
            symbol,
            horizon = inputs.horizon.as_str(),
            direction = prediction.direction.as_str(),
            score = breakdown.final_score,
            confidence = confidence_score,
            source = ?decision.source,
            "Composite prediction"
        );

        Ok(PredictionOutcome {
            prediction,
            snapshot,
            news_sentiment,
            breakdown,
            decision,
            override_decision,
            rebound,
            correction,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn build_reasoning(
    breakdown: &ScoreBreakdown,
    snapshot: &TechnicalSnapshot,
    news: &NewsSentiment,
    decision: &DirectionDecision,
    override_decision: Option<&OverrideDecision>,
    rebound: Option<&ReboundAnalysis>,
    correction: Option<&CorrectionWarning>,
    fear_greed: &FearGreedReading,
) -> String {
    let mut reasons: Vec<String> = Vec::new();

    if let Some(o) = override_decision {
        reasons.push(format!(
            "Priority news ({}: {}) forces {}",
            o.class.as_str(),
            o.triggers.join(", "),
            o.direction.label()
        ));
    }
    if let Some(r) = rebound {
        reasons.push(format!(
            "Rebound setup: ${:.2} drop over {}d with {:+.1}% intraday recovery",
            r.drop_amount, r.drop_window_days, r.recovery_pct
        ));
    }
    if let Some(c) = correction {
        reasons.push(format!(
            "Correction risk {} ({:?}): {}",
            c.direction.as_str(),
            c.severity,
            c.patterns.join("; ")
        ));
    }
    if news.article_count > 0 && breakdown.sentiment.abs() >= 0.2 {
        let tone = if breakdown.sentiment > 0.0 { "positive" } else { "negative" };
        let mut line = format!(
            "News sentiment {} ({:+.2}) across {} articles",
            tone, breakdown.sentiment, news.article_count
        );
        if breakdown.sentiment_dampened {
            line.push_str(", dampened by the daily move");
        }
        reasons.push(line);
    }
    if snapshot.is_overbought() || snapshot.is_oversold() {
        reasons.push(format!("RSI at {:.1}", snapshot.rsi));
    }
    if snapshot.change_1d_pct.abs() > 1.0 {
        reasons.push(format!("Moved {:+.1}% over the last session", snapshot.change_1d_pct));
    }
    if breakdown.influence.abs() >= 0.1 {
        let lean = if breakdown.influence > 0.0 { "bullish" } else { "bearish" };
        reasons.push(format!("Foreign markets lean {} ({:+.2})", lean, breakdown.influence));
    }
    if fear_greed.value < 25.0 || fear_greed.value > 75.0 {
        reasons.push(format!("{} ({:.0})", fear_greed.classification, fear_greed.value));
    }

    reasons.truncate(MAX_REASONS - 1);
    let summary = match decision.source {
        DecisionSource::Score => format!("Composite signal {:+.2}", breakdown.final_score),
        _ => format!(
            "Composite signal {:+.2}, direction set by {:?}",
            breakdown.final_score, decision.source
        )
        .to_lowercase(),
    };
    reasons.push(summary);
    reasons.join("; ")
}
