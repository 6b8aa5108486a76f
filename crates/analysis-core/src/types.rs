use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::session;
use crate::AnalysisError;

/// Tradable instrument with its per-symbol volatility scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    /// Scales the magnitude of predicted moves. 1.0 = neutral.
    #[serde(default = "default_volatility_multiplier")]
    pub volatility_multiplier: f64,
}

fn default_volatility_multiplier() -> f64 {
    1.0
}

impl Instrument {
    pub fn new(symbol: &str) -> Self {
        let symbol = symbol.trim().to_uppercase();
        Self {
            name: symbol.clone(),
            symbol,
            sector: None,
            volatility_multiplier: 1.0,
        }
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarInterval {
    Minute5,
    Minute15,
    Hour1,
    Day1,
    Week1,
}

impl BarInterval {
    pub fn to_minutes(&self) -> i64 {
        match self {
            BarInterval::Minute5 => 5,
            BarInterval::Minute15 => 15,
            BarInterval::Hour1 => 60,
            BarInterval::Day1 => 1440,
            BarInterval::Week1 => 10080,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::Minute5 => "5m",
            BarInterval::Minute15 => "15m",
            BarInterval::Hour1 => "1h",
            BarInterval::Day1 => "1d",
            BarInterval::Week1 => "1w",
        }
    }
}

impl FromStr for BarInterval {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(BarInterval::Minute5),
            "15m" => Ok(BarInterval::Minute15),
            "1h" => Ok(BarInterval::Hour1),
            "1d" => Ok(BarInterval::Day1),
            "1w" => Ok(BarInterval::Week1),
            other => Err(AnalysisError::InvalidData(format!("unknown interval '{}'", other))),
        }
    }
}

/// One OHLCV row per (symbol, price_date, interval).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub price_date: NaiveDate,
    pub interval: BarInterval,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Close of the last prior trading day.
    #[serde(default)]
    pub previous_close: Option<f64>,
    pub volume: f64,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    PreMarket,
    Open,
    AfterHours,
    Closed,
}

/// Live (or last known) quote for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub volume: f64,
    pub market_status: MarketStatus,
}

impl Quote {
    /// Percent move since the session open.
    pub fn intraday_change_percent(&self) -> f64 {
        if self.open <= 0.0 {
            return 0.0;
        }
        (self.current_price - self.open) / self.open * 100.0
    }
}

/// News item with its keyword-derived scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub id: Option<i64>,
    pub symbol: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Normalized to [-1, 1] once scored.
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub is_important: bool,
    #[serde(default)]
    pub importance_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_surge_percent: Option<f64>,
    #[serde(default)]
    pub surge_keywords: Vec<String>,
}

impl NewsItem {
    /// Title and description as one lower-cased string.
    pub fn text(&self) -> String {
        match &self.description {
            Some(desc) if !desc.is_empty() => format!("{} {}", self.title, desc).to_lowercase(),
            _ => self.title.to_lowercase(),
        }
    }
}

/// Prediction horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Today,
    Tomorrow,
    Week,
    Month,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [Horizon::Today, Horizon::Tomorrow, Horizon::Week, Horizon::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Today => "today",
            Horizon::Tomorrow => "tomorrow",
            Horizon::Week => "week",
            Horizon::Month => "month",
        }
    }

    /// Trading days between the prediction date and its target.
    pub fn trading_days(&self) -> u32 {
        match self {
            Horizon::Today => 0,
            Horizon::Tomorrow => 1,
            Horizon::Week => 5,
            Horizon::Month => 21,
        }
    }

    pub fn target_date(&self, from: NaiveDate) -> NaiveDate {
        let start = if session::is_trading_day(from) {
            from
        } else {
            session::next_trading_day(from)
        };
        session::add_trading_days(start, self.trading_days())
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Horizon {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(Horizon::Today),
            "tomorrow" => Ok(Horizon::Tomorrow),
            "week" => Ok(Horizon::Week),
            "month" => Ok(Horizon::Month),
            other => Err(AnalysisError::InvalidData(format!("unknown horizon '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Human-readable label for the direction
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "BULLISH",
            Direction::Down => "BEARISH",
        }
    }
}

impl FromStr for Direction {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "bullish" => Ok(Direction::Up),
            "down" | "bearish" => Ok(Direction::Down),
            other => Err(AnalysisError::InvalidData(format!("unknown direction '{}'", other))),
        }
    }
}

/// Market-wide fear/greed reading (0 = extreme fear, 100 = extreme greed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreedReading {
    pub value: f64,
    pub classification: String,
}

impl FearGreedReading {
    pub fn new(value: f64) -> Self {
        let value = value.clamp(0.0, 100.0);
        Self {
            value,
            classification: Self::classify(value).to_string(),
        }
    }

    pub fn neutral() -> Self {
        Self::new(50.0)
    }

    pub fn classify(value: f64) -> &'static str {
        match value {
            v if v < 25.0 => "Extreme Fear",
            v if v < 45.0 => "Fear",
            v if v <= 55.0 => "Neutral",
            v if v <= 75.0 => "Greed",
            _ => "Extreme Greed",
        }
    }
}

/// A persisted directional forecast for one (symbol, horizon).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: Option<i64>,
    pub symbol: String,
    pub horizon: Horizon,
    pub direction: Direction,
    /// Probability of `direction`, 0.0 to 1.0
    pub probability: f64,
    /// Display confidence, 0 to 100
    pub confidence_score: u8,
    /// Internal signal strength, may exceed 100 (capped at 150)
    pub signal_strength: f64,
    pub current_price: f64,
    pub previous_close: f64,
    pub predicted_price: f64,
    pub predicted_low: f64,
    pub predicted_high: f64,
    pub expected_pct_move: f64,
    pub reasoning: String,
    pub indicators: serde_json::Value,
    pub model_version: String,
    pub prediction_date: DateTime<Utc>,
    pub target_date: NaiveDate,
    #[serde(default)]
    pub is_active: bool,
}

impl Prediction {
    pub fn label(&self) -> &'static str {
        self.direction.label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioTimeframe {
    Today,
    Tomorrow,
}

impl ScenarioTimeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioTimeframe::Today => "today",
            ScenarioTimeframe::Tomorrow => "tomorrow",
        }
    }

    /// The session a scenario batch is about.
    pub fn scenario_date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            ScenarioTimeframe::Today => today,
            ScenarioTimeframe::Tomorrow => session::next_trading_day(today),
        }
    }

    pub fn horizon(&self) -> Horizon {
        match self {
            ScenarioTimeframe::Today => Horizon::Today,
            ScenarioTimeframe::Tomorrow => Horizon::Tomorrow,
        }
    }
}

impl fmt::Display for ScenarioTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioTimeframe {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(ScenarioTimeframe::Today),
            "tomorrow" => Ok(ScenarioTimeframe::Tomorrow),
            other => Err(AnalysisError::InvalidData(format!("unknown timeframe '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    Bullish,
    Bearish,
    Neutral,
    MomentumReversal,
    VolatilityBreakout,
    AccumulationPhase,
    DistributionPhase,
    VolatilityExpansion,
    AiHighConfidence,
}

impl ScenarioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::Bullish => "bullish",
            ScenarioType::Bearish => "bearish",
            ScenarioType::Neutral => "neutral",
            ScenarioType::MomentumReversal => "momentum_reversal",
            ScenarioType::VolatilityBreakout => "volatility_breakout",
            ScenarioType::AccumulationPhase => "accumulation_phase",
            ScenarioType::DistributionPhase => "distribution_phase",
            ScenarioType::VolatilityExpansion => "volatility_expansion",
            ScenarioType::AiHighConfidence => "ai_high_confidence",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ScenarioType::Bullish => "Bullish Continuation",
            ScenarioType::Bearish => "Bearish Pullback",
            ScenarioType::Neutral => "Range-Bound Session",
            ScenarioType::MomentumReversal => "Momentum Reversal",
            ScenarioType::VolatilityBreakout => "Volatility Breakout",
            ScenarioType::AccumulationPhase => "Accumulation Phase",
            ScenarioType::DistributionPhase => "Distribution Phase",
            ScenarioType::VolatilityExpansion => "Volatility Expansion",
            ScenarioType::AiHighConfidence => "Model High-Confidence Path",
        }
    }
}

impl FromStr for ScenarioType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bullish" => Ok(ScenarioType::Bullish),
            "bearish" => Ok(ScenarioType::Bearish),
            "neutral" => Ok(ScenarioType::Neutral),
            "momentum_reversal" => Ok(ScenarioType::MomentumReversal),
            "volatility_breakout" => Ok(ScenarioType::VolatilityBreakout),
            "accumulation_phase" => Ok(ScenarioType::AccumulationPhase),
            "distribution_phase" => Ok(ScenarioType::DistributionPhase),
            "volatility_expansion" => Ok(ScenarioType::VolatilityExpansion),
            "ai_high_confidence" => Ok(ScenarioType::AiHighConfidence),
            other => Err(AnalysisError::InvalidData(format!("unknown scenario type '{}'", other))),
        }
    }
}

/// One hypothetical price outcome with its percent band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub id: Option<i64>,
    pub scenario_type: ScenarioType,
    pub expected_change_percent: f64,
    pub min_change_percent: f64,
    pub max_change_percent: f64,
    pub target_price: f64,
    pub current_price: f64,
    /// 0 to 100
    pub confidence_level: f64,
    /// Share of the batch's total confidence, 0.0 to 1.0
    pub probability: f64,
    pub trigger_indicators: serde_json::Value,
    pub suggested_action: String,
    #[serde(default)]
    pub is_winner: bool,
    #[serde(default)]
    pub actual_close_price: Option<f64>,
    #[serde(default)]
    pub actual_change_percent: Option<f64>,
    #[serde(default)]
    pub votes: i64,
}

impl Scenario {
    pub fn contains(&self, change_percent: f64) -> bool {
        change_percent >= self.min_change_percent && change_percent <= self.max_change_percent
    }

    pub fn band_width(&self) -> f64 {
        self.max_change_percent - self.min_change_percent
    }
}

/// Scenarios generated together for one (symbol, timeframe, session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioBatch {
    #[serde(default)]
    pub id: Option<i64>,
    pub symbol: String,
    pub timeframe: ScenarioTimeframe,
    pub scenario_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Price realized changes are measured from when the session open is unknown
    #[serde(default)]
    pub reference_price: Option<f64>,
    pub scenarios: Vec<Scenario>,
}

impl ScenarioBatch {
    pub fn winner(&self) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.is_winner)
    }

    /// Resolved batches (normally holding a winner) are never regenerated.
    pub fn is_frozen(&self) -> bool {
        self.winner().is_some() || self.resolved_at.is_some()
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.generated_at).num_seconds()
    }
}

/// Realized prices used to resolve a scenario batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RealizedOutcome {
    pub close: f64,
    #[serde(default)]
    pub open: Option<f64>,
}
