//! Row types as stored. Dates are ISO strings, JSON columns are text.

use analysis_core::{
    Instrument, NewsItem, Prediction, PriceBar, Scenario, ScenarioBatch,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).with_context(|| format!("bad date '{}'", raw))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstrumentRow {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub volatility_multiplier: f64,
}

impl From<InstrumentRow> for Instrument {
    fn from(row: InstrumentRow) -> Self {
        Instrument {
            name: row.name.unwrap_or_else(|| row.symbol.clone()),
            symbol: row.symbol,
            sector: row.sector,
            volatility_multiplier: row.volatility_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceBarRow {
    pub symbol: String,
    pub price_date: String,
    pub bar_interval: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub previous_close: Option<f64>,
    pub volume: f64,
    pub source: String,
}

impl TryFrom<PriceBarRow> for PriceBar {
    type Error = anyhow::Error;

    fn try_from(row: PriceBarRow) -> Result<Self> {
        Ok(PriceBar {
            symbol: row.symbol,
            price_date: parse_date(&row.price_date)?,
            interval: row.bar_interval.parse()?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            previous_close: row.previous_close,
            volume: row.volume,
            source: row.source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NewsRow {
    pub id: i64,
    pub symbol: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: String,
    pub sentiment_score: Option<f64>,
    pub is_important: bool,
    pub importance_date: Option<String>,
    pub expected_surge_percent: Option<f64>,
    pub surge_keywords: String,
}

impl TryFrom<NewsRow> for NewsItem {
    type Error = anyhow::Error;

    fn try_from(row: NewsRow) -> Result<Self> {
        Ok(NewsItem {
            id: Some(row.id),
            symbol: row.symbol,
            title: row.title,
            description: row.description,
            published_at: parse_timestamp(&row.published_at)?,
            sentiment_score: row.sentiment_score,
            is_important: row.is_important,
            importance_date: row.importance_date.as_deref().map(parse_date).transpose()?,
            expected_surge_percent: row.expected_surge_percent,
            surge_keywords: serde_json::from_str(&row.surge_keywords).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PredictionRow {
    pub id: i64,
    pub symbol: String,
    pub horizon: String,
    pub direction: String,
    pub probability: f64,
    pub confidence_score: i64,
    pub signal_strength: f64,
    pub current_price: f64,
    pub previous_close: f64,
    pub predicted_price: f64,
    pub predicted_low: f64,
    pub predicted_high: f64,
    pub expected_pct_move: f64,
    pub reasoning: String,
    pub indicators: String,
    pub model_version: String,
    pub prediction_date: String,
    pub target_date: String,
    pub is_active: bool,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = anyhow::Error;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(Prediction {
            id: Some(row.id),
            symbol: row.symbol,
            horizon: row.horizon.parse()?,
            direction: row.direction.parse()?,
            probability: row.probability,
            confidence_score: row.confidence_score.clamp(0, 100) as u8,
            signal_strength: row.signal_strength,
            current_price: row.current_price,
            previous_close: row.previous_close,
            predicted_price: row.predicted_price,
            predicted_low: row.predicted_low,
            predicted_high: row.predicted_high,
            expected_pct_move: row.expected_pct_move,
            reasoning: row.reasoning,
            indicators: serde_json::from_str(&row.indicators).unwrap_or(serde_json::Value::Null),
            model_version: row.model_version,
            prediction_date: parse_timestamp(&row.prediction_date)?,
            target_date: parse_date(&row.target_date)?,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScenarioBatchRow {
    pub id: i64,
    pub symbol: String,
    pub timeframe: String,
    pub scenario_date: String,
    pub generated_at: String,
    pub resolved_at: Option<String>,
    pub reference_price: Option<f64>,
}

impl ScenarioBatchRow {
    pub fn into_batch(self, scenarios: Vec<Scenario>) -> Result<ScenarioBatch> {
        Ok(ScenarioBatch {
            id: Some(self.id),
            symbol: self.symbol,
            timeframe: self.timeframe.parse()?,
            scenario_date: parse_date(&self.scenario_date)?,
            generated_at: parse_timestamp(&self.generated_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_timestamp).transpose()?,
            reference_price: self.reference_price,
            scenarios,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScenarioRow {
    pub id: i64,
    pub batch_id: i64,
    pub position: i64,
    pub scenario_type: String,
    pub expected_change_percent: f64,
    pub min_change_percent: f64,
    pub max_change_percent: f64,
    pub target_price: f64,
    pub current_price: f64,
    pub confidence_level: f64,
    pub probability: f64,
    pub trigger_indicators: String,
    pub suggested_action: String,
    pub is_winner: bool,
    pub actual_close_price: Option<f64>,
    pub actual_change_percent: Option<f64>,
    pub votes: i64,
}

impl TryFrom<ScenarioRow> for Scenario {
    type Error = anyhow::Error;

    fn try_from(row: ScenarioRow) -> Result<Self> {
        Ok(Scenario {
            id: Some(row.id),
            scenario_type: row.scenario_type.parse()?,
            expected_change_percent: row.expected_change_percent,
            min_change_percent: row.min_change_percent,
            max_change_percent: row.max_change_percent,
            target_price: row.target_price,
            current_price: row.current_price,
            confidence_level: row.confidence_level,
            probability: row.probability,
            trigger_indicators: serde_json::from_str(&row.trigger_indicators)
                .unwrap_or(serde_json::Value::Null),
            suggested_action: row.suggested_action,
            is_winner: row.is_winner,
            actual_close_price: row.actual_close_price,
            actual_change_percent: row.actual_change_percent,
            votes: row.votes,
        })
    }
}
