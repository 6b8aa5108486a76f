//! Collaborators backed by the local store and by static readings.

use analysis_core::session::is_session_closed;
use analysis_core::{
    AnalysisError, BarInterval, FearGreedReading, FearGreedSource, ForeignMarketSource, MarketStatus,
    NewsItem, NewsSource, PriceBar, PriceHistorySource, Quote, QuoteSource,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use prediction_engine::influence::bound_influence;
use prediction_engine::ForeignMarketSnapshot;
use prediction_store::PredictionDb;

pub(crate) fn db_err(e: anyhow::Error) -> AnalysisError {
    match e.downcast::<AnalysisError>() {
        Ok(inner) => inner,
        Err(e) => AnalysisError::DatabaseError(e.to_string()),
    }
}

/// Prices, news and last-bar quotes from whatever ingestion wrote to the store.
#[derive(Clone)]
pub struct StoreMarketData {
    db: PredictionDb,
}

impl StoreMarketData {
    pub fn new(db: PredictionDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PriceHistorySource for StoreMarketData {
    async fn get_price_history(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, AnalysisError> {
        self.db
            .price_history(symbol, interval, lookback)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl QuoteSource for StoreMarketData {
    /// The latest daily bar stands in for a live quote.
    async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError> {
        let bars = self
            .db
            .price_history(symbol, BarInterval::Day1, 1)
            .await
            .map_err(db_err)?;
        let bar = bars
            .last()
            .ok_or_else(|| AnalysisError::InsufficientData(format!("no bars stored for {}", symbol)))?;

        let now = Utc::now();
        let market_status = if is_session_closed(bar.price_date, now) {
            MarketStatus::Closed
        } else {
            MarketStatus::Open
        };

        Ok(Quote {
            symbol: bar.symbol.clone(),
            timestamp: now,
            current_price: bar.close,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            previous_close: bar.previous_close.unwrap_or(bar.open),
            volume: bar.volume,
            market_status,
        })
    }
}

#[async_trait]
impl NewsSource for StoreMarketData {
    async fn get_recent_news(&self, symbol: &str, window: Duration) -> Result<Vec<NewsItem>, AnalysisError> {
        self.db
            .recent_news(symbol, Utc::now() - window)
            .await
            .map_err(db_err)
    }
}

/// Fixed market-wide readings, e.g. from configuration.
#[derive(Debug, Clone)]
pub struct StaticMarketContext {
    influence: f64,
    fear_greed: f64,
}

impl StaticMarketContext {
    pub fn new(influence: f64, fear_greed: f64) -> Self {
        Self {
            influence: bound_influence(influence),
            fear_greed,
        }
    }

    pub fn from_foreign_snapshot(snapshot: &ForeignMarketSnapshot, fear_greed: f64) -> Self {
        Self::new(snapshot.influence_score(), fear_greed)
    }
}

#[async_trait]
impl ForeignMarketSource for StaticMarketContext {
    async fn get_foreign_market_influence(&self) -> Result<f64, AnalysisError> {
        Ok(self.influence)
    }
}

#[async_trait]
impl FearGreedSource for StaticMarketContext {
    async fn get_fear_greed_index(&self) -> Result<FearGreedReading, AnalysisError> {
        Ok(FearGreedReading::new(self.fear_greed))
    }
}
