use async_trait::async_trait;
use chrono::Duration;
use std::time::Duration as StdDuration;

use crate::{AnalysisError, BarInterval, FearGreedReading, NewsItem, PriceBar, Quote};

/// Ordered (oldest first) price history for a symbol
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn get_price_history(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, AnalysisError>;
}

/// Live quote provider
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, AnalysisError>;
}

/// News published within `window` of now
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn get_recent_news(&self, symbol: &str, window: Duration) -> Result<Vec<NewsItem>, AnalysisError>;
}

/// Overnight foreign-market influence, bounded to [-1, 1]
#[async_trait]
pub trait ForeignMarketSource: Send + Sync {
    async fn get_foreign_market_influence(&self) -> Result<f64, AnalysisError>;
}

#[async_trait]
pub trait FearGreedSource: Send + Sync {
    async fn get_fear_greed_index(&self) -> Result<FearGreedReading, AnalysisError>;
}

/// TTL key store backing the regeneration cooldown
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, AnalysisError>;

    async fn put(&self, key: &str, ttl: StdDuration) -> Result<(), AnalysisError>;

    async fn forget(&self, key: &str) -> Result<(), AnalysisError>;

    /// Set `key` only if absent. Returns false when the key already exists.
    async fn try_put(&self, key: &str, ttl: StdDuration) -> Result<bool, AnalysisError>;

    /// Time left before `key` expires, None if absent.
    async fn remaining(&self, key: &str) -> Result<Option<StdDuration>, AnalysisError>;
}
