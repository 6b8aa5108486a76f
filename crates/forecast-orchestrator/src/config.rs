use anyhow::{bail, Context, Result};
use prediction_engine::EngineConfig;
use sentiment_analysis::KeywordTables;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    // Storage
    pub database_url: String,
    pub redis_url: Option<String>,          // shared cooldown when set

    // Cooldown and freshness
    pub cooldown_ttl_secs: u64,             // 30
    pub scenario_stale_secs: i64,           // 30
    pub cache_ttl_secs: u64,                // 300 (influence, fear/greed)

    // Batch recomputation
    pub batch_concurrency: usize,           // 4
    pub batch_stagger_ms: u64,              // 250 per unit
    pub recompute_interval_secs: u64,       // 900

    // Inputs
    pub news_window_hours: i64,             // 24
    pub history_lookback: usize,            // 120 daily bars
    pub foreign_influence: f64,             // static reading until a feed is wired
    pub fear_greed_value: f64,              // 50 = neutral
    pub watchlist: Vec<String>,

    // Tunables
    pub keyword_tables_path: Option<String>,
    pub engine_config_path: Option<String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:forecast.db".to_string(),
            redis_url: None,
            cooldown_ttl_secs: 30,
            scenario_stale_secs: 30,
            cache_ttl_secs: 300,
            batch_concurrency: 4,
            batch_stagger_ms: 250,
            recompute_interval_secs: 900,
            news_window_hours: 24,
            history_lookback: 120,
            foreign_influence: 0.0,
            fear_greed_value: 50.0,
            watchlist: Vec::new(),
            keyword_tables_path: None,
            engine_config_path: None,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value '{}'", name, raw))
}

pub fn parse_watchlist(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

impl ForecastConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:forecast.db".to_string()),
            redis_url: lookup("REDIS_URL").filter(|s| !s.trim().is_empty()),

            cooldown_ttl_secs: parse_or(&lookup, "COOLDOWN_TTL_SECS", "30")?,
            scenario_stale_secs: parse_or(&lookup, "SCENARIO_STALE_SECS", "30")?,
            cache_ttl_secs: parse_or(&lookup, "CACHE_TTL_SECS", "300")?,

            batch_concurrency: parse_or(&lookup, "BATCH_CONCURRENCY", "4")?,
            batch_stagger_ms: parse_or(&lookup, "BATCH_STAGGER_MS", "250")?,
            recompute_interval_secs: parse_or(&lookup, "RECOMPUTE_INTERVAL_SECS", "900")?,

            news_window_hours: parse_or(&lookup, "NEWS_WINDOW_HOURS", "24")?,
            history_lookback: parse_or(&lookup, "HISTORY_LOOKBACK", "120")?,
            foreign_influence: parse_or(&lookup, "FOREIGN_INFLUENCE", "0.0")?,
            fear_greed_value: parse_or(&lookup, "FEAR_GREED_VALUE", "50")?,
            watchlist: parse_watchlist(&lookup("WATCHLIST").unwrap_or_default()),

            keyword_tables_path: lookup("KEYWORD_TABLES_PATH").filter(|s| !s.trim().is_empty()),
            engine_config_path: lookup("ENGINE_CONFIG_PATH").filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cooldown_ttl_secs == 0 {
            bail!("COOLDOWN_TTL_SECS must be positive");
        }
        if self.batch_concurrency == 0 {
            bail!("BATCH_CONCURRENCY must be at least 1");
        }
        if self.news_window_hours <= 0 {
            bail!("NEWS_WINDOW_HOURS must be positive");
        }
        if self.history_lookback < technical_analysis::MIN_BARS {
            bail!(
                "HISTORY_LOOKBACK must be at least {} bars, got {}",
                technical_analysis::MIN_BARS,
                self.history_lookback
            );
        }
        if !(-1.0..=1.0).contains(&self.foreign_influence) {
            bail!("FOREIGN_INFLUENCE must be within [-1, 1]");
        }
        if !(0.0..=100.0).contains(&self.fear_greed_value) {
            bail!("FEAR_GREED_VALUE must be within [0, 100]");
        }
        Ok(())
    }

    pub fn cooldown_ttl(&self) -> Duration {
        Duration::from_secs(self.cooldown_ttl_secs)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        match &self.engine_config_path {
            Some(path) => EngineConfig::from_path(path)
                .with_context(|| format!("loading engine config from {}", path)),
            None => Ok(EngineConfig::default()),
        }
    }

    pub fn keyword_tables(&self) -> Result<KeywordTables> {
        match &self.keyword_tables_path {
            Some(path) => KeywordTables::from_path(path)
                .with_context(|| format!("loading keyword tables from {}", path)),
            None => Ok(KeywordTables::default()),
        }
    }
}
