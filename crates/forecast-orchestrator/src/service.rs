use analysis_core::session::{is_session_closed, session_date};
use analysis_core::{
    AnalysisError, BarInterval, FearGreedReading, FearGreedSource, ForeignMarketSource, Horizon,
    NewsItem, NewsSource, Prediction, PriceHistorySource, QuoteSource, RealizedOutcome, ScenarioBatch,
    ScenarioTimeframe,
};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use prediction_engine::influence::bound_influence;
use prediction_engine::{
    regeneration_decision, resolve_batch, CompositeAggregator, EngineConfig, PredictionBias,
    PredictionInputs, RegenerationDecision, Resolution, ScenarioGenerator, ScenarioQuote,
    ScenarioSignals,
};
use prediction_store::PredictionDb;
use sentiment_analysis::{KeywordScorer, KeywordTables};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use technical_analysis::TechnicalAnalysisEngine;

use crate::config::ForecastConfig;
use crate::cooldown::{CooldownController, CooldownPermit};
use crate::sources::{db_err, StaticMarketContext, StoreMarketData};

const MARKET_WIDE_KEY: &str = "market";
/// Enough daily bars to find the close of any recent unresolved session
const RESOLUTION_LOOKBACK: usize = 10;

struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// External inputs, one trait object per concern.
#[derive(Clone)]
pub struct MarketSources {
    pub prices: Arc<dyn PriceHistorySource>,
    pub quotes: Arc<dyn QuoteSource>,
    pub news: Arc<dyn NewsSource>,
    pub foreign: Arc<dyn ForeignMarketSource>,
    pub fear_greed: Arc<dyn FearGreedSource>,
}

impl MarketSources {
    pub fn from_store(data: StoreMarketData, context: StaticMarketContext) -> Self {
        let data = Arc::new(data);
        let context = Arc::new(context);
        Self {
            prices: data.clone(),
            quotes: data.clone(),
            news: data,
            foreign: context.clone(),
            fear_greed: context,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub news_window_hours: i64,
    pub history_lookback: usize,
    pub scenario_stale_secs: i64,
    pub batch_concurrency: usize,
    /// Delay before unit `i` of a batch starts is `i * batch_stagger`
    pub batch_stagger: Duration,
    pub cache_ttl_secs: i64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            news_window_hours: 24,
            history_lookback: 120,
            scenario_stale_secs: 30,
            batch_concurrency: 4,
            batch_stagger: Duration::from_millis(250),
            cache_ttl_secs: 300,
        }
    }
}

impl From<&ForecastConfig> for OrchestratorSettings {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            news_window_hours: config.news_window_hours,
            history_lookback: config.history_lookback,
            scenario_stale_secs: config.scenario_stale_secs,
            batch_concurrency: config.batch_concurrency,
            batch_stagger: Duration::from_millis(config.batch_stagger_ms),
            cache_ttl_secs: config.cache_ttl_secs as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateMode {
    /// Compute before returning
    Wait,
    /// Claim the cooldown, compute on a spawned task
    Background,
}

#[derive(Debug, Clone)]
pub enum RegenerateOutcome {
    Generated(Prediction),
    Queued,
    Rejected { retry_after_secs: u64 },
    Unavailable {
        reason: String,
        last_known: Option<Prediction>,
    },
}

#[derive(Debug, Clone)]
pub enum ScenarioOutcome {
    Fresh(ScenarioBatch),
    Regenerated(ScenarioBatch),
    Frozen(ScenarioBatch),
    Rejected {
        retry_after_secs: u64,
        existing: Option<ScenarioBatch>,
    },
    Unavailable {
        reason: String,
        existing: Option<ScenarioBatch>,
    },
}

impl ScenarioOutcome {
    /// The scenarios to show, if any exist.
    pub fn batch(&self) -> Option<&ScenarioBatch> {
        match self {
            ScenarioOutcome::Fresh(b) | ScenarioOutcome::Regenerated(b) | ScenarioOutcome::Frozen(b) => Some(b),
            ScenarioOutcome::Rejected { existing, .. } | ScenarioOutcome::Unavailable { existing, .. } => {
                existing.as_ref()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Resolved {
        batch: ScenarioBatch,
        resolution: Resolution,
    },
    AlreadyResolved(ScenarioBatch),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub horizon: Horizon,
    pub generated: Vec<String>,
    pub rejected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Runs predictions and scenario sets for instruments against the store,
/// guarded by the regeneration cooldown.
pub struct ForecastOrchestrator {
    db: PredictionDb,
    sources: MarketSources,
    technical: TechnicalAnalysisEngine,
    aggregator: CompositeAggregator,
    generator: ScenarioGenerator,
    /// Swapped whole on reload; readers keep the scorer they started with
    scorer: RwLock<Arc<KeywordScorer>>,
    cooldown: CooldownController,
    settings: OrchestratorSettings,
    /// Market-wide readings (5-min TTL)
    influence_cache: DashMap<String, CacheEntry<f64>>,
    fear_greed_cache: DashMap<String, CacheEntry<FearGreedReading>>,
}

impl ForecastOrchestrator {
    pub fn new(
        db: PredictionDb,
        sources: MarketSources,
        cooldown: CooldownController,
        engine: EngineConfig,
        tables: KeywordTables,
        settings: OrchestratorSettings,
    ) -> Result<Self, AnalysisError> {
        engine.validate()?;
        tables.validate()?;

        tracing::info!(
            model_version = %engine.model_version,
            keyword_version = %tables.version,
            cooldown_secs = cooldown.ttl().as_secs(),
            concurrency = settings.batch_concurrency,
            "Forecast orchestrator ready"
        );

        Ok(Self {
            db,
            sources,
            technical: TechnicalAnalysisEngine::new(),
            generator: ScenarioGenerator::new(engine.scenarios.clone()),
            aggregator: CompositeAggregator::new(engine),
            scorer: RwLock::new(Arc::new(KeywordScorer::new(Arc::new(tables)))),
            cooldown,
            settings,
            influence_cache: DashMap::new(),
            fear_greed_cache: DashMap::new(),
        })
    }

    pub fn db(&self) -> &PredictionDb {
        &self.db
    }

    fn scorer(&self) -> Arc<KeywordScorer> {
        match self.scorer.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn keyword_version(&self) -> String {
        self.scorer().version().to_string()
    }

    /// Swap in new keyword tables. In-flight computations finish on the old ones.
    pub fn reload_keywords(&self, tables: KeywordTables) -> Result<(), AnalysisError> {
        tables.validate()?;
        let scorer = Arc::new(KeywordScorer::new(Arc::new(tables)));
        let version = scorer.version().to_string();
        match self.scorer.write() {
            Ok(mut guard) => *guard = scorer,
            Err(poisoned) => *poisoned.into_inner() = scorer,
        }
        tracing::info!(version = %version, "Keyword tables reloaded");
        Ok(())
    }

    /// Recompute stored sentiment and importance for every news item of `symbol`.
    pub async fn rescore_news(&self, symbol: &str) -> Result<usize, AnalysisError> {
        let scorer = self.scorer();
        let items = self.db.all_news(symbol).await.map_err(db_err)?;
        for item in &items {
            let rescored = scorer.rescore(item);
            self.db.update_news_scores(&rescored).await.map_err(db_err)?;
        }
        tracing::info!(
            symbol,
            updated = items.len(),
            version = scorer.version(),
            "Rescored news"
        );
        Ok(items.len())
    }

    // ---- Market-wide inputs ----

    async fn foreign_influence(&self) -> f64 {
        if let Some(entry) = self.influence_cache.get(MARKET_WIDE_KEY) {
            if (Utc::now() - entry.cached_at).num_seconds() < self.settings.cache_ttl_secs {
                return entry.data;
            }
        }

        match self.sources.foreign.get_foreign_market_influence().await {
            Ok(value) => {
                let value = bound_influence(value);
                self.influence_cache.insert(
                    MARKET_WIDE_KEY.to_string(),
                    CacheEntry {
                        data: value,
                        cached_at: Utc::now(),
                    },
                );
                value
            }
            Err(e) => {
                tracing::warn!(stage = "foreign_influence", error = %e, "Using neutral foreign influence");
                0.0
            }
        }
    }

    async fn fear_greed(&self) -> FearGreedReading {
        if let Some(entry) = self.fear_greed_cache.get(MARKET_WIDE_KEY) {
            if (Utc::now() - entry.cached_at).num_seconds() < self.settings.cache_ttl_secs {
                return entry.data.clone();
            }
        }

        match self.sources.fear_greed.get_fear_greed_index().await {
            Ok(reading) if reading.value.is_finite() => {
                self.fear_greed_cache.insert(
                    MARKET_WIDE_KEY.to_string(),
                    CacheEntry {
                        data: reading.clone(),
                        cached_at: Utc::now(),
                    },
                );
                reading
            }
            Ok(_) => {
                tracing::warn!(stage = "fear_greed", "Non-finite fear/greed reading, using neutral");
                FearGreedReading::neutral()
            }
            Err(e) => {
                tracing::warn!(stage = "fear_greed", error = %e, "Using neutral fear/greed");
                FearGreedReading::neutral()
            }
        }
    }

    async fn recent_news(&self, symbol: &str) -> Vec<NewsItem> {
        let window = chrono::Duration::hours(self.settings.news_window_hours);
        match self.sources.news.get_recent_news(symbol, window).await {
            Ok(news) => news,
            Err(e) => {
                tracing::warn!(symbol, stage = "news", error = %e, "News unavailable, scoring without it");
                Vec::new()
            }
        }
    }

    // ---- Predictions ----

    fn prediction_purpose(horizon: Horizon) -> String {
        format!("prediction:{}", horizon)
    }

    /// Fetch, score and activate one prediction. No cooldown handling.
    pub async fn compute_prediction(
        &self,
        symbol: &str,
        horizon: Horizon,
        now: DateTime<Utc>,
    ) -> Result<Prediction, AnalysisError> {
        let instrument = self.db.get_or_create_instrument(symbol).await.map_err(db_err)?;
        let symbol = instrument.symbol.as_str();

        let bars = self
            .sources
            .prices
            .get_price_history(symbol, BarInterval::Day1, self.settings.history_lookback)
            .await?;
        let quote = self.sources.quotes.get_quote(symbol).await?;
        let news = self.recent_news(symbol).await;
        let foreign_influence = self.foreign_influence().await;
        let fear_greed = self.fear_greed().await;
        let scorer = self.scorer();

        let outcome = self.aggregator.predict(
            &scorer,
            &PredictionInputs {
                instrument: &instrument,
                horizon,
                bars: &bars,
                quote: &quote,
                news: &news,
                foreign_influence,
                fear_greed: &fear_greed,
                as_of: now,
            },
        )?;

        let stored = self
            .db
            .activate_prediction(&outcome.prediction)
            .await
            .map_err(db_err)?;

        tracing::info!(
            symbol,
            horizon = %horizon,
            direction = stored.direction.as_str(),
            confidence = stored.confidence_score,
            predicted_price = stored.predicted_price,
            source = ?outcome.decision.source,
            "Prediction generated"
        );
        Ok(stored)
    }

    async fn claim(&self, purpose: &str, symbol: &str) -> Result<CooldownPermit, RegenerateOutcome> {
        match self.cooldown.try_begin(purpose, symbol).await {
            Ok(permit) => Ok(permit),
            Err(AnalysisError::CooldownActive { retry_after_secs, .. }) => {
                Err(RegenerateOutcome::Rejected { retry_after_secs })
            }
            Err(e) => {
                tracing::warn!(symbol, stage = "cooldown", error = %e, "Cooldown store unavailable");
                Err(RegenerateOutcome::Unavailable {
                    reason: e.to_string(),
                    last_known: None,
                })
            }
        }
    }

    async fn run_claimed(&self, symbol: &str, horizon: Horizon, permit: CooldownPermit) -> RegenerateOutcome {
        match self.compute_prediction(symbol, horizon, Utc::now()).await {
            Ok(prediction) => {
                self.cooldown.complete(permit);
                RegenerateOutcome::Generated(prediction)
            }
            Err(e) => {
                self.cooldown.abort(permit).await;
                tracing::warn!(symbol, horizon = %horizon, stage = "prediction", error = %e, "Prediction unavailable");
                let last_known = match self.db.active_prediction(symbol, horizon).await {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!(symbol, error = %err, "Could not load last known prediction");
                        None
                    }
                };
                RegenerateOutcome::Unavailable {
                    reason: e.to_string(),
                    last_known,
                }
            }
        }
    }

    /// Regenerate now, rejecting if the (symbol, horizon) is cooling down.
    pub async fn regenerate_now(&self, symbol: &str, horizon: Horizon) -> RegenerateOutcome {
        match self.claim(&Self::prediction_purpose(horizon), symbol).await {
            Ok(permit) => self.run_claimed(symbol, horizon, permit).await,
            Err(outcome) => outcome,
        }
    }

    pub async fn regenerate_prediction(
        self: &Arc<Self>,
        symbol: &str,
        horizon: Horizon,
        mode: RegenerateMode,
    ) -> RegenerateOutcome {
        match mode {
            RegenerateMode::Wait => self.regenerate_now(symbol, horizon).await,
            RegenerateMode::Background => {
                let permit = match self.claim(&Self::prediction_purpose(horizon), symbol).await {
                    Ok(permit) => permit,
                    Err(outcome) => return outcome,
                };
                let this = Arc::clone(self);
                let symbol = symbol.to_string();
                tokio::spawn(async move {
                    this.run_claimed(&symbol, horizon, permit).await;
                });
                RegenerateOutcome::Queued
            }
        }
    }

    /// Every stored instrument for one horizon.
    pub async fn recompute_all(&self, horizon: Horizon) -> Result<BatchSummary, AnalysisError> {
        let symbols: Vec<String> = self
            .db
            .list_instruments()
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|i| i.symbol)
            .collect();
        Ok(self.recompute_symbols(&symbols, horizon).await)
    }

    /// Bounded-concurrency batch; one failing symbol never stops the others.
    pub async fn recompute_symbols(&self, symbols: &[String], horizon: Horizon) -> BatchSummary {
        let stagger = self.settings.batch_stagger;
        let outcomes: Vec<(String, RegenerateOutcome)> = stream::iter(symbols.iter().cloned().enumerate())
            .map(|(index, symbol)| async move {
                if !stagger.is_zero() {
                    tokio::time::sleep(stagger * index as u32).await;
                }
                let outcome = self.regenerate_now(&symbol, horizon).await;
                (symbol, outcome)
            })
            .buffer_unordered(self.settings.batch_concurrency.max(1))
            .collect()
            .await;

        let mut summary = BatchSummary {
            horizon,
            generated: Vec::new(),
            rejected: Vec::new(),
            failed: Vec::new(),
        };
        for (symbol, outcome) in outcomes {
            match outcome {
                RegenerateOutcome::Generated(_) | RegenerateOutcome::Queued => summary.generated.push(symbol),
                RegenerateOutcome::Rejected { .. } => summary.rejected.push(symbol),
                RegenerateOutcome::Unavailable { reason, .. } => summary.failed.push((symbol, reason)),
            }
        }
        summary.generated.sort();
        summary.rejected.sort();
        summary.failed.sort();

        tracing::info!(
            horizon = %horizon,
            generated = summary.generated.len(),
            rejected = summary.rejected.len(),
            failed = summary.failed.len(),
            "Batch recompute finished"
        );
        summary
    }

    // ---- Scenarios ----

    pub async fn scenarios(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        force: bool,
    ) -> Result<ScenarioOutcome, AnalysisError> {
        self.scenarios_at(symbol, timeframe, force, Utc::now()).await
    }

    pub async fn scenarios_at(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<ScenarioOutcome, AnalysisError> {
        let symbol = symbol.trim().to_uppercase();
        let scenario_date = timeframe.scenario_date(session_date(now));

        let existing = self
            .db
            .latest_batch(&symbol, timeframe, scenario_date)
            .await
            .map_err(db_err)?;
        let prediction = self
            .db
            .active_prediction(&symbol, timeframe.horizon())
            .await
            .map_err(db_err)?;

        let decision = regeneration_decision(
            existing.as_ref(),
            timeframe,
            force,
            prediction.is_some(),
            now,
            self.settings.scenario_stale_secs,
        );

        match (decision, existing) {
            (RegenerationDecision::Frozen, Some(batch)) => Ok(ScenarioOutcome::Frozen(batch)),
            (RegenerationDecision::Fresh, Some(batch)) => Ok(ScenarioOutcome::Fresh(batch)),
            (RegenerationDecision::RequiresForce, existing) => Ok(ScenarioOutcome::Unavailable {
                reason: format!("{} scenarios are generated on request", timeframe),
                existing,
            }),
            (RegenerationDecision::MissingPrediction, existing) => Ok(ScenarioOutcome::Unavailable {
                reason: format!("no active {} prediction for {}", timeframe.horizon(), symbol),
                existing,
            }),
            (_, existing) => {
                self.regenerate_scenarios(&symbol, timeframe, scenario_date, prediction.as_ref(), existing, now)
                    .await
            }
        }
    }

    async fn regenerate_scenarios(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        scenario_date: NaiveDate,
        prediction: Option<&Prediction>,
        existing: Option<ScenarioBatch>,
        now: DateTime<Utc>,
    ) -> Result<ScenarioOutcome, AnalysisError> {
        let purpose = format!("scenarios:{}", timeframe);
        let permit = match self.cooldown.try_begin(&purpose, symbol).await {
            Ok(permit) => permit,
            Err(AnalysisError::CooldownActive { retry_after_secs, .. }) => {
                return Ok(ScenarioOutcome::Rejected {
                    retry_after_secs,
                    existing,
                })
            }
            Err(e) => return Err(e),
        };

        match self
            .build_scenarios(symbol, timeframe, scenario_date, prediction, now)
            .await
        {
            Ok(batch) => {
                self.cooldown.complete(permit);
                tracing::info!(
                    symbol,
                    timeframe = %timeframe,
                    scenario_date = %scenario_date,
                    count = batch.scenarios.len(),
                    "Scenarios generated"
                );
                Ok(ScenarioOutcome::Regenerated(batch))
            }
            Err(e) => {
                self.cooldown.abort(permit).await;
                tracing::warn!(symbol, timeframe = %timeframe, stage = "scenarios", error = %e, "Scenarios unavailable");
                Ok(ScenarioOutcome::Unavailable {
                    reason: e.to_string(),
                    existing,
                })
            }
        }
    }

    async fn build_scenarios(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        scenario_date: NaiveDate,
        prediction: Option<&Prediction>,
        now: DateTime<Utc>,
    ) -> Result<ScenarioBatch, AnalysisError> {
        let instrument = self.db.get_or_create_instrument(symbol).await.map_err(db_err)?;
        let bars = self
            .sources
            .prices
            .get_price_history(symbol, BarInterval::Day1, self.settings.history_lookback)
            .await?;
        let snapshot = self.technical.snapshot(symbol, &bars)?;

        let anchor = match (timeframe, prediction) {
            (ScenarioTimeframe::Today, _) => ScenarioQuote::from_quote(&self.sources.quotes.get_quote(symbol).await?),
            (ScenarioTimeframe::Tomorrow, Some(p)) => ScenarioQuote::from_prediction(p),
            (ScenarioTimeframe::Tomorrow, None) => {
                return Err(AnalysisError::InsufficientData(format!(
                    "no tomorrow prediction for {}",
                    symbol
                )))
            }
        };
        if !(anchor.current_price > 0.0) {
            return Err(AnalysisError::InvalidData(format!(
                "anchor price {} for {}",
                anchor.current_price, symbol
            )));
        }

        let news = self.recent_news(symbol).await;
        let sentiment = self.scorer().aggregate(&news).normalized;
        let signals = ScenarioSignals::from_snapshot(&snapshot, sentiment, prediction.map(PredictionBias::from));

        let scenarios = self.generator.generate(&instrument, timeframe, &anchor, &signals);
        if scenarios.is_empty() {
            return Err(AnalysisError::CalculationError(format!("no scenarios for {}", symbol)));
        }

        let reference_price = match timeframe {
            ScenarioTimeframe::Today => Some(anchor.previous_close),
            ScenarioTimeframe::Tomorrow => Some(anchor.current_price),
        }
        .filter(|p| *p > 0.0);

        let batch = ScenarioBatch {
            id: None,
            symbol: instrument.symbol.clone(),
            timeframe,
            scenario_date,
            generated_at: now,
            resolved_at: None,
            reference_price,
            scenarios,
        };
        self.db.save_batch(&batch).await.map_err(db_err)
    }

    pub async fn vote_scenario(&self, scenario_id: i64) -> Result<i64, AnalysisError> {
        self.db.vote_scenario(scenario_id).await.map_err(db_err)
    }

    // ---- Resolution ----

    pub async fn resolve_scenarios(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        scenario_date: NaiveDate,
        realized: RealizedOutcome,
    ) -> Result<ResolveOutcome, AnalysisError> {
        self.resolve_scenarios_at(symbol, timeframe, scenario_date, realized, Utc::now())
            .await
    }

    pub async fn resolve_scenarios_at(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        scenario_date: NaiveDate,
        realized: RealizedOutcome,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, AnalysisError> {
        let batch = self
            .db
            .latest_batch(symbol, timeframe, scenario_date)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                AnalysisError::InvalidData(format!(
                    "no {} scenarios for {} on {}",
                    timeframe, symbol, scenario_date
                ))
            })?;
        self.resolve_loaded(batch, realized, now).await
    }

    async fn resolve_loaded(
        &self,
        mut batch: ScenarioBatch,
        realized: RealizedOutcome,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, AnalysisError> {
        let resolution = match resolve_batch(&mut batch, realized, now) {
            Ok(resolution) => resolution,
            Err(AnalysisError::AlreadyResolved(_)) => return Ok(ResolveOutcome::AlreadyResolved(batch)),
            Err(e) => return Err(e),
        };

        match self.db.record_resolution(&batch).await.map_err(db_err) {
            Ok(()) => {
                tracing::info!(
                    symbol = %batch.symbol,
                    timeframe = %batch.timeframe,
                    scenario_date = %batch.scenario_date,
                    winner = ?batch.winner().map(|s| s.scenario_type.as_str()),
                    actual_change_percent = resolution.actual_change_percent,
                    "Scenarios resolved"
                );
                Ok(ResolveOutcome::Resolved { batch, resolution })
            }
            // Another worker got there first; report what it stored
            Err(AnalysisError::AlreadyResolved(_)) => {
                let stored = match batch.id {
                    Some(id) => self.db.batch(id).await.map_err(db_err)?,
                    None => None,
                };
                Ok(ResolveOutcome::AlreadyResolved(stored.unwrap_or(batch)))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve every unresolved batch whose session has closed and whose
    /// closing bar is stored. Returns how many were resolved.
    pub async fn resolve_pending(&self, now: DateTime<Utc>) -> Result<usize, AnalysisError> {
        let batches = self
            .db
            .unresolved_batches(session_date(now))
            .await
            .map_err(db_err)?;

        let mut resolved = 0;
        for batch in batches {
            if !is_session_closed(batch.scenario_date, now) {
                continue;
            }
            let bars = match self
                .sources
                .prices
                .get_price_history(&batch.symbol, BarInterval::Day1, RESOLUTION_LOOKBACK)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!(symbol = %batch.symbol, stage = "resolution", error = %e, "No prices to resolve with");
                    continue;
                }
            };
            let Some(bar) = bars.iter().find(|b| b.price_date == batch.scenario_date) else {
                tracing::debug!(symbol = %batch.symbol, date = %batch.scenario_date, "Closing bar not stored yet");
                continue;
            };
            let realized = RealizedOutcome {
                close: bar.close,
                open: Some(bar.open),
            };

            let symbol = batch.symbol.clone();
            match self.resolve_loaded(batch, realized, now).await {
                Ok(ResolveOutcome::Resolved { .. }) => resolved += 1,
                Ok(ResolveOutcome::AlreadyResolved(_)) => {}
                Err(e) => {
                    tracing::warn!(symbol = %symbol, stage = "resolution", error = %e, "Resolution failed");
                }
            }
        }
        Ok(resolved)
    }
}
