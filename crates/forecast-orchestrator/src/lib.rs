//! Wiring between the prediction engine, the store and the outside world:
//! cooldown-guarded regeneration, scenario lifecycle and batch recompute.

pub mod config;
pub mod cooldown;
pub mod service;
pub mod sources;

#[cfg(test)]
mod tests;

pub use config::ForecastConfig;
pub use cooldown::{CooldownController, CooldownPermit, InMemoryCooldownStore, RedisCooldownStore};
pub use service::{
    BatchSummary, ForecastOrchestrator, MarketSources, OrchestratorSettings, RegenerateMode,
    RegenerateOutcome, ResolveOutcome, ScenarioOutcome,
};
pub use sources::{StaticMarketContext, StoreMarketData};
