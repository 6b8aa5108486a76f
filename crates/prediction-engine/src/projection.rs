use analysis_core::stats::{interpolate, round_cents};
use analysis_core::Horizon;

use crate::config::EngineConfig;

/// |composite score| -> expected one-session move in percent.
const MOVE_CURVE: [(f64, f64); 7] = [
    (0.1, 0.5),
    (0.3, 1.2),
    (0.5, 2.0),
    (0.7, 3.0),
    (1.0, 4.0),
    (1.5, 6.0),
    (2.0, 8.0),
];

const MIN_BAND_PCT: f64 = 0.5;

/// Moves grow with the square root of the trading days covered.
pub fn horizon_scale(horizon: Horizon) -> f64 {
    (horizon.trading_days().max(1) as f64).sqrt()
}

/// Unsigned expected move in percent.
pub fn expected_move_pct(
    config: &EngineConfig,
    magnitude: f64,
    atr_percent: Option<f64>,
    volatility_multiplier: f64,
    horizon: Horizon,
) -> f64 {
    let atr_factor = 1.0 + atr_percent.unwrap_or(0.0).max(0.0) / 10.0;
    let mut base = interpolate(&MOVE_CURVE, magnitude.abs()) * atr_factor;
    if volatility_multiplier >= config.high_vol_multiplier {
        base = base.max(config.min_high_vol_move_pct);
    }
    let scale = horizon_scale(horizon);
    (base * scale).min(config.max_expected_move_pct * scale)
}

pub fn project_price(previous_close: f64, pct_move: f64) -> f64 {
    round_cents(previous_close * (1.0 + pct_move / 100.0))
}

/// (low, high) around the projected price, widened by recent volatility.
pub fn price_band(predicted: f64, daily_volatility_pct: f64, volatility_multiplier: f64, horizon: Horizon) -> (f64, f64) {
    let band_pct = daily_volatility_pct.max(MIN_BAND_PCT) * volatility_multiplier.max(0.1) * horizon_scale(horizon);
    let half = predicted * band_pct / 100.0;
    (round_cents((predicted - half).max(0.01)), round_cents(predicted + half))
}
