use analysis_core::stats::{percent_change, round_to};
use analysis_core::{AnalysisError, PriceBar};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::indicators::*;

/// MACD(12, 26) plus a 9-bar signal with two histogram points.
pub const MIN_BARS: usize = 35;

const SR_LOOKBACK: usize = 60;
const VOLATILITY_WINDOW: usize = 20;
const VOLUME_WINDOW: usize = 20;
const MOMENTUM_PERIOD: usize = 5;

/// Everything the aggregator and scenario generator read from price history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub last_close: f64,
    pub rsi: f64,
    pub rsi_signal: RsiSignal,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub macd_state: MacdState,
    pub ema_12: f64,
    pub ema_26: f64,
    pub sma_20: f64,
    pub sma_50: Option<f64>,
    pub bollinger_upper: f64,
    pub bollinger_middle: f64,
    pub bollinger_lower: f64,
    pub percent_b: f64,
    /// Band width as a percent of the middle band
    pub bollinger_width: f64,
    pub bollinger_position: BollingerPosition,
    pub atr: Option<f64>,
    pub atr_percent: Option<f64>,
    pub momentum: f64,
    pub change_1d_pct: f64,
    pub change_3d_pct: f64,
    pub change_7d_pct: f64,
    /// Dollar declines, positive when price fell
    pub drop_1d: f64,
    pub drop_3d: f64,
    pub volatility: f64,
    pub volatility_level: VolatilityLevel,
    pub volume_ratio: f64,
    pub levels: SupportResistance,
    /// Net vote of RSI, MACD and moving-average alignment, -1.0 to 1.0
    pub technical_score: f64,
    pub signals: Vec<String>,
}

impl TechnicalSnapshot {
    pub fn is_oversold(&self) -> bool {
        self.rsi_signal == RsiSignal::Oversold
    }

    pub fn is_overbought(&self) -> bool {
        self.rsi_signal == RsiSignal::Overbought
    }

    /// Compact view persisted with predictions
    pub fn metrics(&self) -> serde_json::Value {
        json!({
            "rsi": round_to(self.rsi, 2),
            "rsi_signal": self.rsi_signal,
            "macd": round_to(self.macd, 4),
            "macd_signal": round_to(self.macd_signal, 4),
            "macd_histogram": round_to(self.macd_histogram, 4),
            "macd_state": self.macd_state,
            "ema_12": round_to(self.ema_12, 2),
            "ema_26": round_to(self.ema_26, 2),
            "sma_20": round_to(self.sma_20, 2),
            "sma_50": self.sma_50.map(|v| round_to(v, 2)),
            "percent_b": round_to(self.percent_b, 3),
            "bollinger_position": self.bollinger_position,
            "atr": self.atr.map(|v| round_to(v, 2)),
            "momentum": round_to(self.momentum, 2),
            "change_1d_pct": round_to(self.change_1d_pct, 2),
            "change_3d_pct": round_to(self.change_3d_pct, 2),
            "change_7d_pct": round_to(self.change_7d_pct, 2),
            "volatility": round_to(self.volatility, 2),
            "volatility_level": self.volatility_level,
            "volume_ratio": round_to(self.volume_ratio, 2),
            "nearest_support": self.levels.nearest_support.map(|v| round_to(v, 2)),
            "nearest_resistance": self.levels.nearest_resistance.map(|v| round_to(v, 2)),
            "technical_score": round_to(self.technical_score, 3),
            "signals": self.signals,
        })
    }
}

#[derive(Default)]
pub struct TechnicalAnalysisEngine;

impl TechnicalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn snapshot(&self, symbol: &str, bars: &[PriceBar]) -> Result<TechnicalSnapshot, AnalysisError> {
        if bars.len() < MIN_BARS {
            return Err(AnalysisError::InsufficientData(format!(
                "Need at least {} bars for technical analysis, got {}",
                MIN_BARS,
                bars.len()
            )));
        }
        if let Some(bad) = bars.iter().find(|b| !(b.close > 0.0) || !b.close.is_finite()) {
            return Err(AnalysisError::InvalidData(format!(
                "non-positive close on {} for {}",
                bad.price_date, symbol
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let n = closes.len();
        let last_close = closes[n - 1];

        let rsi_value = last_of(&rsi(&closes, 14), "RSI")?;

        let macd_result = macd(&closes, 12, 26, 9);
        let macd_value = last_of(&macd_result.macd_line, "MACD")?;
        let macd_signal = last_of(&macd_result.signal_line, "MACD signal")?;
        let macd_histogram = last_of(&macd_result.histogram, "MACD histogram")?;
        let macd_state = macd_state(&macd_result);

        let ema_12 = last_of(&ema(&closes, 12), "EMA12")?;
        let ema_26 = last_of(&ema(&closes, 26), "EMA26")?;
        let sma_20 = last_of(&sma(&closes, 20), "SMA20")?;
        let sma_50 = sma(&closes, 50).last().copied();

        let bb = bollinger_bands(&closes, 20, 2.0);
        let bollinger_upper = last_of(&bb.upper, "Bollinger upper")?;
        let bollinger_middle = last_of(&bb.middle, "Bollinger middle")?;
        let bollinger_lower = last_of(&bb.lower, "Bollinger lower")?;
        let pct_b = percent_b(&bb, last_close).unwrap_or(0.5);
        let bollinger_width = if bollinger_middle > 0.0 {
            (bollinger_upper - bollinger_lower) / bollinger_middle * 100.0
        } else {
            0.0
        };

        let atr_value = atr(bars, 14).last().copied();
        let atr_percent = atr_value.map(|a| a / last_close * 100.0);

        let volatility_value = volatility(&closes, VOLATILITY_WINDOW).unwrap_or(0.0);

        let mut signals: Vec<(&'static str, i32, bool)> = Vec::new();

        let rsi_signal = classify_rsi(rsi_value);
        match rsi_signal {
            RsiSignal::Oversold => signals.push(("RSI Oversold", 2, true)),
            RsiSignal::Overbought => signals.push(("RSI Overbought", 2, false)),
            RsiSignal::Neutral => {}
        }

        match macd_state {
            MacdState::Bullish => signals.push(("MACD Bullish", 2, true)),
            MacdState::Bearish => signals.push(("MACD Bearish", 2, false)),
            MacdState::Neutral => {}
        }

        let above_mas = last_close > sma_20 && sma_50.map_or(true, |s| last_close > s);
        let below_mas = last_close < sma_20 && sma_50.map_or(true, |s| last_close < s);
        if above_mas {
            signals.push(("Price Above MAs", 2, true));
        } else if below_mas {
            signals.push(("Price Below MAs", 2, false));
        }
        if ema_12 > ema_26 {
            signals.push(("EMA12 Above EMA26", 1, true));
        } else if ema_12 < ema_26 {
            signals.push(("EMA12 Below EMA26", 1, false));
        }

        const MAX_WEIGHT: i32 = 7;
        let net: i32 = signals
            .iter()
            .map(|(_, w, bullish)| if *bullish { *w } else { -*w })
            .sum();
        let technical_score = (net as f64 / MAX_WEIGHT as f64).clamp(-1.0, 1.0);

        Ok(TechnicalSnapshot {
            symbol: symbol.to_string(),
            last_close,
            rsi: rsi_value,
            rsi_signal,
            macd: macd_value,
            macd_signal,
            macd_histogram,
            macd_state,
            ema_12,
            ema_26,
            sma_20,
            sma_50,
            bollinger_upper,
            bollinger_middle,
            bollinger_lower,
            percent_b: pct_b,
            bollinger_width,
            bollinger_position: classify_percent_b(pct_b),
            atr: atr_value,
            atr_percent,
            momentum: momentum(&closes, MOMENTUM_PERIOD).unwrap_or(0.0),
            change_1d_pct: percent_change(closes[n - 2], last_close),
            change_3d_pct: percent_change(closes[n - 4], last_close),
            change_7d_pct: percent_change(closes[n - 8], last_close),
            drop_1d: closes[n - 2] - last_close,
            drop_3d: closes[n - 4] - last_close,
            volatility: volatility_value,
            volatility_level: classify_volatility(volatility_value),
            volume_ratio: volume_ratio(&volumes, VOLUME_WINDOW).unwrap_or(1.0),
            levels: support_resistance(bars, SR_LOOKBACK),
            technical_score,
            signals: signals.iter().map(|(name, _, _)| name.to_string()).collect(),
        })
    }
}

fn last_of(values: &[f64], name: &str) -> Result<f64, AnalysisError> {
    values
        .last()
        .copied()
        .ok_or_else(|| AnalysisError::CalculationError(format!("{} produced no values", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                symbol: "TEST".into(),
                price_date: start + Duration::days(i as i64),
                interval: analysis_core::BarInterval::Day1,
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                previous_close: if i > 0 { Some(closes[i - 1]) } else { None },
                volume: 1_000_000.0,
                source: "test".into(),
            })
            .collect()
    }

    #[test]
    fn test_snapshot_requires_min_bars() {
        let bars = bars_from_closes(&vec![100.0; MIN_BARS - 1]);
        let err = TechnicalAnalysisEngine::new().snapshot("TEST", &bars).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn test_snapshot_uptrend_is_bullish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let snap = TechnicalAnalysisEngine::new().snapshot("TEST", &bars_from_closes(&closes)).unwrap();

        assert_eq!(snap.rsi_signal, RsiSignal::Overbought);
        assert_eq!(snap.macd_state, MacdState::Bullish);
        assert!(snap.ema_12 > snap.ema_26);
        assert!(snap.technical_score > 0.0);
        assert!(snap.change_7d_pct > 0.0);
        assert!(snap.drop_1d < 0.0);
    }

    #[test]
    fn test_snapshot_downtrend_is_bearish() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - 0.04 * (i * i) as f64).collect();
        let snap = TechnicalAnalysisEngine::new().snapshot("TEST", &bars_from_closes(&closes)).unwrap();

        assert_eq!(snap.rsi_signal, RsiSignal::Oversold);
        assert_eq!(snap.macd_state, MacdState::Bearish);
        assert!(snap.technical_score < 0.0);
        assert!(snap.drop_1d > 0.0);
        assert!(snap.drop_3d > snap.drop_1d);
    }

    #[test]
    fn test_snapshot_rejects_bad_close() {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        closes[10] = 0.0;
        let err = TechnicalAnalysisEngine::new().snapshot("TEST", &bars_from_closes(&closes)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidData(_)));
    }

    #[test]
    fn test_metrics_shape() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0).collect();
        let snap = TechnicalAnalysisEngine::new().snapshot("TEST", &bars_from_closes(&closes)).unwrap();
        let metrics = snap.metrics();
        assert!(metrics["rsi"].is_number());
        assert!(metrics["signals"].is_array());
        assert!(metrics["sma_50"].is_null());
    }
}
