//! Fixtures shared by the engine's unit tests.

use analysis_core::{Instrument, MarketStatus, NewsItem, Quote};
use chrono::{DateTime, TimeZone, Utc};
use technical_analysis::{
    BollingerPosition, MacdState, RsiSignal, SupportResistance, TechnicalSnapshot, VolatilityLevel,
};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 4, 15, 0, 0).unwrap()
}

/// A quiet, neutral snapshot around $100.
pub fn snapshot() -> TechnicalSnapshot {
    TechnicalSnapshot {
        symbol: "TEST".into(),
        last_close: 100.0,
        rsi: 50.0,
        rsi_signal: RsiSignal::Neutral,
        macd: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        macd_state: MacdState::Neutral,
        ema_12: 100.0,
        ema_26: 100.0,
        sma_20: 100.0,
        sma_50: Some(100.0),
        bollinger_upper: 104.0,
        bollinger_middle: 100.0,
        bollinger_lower: 96.0,
        percent_b: 0.5,
        bollinger_width: 8.0,
        bollinger_position: BollingerPosition::Middle,
        atr: Some(2.0),
        atr_percent: Some(2.0),
        momentum: 0.0,
        change_1d_pct: 0.0,
        change_3d_pct: 0.0,
        change_7d_pct: 0.0,
        drop_1d: 0.0,
        drop_3d: 0.0,
        volatility: 1.0,
        volatility_level: VolatilityLevel::Low,
        volume_ratio: 1.0,
        levels: SupportResistance::default(),
        technical_score: 0.0,
        signals: vec![],
    }
}

pub fn quote(current: f64, open: f64, previous_close: f64) -> Quote {
    Quote {
        symbol: "TEST".into(),
        timestamp: now(),
        current_price: current,
        open,
        high: current.max(open),
        low: current.min(open),
        previous_close,
        volume: 1_000_000.0,
        market_status: MarketStatus::Open,
    }
}

pub fn instrument() -> Instrument {
    Instrument::new("TEST")
}

pub fn news(title: &str, hours_ago: i64) -> NewsItem {
    NewsItem {
        id: None,
        symbol: "TEST".into(),
        title: title.into(),
        description: None,
        published_at: now() - chrono::Duration::hours(hours_ago),
        sentiment_score: None,
        is_important: false,
        importance_date: None,
        expected_surge_percent: None,
        surge_keywords: vec![],
    }
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<analysis_core::PriceBar> {
    let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| analysis_core::PriceBar {
            symbol: "TEST".into(),
            price_date: start + chrono::Duration::days(i as i64),
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
