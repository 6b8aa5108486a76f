//! Contrarian rebound: a sharp dollar drop, rebound-flavoured news and a
//! positive intraday move together reclassify the outlook as bullish.

use analysis_core::Quote;
use serde::{Deserialize, Serialize};
use technical_analysis::TechnicalSnapshot;

use crate::config::ReboundConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReboundStrength {
    Weak,
    Moderate,
    Strong,
}

impl ReboundStrength {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 110.0 {
            ReboundStrength::Strong
        } else if confidence >= 80.0 {
            ReboundStrength::Moderate
        } else {
            ReboundStrength::Weak
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReboundAnalysis {
    /// Largest of the 1-day and 3-day dollar declines
    pub drop_amount: f64,
    pub drop_window_days: u32,
    pub threshold: f64,
    pub recovery_pct: f64,
    /// Unclamped, up to the configured maximum (150 by default)
    pub confidence: f64,
    pub strength: ReboundStrength,
}

/// Minimum dollar decline that counts as a sell-off at a given price level.
pub fn drop_threshold(price: f64) -> f64 {
    match price {
        p if p < 20.0 => 0.75,
        p if p < 50.0 => 1.50,
        p if p < 100.0 => 3.0,
        p if p < 500.0 => 5.0,
        _ => 15.0,
    }
}

/// Grows with the size of the drop: a tier step plus a capped linear term.
pub fn drop_bonus(drop: f64) -> f64 {
    let tier = match drop {
        d if d >= 20.0 => 40.0,
        d if d >= 10.0 => 30.0,
        d if d >= 5.0 => 20.0,
        _ => 10.0,
    };
    tier + (drop.max(0.0) * 0.5).min(15.0)
}

pub fn recovery_bonus(recovery_pct: f64) -> f64 {
    match recovery_pct {
        r if r >= 2.0 => 20.0,
        r if r >= 1.0 => 12.0,
        r if r > 0.0 => 5.0,
        _ => 0.0,
    }
}

/// `sentiment` on the keyword scale (-10 to 10)
pub fn sentiment_bonus(sentiment: f64) -> f64 {
    match sentiment {
        s if s >= 6.0 => 20.0,
        s if s >= 3.0 => 10.0,
        _ => 0.0,
    }
}

pub fn rebound_confidence(config: &ReboundConfig, drop: f64, recovery_pct: f64, sentiment: f64) -> f64 {
    let raw = config.base_confidence + drop_bonus(drop) + recovery_bonus(recovery_pct) + sentiment_bonus(sentiment);
    raw.min(config.max_confidence)
}

/// None unless rebound phrasing, a qualifying drop and an intraday recovery all line up.
pub fn evaluate(
    config: &ReboundConfig,
    is_rebound: bool,
    snapshot: &TechnicalSnapshot,
    quote: &Quote,
    sentiment: f64,
) -> Option<ReboundAnalysis> {
    if !is_rebound {
        return None;
    }

    let (drop_amount, drop_window_days) = if snapshot.drop_3d > snapshot.drop_1d {
        (snapshot.drop_3d, 3)
    } else {
        (snapshot.drop_1d, 1)
    };
    let reference = if quote.previous_close > 0.0 {
        quote.previous_close
    } else {
        snapshot.last_close
    };
    let threshold = drop_threshold(reference);
    if drop_amount <= threshold {
        return None;
    }

    let recovery_pct = quote.intraday_change_percent();
    if recovery_pct <= 0.0 {
        return None;
    }

    let confidence = rebound_confidence(config, drop_amount, recovery_pct, sentiment);
    Some(ReboundAnalysis {
        drop_amount,
        drop_window_days,
        threshold,
        recovery_pct,
        confidence,
        strength: ReboundStrength::from_confidence(confidence),
    })
}
