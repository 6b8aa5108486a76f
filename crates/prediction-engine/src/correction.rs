//! Mean-reversion warnings: stretched moves that tend to snap back.

use analysis_core::Direction;
use serde::{Deserialize, Serialize};
use technical_analysis::TechnicalSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CorrectionSeverity {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionWarning {
    /// Direction the correction is expected to move price
    pub direction: Direction,
    /// 0 to 100
    pub score: f64,
    pub severity: CorrectionSeverity,
    pub patterns: Vec<String>,
}

impl CorrectionWarning {
    /// Damp (or flip) a composite score that runs against the expected correction.
    pub fn adjust(&self, score: f64) -> f64 {
        let factor = self.score / 100.0;
        match self.direction {
            Direction::Down if score > 0.0 => score * (1.0 - factor * 0.5),
            Direction::Up if score < 0.0 => {
                if self.score > 60.0 {
                    score.abs() * 0.7
                } else {
                    score * (1.0 - factor * 0.4)
                }
            }
            _ => score,
        }
    }
}

/// Scan the snapshot for overbought/oversold exhaustion. Patterns vote for a
/// direction; the side with the larger total wins.
pub fn detect(snapshot: &TechnicalSnapshot) -> Option<CorrectionWarning> {
    let rsi = snapshot.rsi;
    let mut down: Vec<(f64, String)> = Vec::new();
    let mut up: Vec<(f64, String)> = Vec::new();

    if rsi > 75.0 {
        down.push((((rsi - 70.0) * 10.0).min(40.0), format!("Overbought RSI-14: {:.1}", rsi)));
    }
    if rsi < 25.0 {
        up.push((((30.0 - rsi) * 10.0).min(40.0), format!("Oversold RSI-14: {:.1}", rsi)));
    }
    if snapshot.change_7d_pct > 10.0 && snapshot.change_3d_pct > 5.0 && rsi > 70.0 {
        down.push((30.0, format!("Parabolic rise: {:+.1}% (7d)", snapshot.change_7d_pct)));
    }
    if snapshot.change_7d_pct < -10.0 && rsi < 35.0 {
        up.push((25.0, format!("Extended decline: {:+.1}% (7d)", snapshot.change_7d_pct)));
    }
    if snapshot.percent_b > 0.95 && rsi > 65.0 {
        down.push((20.0, "Upper Bollinger breakout while overbought".to_string()));
    }
    if snapshot.percent_b < 0.05 && rsi < 40.0 {
        up.push((20.0, "Lower Bollinger breakdown while oversold".to_string()));
    }
    if snapshot.volume_ratio > 2.0 && rsi > 70.0 && snapshot.change_1d_pct > 3.0 {
        down.push((25.0, "Volume exhaustion at highs".to_string()));
    }

    let down_total: f64 = down.iter().map(|(s, _)| s).sum();
    let up_total: f64 = up.iter().map(|(s, _)| s).sum();
    if down.is_empty() && up.is_empty() {
        return None;
    }

    let (direction, total, patterns) = if down_total >= up_total {
        (Direction::Down, down_total, down)
    } else {
        (Direction::Up, up_total, up)
    };
    let score = total.min(100.0);
    let severity = if score > 60.0 {
        CorrectionSeverity::High
    } else if score > 30.0 {
        CorrectionSeverity::Moderate
    } else {
        CorrectionSeverity::Low
    };

    Some(CorrectionWarning {
        direction,
        score,
        severity,
        patterns: patterns.into_iter().map(|(_, p)| p).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::snapshot;

    fn warning(direction: Direction, score: f64) -> CorrectionWarning {
        CorrectionWarning {
            direction,
            score,
            severity: CorrectionSeverity::Moderate,
            patterns: vec![],
        }
    }

    #[test]
    fn test_down_warning_damps_bullish_score() {
        let w = warning(Direction::Down, 50.0);
        assert!((w.adjust(0.8) - 0.6).abs() < 1e-9);
        // already bearish: untouched
        assert_eq!(w.adjust(-0.3), -0.3);
    }

    #[test]
    fn test_strong_up_warning_flips_bearish_score() {
        assert!((warning(Direction::Up, 70.0).adjust(-0.5) - 0.35).abs() < 1e-9);
        assert!((warning(Direction::Up, 50.0).adjust(-0.5) + 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_detect_quiet_market() {
        assert!(detect(&snapshot()).is_none());
    }

    #[test]
    fn test_detect_parabolic_rise() {
        let mut snap = snapshot();
        snap.rsi = 82.0;
        snap.change_7d_pct = 14.0;
        snap.change_3d_pct = 7.0;
        snap.percent_b = 0.98;

        let w = detect(&snap).unwrap();
        assert_eq!(w.direction, Direction::Down);
        // 40 (RSI) + 30 (parabolic) + 20 (upper band)
        assert_eq!(w.score, 90.0);
        assert_eq!(w.severity, CorrectionSeverity::High);
        assert_eq!(w.patterns.len(), 3);
    }

    #[test]
    fn test_detect_oversold_bounce() {
        let mut snap = snapshot();
        snap.rsi = 28.0;
        snap.change_7d_pct = -12.0;

        let w = detect(&snap).unwrap();
        assert_eq!(w.direction, Direction::Up);
        assert_eq!(w.score, 25.0);
        assert_eq!(w.severity, CorrectionSeverity::Low);
    }
}
