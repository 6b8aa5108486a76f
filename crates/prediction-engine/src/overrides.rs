use analysis_core::{Direction, NewsItem};
use chrono::{DateTime, Duration, Utc};
use sentiment_analysis::{KeywordScorer, OverrideClass};
use serde::{Deserialize, Serialize};

const EXTRA_TRIGGER_BONUS: f64 = 5.0;
const MAX_STACKED_CONFIDENCE: f64 = 95.0;

/// A forced direction from priority keywords in session news.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub direction: Direction,
    /// 0 to 100
    pub confidence: f64,
    pub class: OverrideClass,
    pub triggers: Vec<String>,
    pub table_version: String,
}

impl OverrideDecision {
    /// Bearish trade-policy and regulatory overrides also mute any rebound.
    pub fn suppresses_rebound(&self) -> bool {
        self.direction == Direction::Down
            && matches!(self.class, OverrideClass::TradePolicy | OverrideClass::Regulatory)
    }
}

struct Trigger {
    phrase: String,
    direction: Direction,
    confidence: f64,
    class: OverrideClass,
}

pub fn in_session_window(item: &NewsItem, as_of: DateTime<Utc>, window_hours: i64) -> bool {
    let start = as_of - Duration::hours(window_hours);
    item.published_at >= start && item.published_at <= as_of
}

/// Scan session news for priority keywords. The side with the larger summed
/// confidence wins; a tie goes to the bearish side.
pub fn detect_override(
    scorer: &KeywordScorer,
    news: &[NewsItem],
    as_of: DateTime<Utc>,
    window_hours: i64,
) -> Option<OverrideDecision> {
    let mut triggers: Vec<Trigger> = Vec::new();
    for item in news.iter().filter(|n| in_session_window(n, as_of, window_hours)) {
        for kw in scorer.priority_matches(&item.text()) {
            if triggers.iter().any(|t| t.phrase == kw.phrase) {
                continue;
            }
            triggers.push(Trigger {
                phrase: kw.phrase.clone(),
                direction: kw.direction,
                confidence: kw.confidence,
                class: kw.class,
            });
        }
    }
    if triggers.is_empty() {
        return None;
    }

    let side = |d: Direction| -> Option<f64> {
        let mut hits = triggers.iter().filter(|t| t.direction == d).peekable();
        hits.peek()?;
        Some(hits.map(|t| t.confidence).sum())
    };
    let direction = match (side(Direction::Up), side(Direction::Down)) {
        (Some(up), Some(down)) if up > down => Direction::Up,
        (Some(_), None) => Direction::Up,
        _ => Direction::Down,
    };

    let mut winning: Vec<&Trigger> = triggers.iter().filter(|t| t.direction == direction).collect();
    winning.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let lead = *winning.first()?;
    let stacked = lead.confidence + EXTRA_TRIGGER_BONUS * (winning.len() - 1) as f64;
    let confidence = stacked.min(MAX_STACKED_CONFIDENCE.max(lead.confidence));

    tracing::debug!(
        direction = direction.as_str(),
        confidence,
        triggers = winning.len(),
        "Priority keyword override"
    );

    Some(OverrideDecision {
        direction,
        confidence,
        class: lead.class,
        triggers: winning.iter().map(|t| t.phrase.clone()).collect(),
        table_version: scorer.tables().priority.version.clone(),
    })
}
