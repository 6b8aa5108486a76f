use analysis_core::stats::mean;
use analysis_core::NewsItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::matcher::{covered_by, occurrences, SpanMask};
use crate::tables::{KeywordTables, PriorityKeyword, Tier};

/// Scores are clamped to [-MAX_SCORE, MAX_SCORE].
pub const MAX_SCORE: f64 = 10.0;

/// Matches at or above this absolute weight count as surge keywords.
pub const SURGE_WEIGHT: f64 = 3.0;

const SURGE_PERCENT_PER_WEIGHT: f64 = 0.5;
const MAX_SURGE_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub phrase: String,
    pub weight: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordScore {
    /// Clamped to [-10, 10]
    pub score: f64,
    /// Unclamped sum of matched weights
    pub raw_score: f64,
    pub matched_keywords: Vec<KeywordMatch>,
    pub is_rebound: bool,
}

impl KeywordScore {
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            raw_score: 0.0,
            matched_keywords: vec![],
            is_rebound: false,
        }
    }

    /// Score rescaled to [-1, 1]
    pub fn normalized(&self) -> f64 {
        self.score / MAX_SCORE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Importance {
    pub is_important: bool,
    pub expected_surge_percent: f64,
    pub surge_keywords: Vec<String>,
}

/// Sentiment across a window of news items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSentiment {
    /// Mean item score, -10 to 10
    pub score: f64,
    /// `score` rescaled to [-1, 1]
    pub normalized: f64,
    pub article_count: usize,
    pub bullish_count: usize,
    pub bearish_count: usize,
    /// True when any item carries rebound phrasing
    pub is_rebound: bool,
    /// Strongest item score by magnitude
    pub peak_score: f64,
    pub top_keywords: Vec<String>,
}

impl NewsSentiment {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            normalized: 0.0,
            article_count: 0,
            bullish_count: 0,
            bearish_count: 0,
            is_rebound: false,
            peak_score: 0.0,
            top_keywords: vec![],
        }
    }
}

struct CompiledPhrase {
    phrase: String,
    weight: f64,
    tier: Tier,
}

/// Scores free text against an immutable set of keyword tables.
pub struct KeywordScorer {
    tables: Arc<KeywordTables>,
    /// Longest phrase first, so specific phrases claim text before generic ones
    phrases: Vec<CompiledPhrase>,
}

impl KeywordScorer {
    pub fn new(tables: Arc<KeywordTables>) -> Self {
        let mut phrases: Vec<CompiledPhrase> = tables
            .bullish
            .iter()
            .chain(tables.bearish.iter())
            .map(|(tier, phrase, weight)| CompiledPhrase {
                phrase: phrase.to_string(),
                weight,
                tier,
            })
            .collect();
        phrases.sort_by(|a, b| b.phrase.len().cmp(&a.phrase.len()).then(a.phrase.cmp(&b.phrase)));

        tracing::debug!(
            version = %tables.version,
            phrases = phrases.len(),
            priority_version = %tables.priority.version,
            "Compiled keyword tables"
        );

        Self { tables, phrases }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(KeywordTables::default()))
    }

    pub fn tables(&self) -> &KeywordTables {
        &self.tables
    }

    pub fn version(&self) -> &str {
        &self.tables.version
    }

    pub fn score(&self, text: &str) -> KeywordScore {
        let text = text.to_lowercase();
        if text.trim().is_empty() {
            return KeywordScore::neutral();
        }

        let mut mask = SpanMask::new(text.len());
        let mut matched_keywords = Vec::new();

        for compiled in &self.phrases {
            let free: Vec<(usize, usize)> = occurrences(&text, &compiled.phrase)
                .into_iter()
                .filter(|span| mask.is_free(*span))
                .collect();
            if free.is_empty() {
                continue;
            }
            for span in free {
                mask.claim(span);
            }
            matched_keywords.push(KeywordMatch {
                phrase: compiled.phrase.clone(),
                weight: compiled.weight,
                tier: compiled.tier,
            });
        }

        let raw_score: f64 = matched_keywords.iter().map(|m| m.weight).sum();
        let is_rebound = self
            .tables
            .rebound_phrases
            .iter()
            .any(|phrase| !occurrences(&text, phrase).is_empty());

        KeywordScore {
            score: raw_score.clamp(-MAX_SCORE, MAX_SCORE),
            raw_score,
            matched_keywords,
            is_rebound,
        }
    }

    pub fn score_news(&self, item: &NewsItem) -> KeywordScore {
        self.score(&item.text())
    }

    pub fn assess_importance(&self, score: &KeywordScore) -> Importance {
        let surge: Vec<&KeywordMatch> = score
            .matched_keywords
            .iter()
            .filter(|m| m.weight.abs() >= SURGE_WEIGHT)
            .collect();
        let surge_weight: f64 = surge.iter().map(|m| m.weight).sum();

        Importance {
            is_important: !surge.is_empty(),
            expected_surge_percent: (surge_weight * SURGE_PERCENT_PER_WEIGHT)
                .clamp(-MAX_SURGE_PERCENT, MAX_SURGE_PERCENT),
            surge_keywords: surge.iter().map(|m| m.phrase.clone()).collect(),
        }
    }

    /// Copy of `item` with its score and importance fields recomputed.
    pub fn rescore(&self, item: &NewsItem) -> NewsItem {
        let score = self.score_news(item);
        let importance = self.assess_importance(&score);

        let mut rescored = item.clone();
        rescored.sentiment_score = Some(score.normalized());
        rescored.is_important = importance.is_important;
        rescored.importance_date = importance
            .is_important
            .then(|| item.published_at.date_naive());
        rescored.expected_surge_percent = importance
            .is_important
            .then_some(importance.expected_surge_percent);
        rescored.surge_keywords = importance.surge_keywords;
        rescored
    }

    pub fn aggregate(&self, items: &[NewsItem]) -> NewsSentiment {
        if items.is_empty() {
            return NewsSentiment::empty();
        }

        let scores: Vec<KeywordScore> = items.iter().map(|item| self.score_news(item)).collect();
        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let score = mean(&values);

        let mut top: Vec<&KeywordMatch> = scores.iter().flat_map(|s| s.matched_keywords.iter()).collect();
        top.sort_by(|a, b| {
            b.weight
                .abs()
                .partial_cmp(&a.weight.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut top_keywords: Vec<String> = Vec::new();
        for m in top {
            if !top_keywords.contains(&m.phrase) {
                top_keywords.push(m.phrase.clone());
            }
            if top_keywords.len() == 5 {
                break;
            }
        }

        NewsSentiment {
            score,
            normalized: score / MAX_SCORE,
            article_count: items.len(),
            bullish_count: values.iter().filter(|&&v| v > 0.0).count(),
            bearish_count: values.iter().filter(|&&v| v < 0.0).count(),
            is_rebound: scores.iter().any(|s| s.is_rebound),
            peak_score: values.iter().copied().fold(0.0, |acc, v| if v.abs() > acc.abs() { v } else { acc }),
            top_keywords,
        }
    }

    /// Priority keywords present in `text`, skipping occurrences covered by an exclusion.
    pub fn priority_matches(&self, text: &str) -> Vec<&PriorityKeyword> {
        let text = text.to_lowercase();
        self.tables
            .priority
            .keywords
            .iter()
            .filter(|kw| {
                let excluded: Vec<(usize, usize)> = kw
                    .exclusions
                    .iter()
                    .flat_map(|ex| occurrences(&text, ex))
                    .collect();
                occurrences(&text, &kw.phrase)
                    .into_iter()
                    .any(|span| !covered_by(span, &excluded))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::Direction;
    use chrono::{TimeZone, Utc};

    fn news(title: &str) -> NewsItem {
        NewsItem {
            id: None,
            symbol: "AAPL".into(),
            title: title.into(),
            description: None,
            published_at: Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap(),
            sentiment_score: None,
            is_important: false,
            importance_date: None,
            expected_surge_percent: None,
            surge_keywords: vec![],
        }
    }

    #[test]
    fn test_empty_text_is_neutral() {
        let scorer = KeywordScorer::with_defaults();
        let result = scorer.score("");
        assert_eq!(result.score, 0.0);
        assert!(result.matched_keywords.is_empty());
        assert!(!result.is_rebound);
        assert_eq!(scorer.score("   ").score, 0.0);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = KeywordScorer::with_defaults();
        let result = scorer.score("Buyout offer and takeover bid after breakthrough, shares hit all-time high");
        assert!(result.raw_score > MAX_SCORE);
        assert_eq!(result.score, MAX_SCORE);

        let result = scorer.score("Bankruptcy filing follows fraud probe and SEC charges");
        assert_eq!(result.score, -MAX_SCORE);
        assert!((result.normalized() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_longest_phrase_claims_text() {
        let scorer = KeywordScorer::with_defaults();
        let result = scorer.score("Tariff relief lifts chipmakers");
        let phrases: Vec<&str> = result.matched_keywords.iter().map(|m| m.phrase.as_str()).collect();
        assert_eq!(phrases, vec!["tariff relief"]);
        assert_eq!(result.score, 5.0);
        assert!(result.is_rebound);
    }

    #[test]
    fn test_each_phrase_counts_once() {
        let scorer = KeywordScorer::with_defaults();
        let result = scorer.score("lawsuit after lawsuit piles up");
        assert_eq!(result.score, -4.0);
    }

    #[test]
    fn test_mixed_polarity_nets_out() {
        let scorer = KeywordScorer::with_defaults();
        let result = scorer.score("Company beats estimates but faces investigation");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.matched_keywords.len(), 2);
    }

    #[test]
    fn test_importance_assessment() {
        let scorer = KeywordScorer::with_defaults();
        let score = scorer.score("Record revenue and raises guidance, shares gain");
        let importance = scorer.assess_importance(&score);
        assert!(importance.is_important);
        assert_eq!(importance.surge_keywords.len(), 2);
        assert!((importance.expected_surge_percent - 4.5).abs() < 1e-9);

        let calm = scorer.assess_importance(&scorer.score("shares rises slightly higher"));
        assert!(!calm.is_important);
        assert_eq!(calm.expected_surge_percent, 0.0);
    }

    #[test]
    fn test_rescore_fills_news_fields() {
        let scorer = KeywordScorer::with_defaults();
        let item = scorer.rescore(&news("FDA approval for new device"));
        assert_eq!(item.sentiment_score, Some(0.5));
        assert!(item.is_important);
        assert_eq!(item.importance_date, Some(item.published_at.date_naive()));
        assert_eq!(item.expected_surge_percent, Some(2.5));
        assert_eq!(item.surge_keywords, vec!["fda approval".to_string()]);

        let plain = scorer.rescore(&news("Quarterly update scheduled"));
        assert_eq!(plain.sentiment_score, Some(0.0));
        assert!(!plain.is_important);
        assert!(plain.expected_surge_percent.is_none());
    }

    #[test]
    fn test_aggregate_mean_and_counts() {
        let scorer = KeywordScorer::with_defaults();
        let items = vec![
            news("Raises guidance on strong demand"),
            news("Downgrade from broker"),
            news("Company hosts investor day"),
        ];
        let agg = scorer.aggregate(&items);
        assert_eq!(agg.article_count, 3);
        assert_eq!(agg.bullish_count, 1);
        assert_eq!(agg.bearish_count, 1);
        assert!((agg.score - 2.0).abs() < 1e-9); // (8 - 2 + 0) / 3
        assert!((agg.normalized - 0.2).abs() < 1e-9);
        assert_eq!(agg.peak_score, 8.0);
        assert_eq!(agg.top_keywords[0], "raises guidance");
        assert!(!agg.is_rebound);

        assert_eq!(scorer.aggregate(&[]).article_count, 0);
    }

    #[test]
    fn test_priority_matches_respect_exclusions() {
        let scorer = KeywordScorer::with_defaults();

        let hits = scorer.priority_matches("White House announces new tariff on imports");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].direction, Direction::Down);

        assert!(scorer.priority_matches("Tariff relief sends stocks higher").is_empty());
        assert!(scorer.priority_matches("Bank reports steady quarter").is_empty());

        // a bare mention alongside an excluded one still fires
        let hits = scorer.priority_matches("Tariff relief for some, new tariffs for others");
        assert_eq!(hits.len(), 1);

        let hits = scorer.priority_matches("Firm wins major contract");
        assert_eq!(hits[0].direction, Direction::Up);
    }
}
