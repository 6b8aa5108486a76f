//! Keyword-table news sentiment: scoring, rebound phrasing, importance and
//! the priority keywords that can force a prediction's direction.

pub mod matcher;
pub mod scorer;
pub mod tables;

pub use scorer::{
    Importance, KeywordMatch, KeywordScore, KeywordScorer, NewsSentiment, MAX_SCORE, SURGE_WEIGHT,
};
pub use tables::{KeywordTables, OverrideClass, PriorityKeyword, PriorityKeywords, Tier, TierSet};
