//! Keyword and priority tables.
//!
//! Tables are immutable once built. A new version is rolled out by loading a
//! fresh set and swapping the scorer that owns it.

use analysis_core::{AnalysisError, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Mild,
    Strong,
    Extreme,
}

impl Tier {
    /// Allowed absolute weight range for the tier.
    pub fn weight_range(&self) -> (f64, f64) {
        match self {
            Tier::Mild => (1.0, 2.0),
            Tier::Strong => (3.0, 5.0),
            Tier::Extreme => (6.0, 9.0),
        }
    }
}

/// Phrase -> weight maps for one polarity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierSet {
    #[serde(default)]
    pub mild: BTreeMap<String, f64>,
    #[serde(default)]
    pub strong: BTreeMap<String, f64>,
    #[serde(default)]
    pub extreme: BTreeMap<String, f64>,
}

impl TierSet {
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &str, f64)> {
        self.mild
            .iter()
            .map(|(p, w)| (Tier::Mild, p.as_str(), *w))
            .chain(self.strong.iter().map(|(p, w)| (Tier::Strong, p.as_str(), *w)))
            .chain(self.extreme.iter().map(|(p, w)| (Tier::Extreme, p.as_str(), *w)))
    }

    fn from_slices(mild: &[(&str, f64)], strong: &[(&str, f64)], extreme: &[(&str, f64)]) -> Self {
        let to_map = |items: &[(&str, f64)]| items.iter().map(|(p, w)| (p.to_string(), *w)).collect();
        Self {
            mild: to_map(mild),
            strong: to_map(strong),
            extreme: to_map(extreme),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideClass {
    TradePolicy,
    Regulatory,
    Legal,
    Earnings,
    Contract,
}

impl OverrideClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideClass::TradePolicy => "trade_policy",
            OverrideClass::Regulatory => "regulatory",
            OverrideClass::Legal => "legal",
            OverrideClass::Earnings => "earnings",
            OverrideClass::Contract => "contract",
        }
    }
}

/// A keyword that forces the prediction direction when seen in session news.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityKeyword {
    pub phrase: String,
    pub direction: Direction,
    /// Confidence (0-100) the override carries
    pub confidence: f64,
    pub class: OverrideClass,
    /// Longer phrases that neutralize an occurrence they cover ("tariff relief")
    #[serde(default)]
    pub exclusions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityKeywords {
    pub version: String,
    pub keywords: Vec<PriorityKeyword>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTables {
    pub version: String,
    pub bullish: TierSet,
    pub bearish: TierSet,
    /// Phrases that flag a news item as a rebound catalyst
    #[serde(default)]
    pub rebound_phrases: Vec<String>,
    pub priority: PriorityKeywords,
}

impl KeywordTables {
    pub fn from_json(raw: &str) -> Result<Self, AnalysisError> {
        let mut tables: KeywordTables = serde_json::from_str(raw)
            .map_err(|e| AnalysisError::InvalidData(format!("keyword tables: {}", e)))?;
        tables.normalize();
        tables.validate()?;
        Ok(tables)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::InvalidData(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Lower-case every phrase so matching runs against lower-cased text.
    fn normalize(&mut self) {
        for set in [&mut self.bullish, &mut self.bearish] {
            for map in [&mut set.mild, &mut set.strong, &mut set.extreme] {
                *map = std::mem::take(map)
                    .into_iter()
                    .map(|(p, w)| (p.trim().to_lowercase(), w))
                    .collect();
            }
        }
        for phrase in &mut self.rebound_phrases {
            *phrase = phrase.trim().to_lowercase();
        }
        for kw in &mut self.priority.keywords {
            kw.phrase = kw.phrase.trim().to_lowercase();
            for ex in &mut kw.exclusions {
                *ex = ex.trim().to_lowercase();
            }
        }
    }

    /// Bullish weights are positive and bearish negative, each inside its tier range.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for (polarity, set, sign) in [("bullish", &self.bullish, 1.0), ("bearish", &self.bearish, -1.0)] {
            for (tier, phrase, weight) in set.iter() {
                if phrase.is_empty() {
                    return Err(AnalysisError::InvalidData(format!("empty {} phrase", polarity)));
                }
                let (lo, hi) = tier.weight_range();
                let abs = weight * sign;
                if abs < lo || abs > hi {
                    return Err(AnalysisError::InvalidData(format!(
                        "{} {:?} phrase '{}' has weight {} outside [{}, {}]",
                        polarity,
                        tier,
                        phrase,
                        weight,
                        lo * sign,
                        hi * sign
                    )));
                }
            }
        }
        for kw in &self.priority.keywords {
            if kw.phrase.is_empty() || !(0.0..=100.0).contains(&kw.confidence) {
                return Err(AnalysisError::InvalidData(format!(
                    "priority keyword '{}' is invalid",
                    kw.phrase
                )));
            }
        }
        Ok(())
    }
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self {
            version: "builtin-1".to_string(),
            bullish: TierSet::from_slices(BULLISH_MILD, BULLISH_STRONG, BULLISH_EXTREME),
            bearish: TierSet::from_slices(BEARISH_MILD, BEARISH_STRONG, BEARISH_EXTREME),
            rebound_phrases: REBOUND_PHRASES.iter().map(|p| p.to_string()).collect(),
            priority: PriorityKeywords::default(),
        }
    }
}

impl Default for PriorityKeywords {
    fn default() -> Self {
        let kw = |phrase: &str, direction, confidence, class, exclusions: &[&str]| PriorityKeyword {
            phrase: phrase.to_string(),
            direction,
            confidence,
            class,
            exclusions: exclusions.iter().map(|e| e.to_string()).collect(),
        };
        let tariff_exclusions = [
            "tariff relief",
            "tariffs paused",
            "tariff pause",
            "tariff exemption",
            "tariff exemptions",
            "dismisses tariff",
            "dismisses tariffs",
        ];
        Self {
            version: "builtin-1".to_string(),
            keywords: vec![
                kw("tariff", Direction::Down, 80.0, OverrideClass::TradePolicy, &tariff_exclusions),
                kw("sanctions", Direction::Down, 75.0, OverrideClass::TradePolicy, &["sanctions lifted"]),
                kw("ban", Direction::Down, 80.0, OverrideClass::Regulatory, &["ban lifted"]),
                kw("banned", Direction::Down, 80.0, OverrideClass::Regulatory, &[]),
                kw("lawsuit", Direction::Down, 70.0, OverrideClass::Legal, &["lawsuit dismissed"]),
                kw("beat earnings", Direction::Up, 75.0, OverrideClass::Earnings, &[]),
                kw("beats earnings", Direction::Up, 75.0, OverrideClass::Earnings, &[]),
                kw("major contract", Direction::Up, 75.0, OverrideClass::Contract, &[]),
            ],
        }
    }
}

const BULLISH_MILD: &[(&str, f64)] = &[
    ("gains", 1.0),
    ("rises", 1.0),
    ("higher", 1.0),
    ("optimistic", 1.5),
    ("rally", 1.5),
    ("partnership", 1.5),
    ("upgrade", 2.0),
    ("outperform", 2.0),
    ("buyback", 2.0),
    ("dividend increase", 2.0),
    ("rebound", 2.0),
    ("recovery", 2.0),
];

const BULLISH_STRONG: &[(&str, f64)] = &[
    ("acquisition", 3.0),
    ("strong demand", 3.0),
    ("price target raised", 3.0),
    ("beat earnings", 4.0),
    ("beats earnings", 4.0),
    ("beats estimates", 4.0),
    ("record revenue", 4.0),
    ("major contract", 4.0),
    ("trade deal", 4.0),
    ("raises guidance", 5.0),
    ("fda approval", 5.0),
    ("tariff relief", 5.0),
];

const BULLISH_EXTREME: &[(&str, f64)] = &[
    ("trump dismisses", 6.0),
    ("breakthrough", 6.0),
    ("all-time high", 6.0),
    ("short squeeze", 6.0),
    ("tariffs paused", 7.0),
    ("tariff exemption", 7.0),
    ("buyout offer", 8.0),
    ("takeover bid", 8.0),
];

const BEARISH_MILD: &[(&str, f64)] = &[
    ("falls", -1.0),
    ("lower", -1.0),
    ("delay", -1.0),
    ("concern", -1.5),
    ("weak", -1.5),
    ("downgrade", -2.0),
    ("underperform", -2.0),
    ("selloff", -2.0),
];

const BEARISH_STRONG: &[(&str, f64)] = &[
    ("recall", -3.0),
    ("layoffs", -3.0),
    ("tariff", -4.0),
    ("ban", -4.0),
    ("lawsuit", -4.0),
    ("investigation", -4.0),
    ("misses estimates", -4.0),
    ("missed earnings", -4.0),
    ("cuts guidance", -5.0),
    ("export controls", -5.0),
];

const BEARISH_EXTREME: &[(&str, f64)] = &[
    ("crash", -6.0),
    ("default", -6.0),
    ("tariffs imposed", -7.0),
    ("fraud", -8.0),
    ("sec charges", -8.0),
    ("delisting", -8.0),
    ("bankruptcy", -9.0),
];

const REBOUND_PHRASES: &[&str] = &[
    "rebound",
    "recovery",
    "bounce back",
    "tariff relief",
    "tariffs paused",
    "trump dismisses",
    "oversold",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_validate() {
        let tables = KeywordTables::default();
        assert!(tables.validate().is_ok());
        assert!(tables.priority.keywords.iter().any(|k| k.phrase == "tariff"));
    }

    #[test]
    fn test_from_json_normalizes_and_validates() {
        let raw = r#"{
            "version": "test-2",
            "bullish": { "strong": { "Record Revenue": 4.0 } },
            "bearish": { "extreme": { "Bankruptcy": -9.0 } },
            "rebound_phrases": ["Rebound"],
            "priority": { "version": "p-1", "keywords": [
                { "phrase": "Tariff", "direction": "down", "confidence": 80, "class": "trade_policy" }
            ] }
        }"#;
        let tables = KeywordTables::from_json(raw).unwrap();
        assert_eq!(tables.version, "test-2");
        assert_eq!(tables.bullish.strong.get("record revenue"), Some(&4.0));
        assert_eq!(tables.rebound_phrases, vec!["rebound".to_string()]);
        assert_eq!(tables.priority.keywords[0].phrase, "tariff");
        assert!(tables.priority.keywords[0].exclusions.is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_tier_weight() {
        let raw = r#"{
            "version": "bad",
            "bullish": { "mild": { "gains": 4.0 } },
            "bearish": {},
            "priority": { "version": "p", "keywords": [] }
        }"#;
        assert!(matches!(
            KeywordTables::from_json(raw),
            Err(AnalysisError::InvalidData(_))
        ));

        let raw = r#"{
            "version": "bad-sign",
            "bullish": {},
            "bearish": { "strong": { "lawsuit": 4.0 } },
            "priority": { "version": "p", "keywords": [] }
        }"#;
        assert!(KeywordTables::from_json(raw).is_err());
    }
}
