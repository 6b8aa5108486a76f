use analysis_core::session::next_trading_day;
use analysis_core::{AnalysisError, BarInterval, Instrument, NewsItem, PriceBar};
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::PredictionDb;
use crate::models::*;

/// Stored previous_close may differ from the prior bar's close by this much.
pub const PREVIOUS_CLOSE_TOLERANCE: f64 = 0.005;

const BAR_COLUMNS: &str = r#"
    i.symbol, b.price_date, b.bar_interval, b.open, b.high, b.low, b.close,
    b.previous_close, b.volume, b.source
"#;

const NEWS_COLUMNS: &str = r#"
    n.id, i.symbol, n.title, n.description, n.published_at, n.sentiment_score,
    n.is_important, n.importance_date, n.expected_surge_percent, n.surge_keywords
"#;

impl PredictionDb {
    /// Look up an instrument, creating it with defaults on first reference.
    pub async fn get_or_create_instrument(&self, symbol: &str) -> Result<Instrument> {
        Ok(self.instrument_row(symbol).await?.into())
    }

    pub async fn instrument(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row = sqlx::query_as::<_, InstrumentRow>(
            "SELECT id, symbol, name, sector, volatility_multiplier FROM instruments WHERE symbol = ?",
        )
        .bind(symbol.trim().to_uppercase())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(Instrument::from))
    }

    pub async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query_as::<_, InstrumentRow>(
            "SELECT id, symbol, name, sector, volatility_multiplier FROM instruments ORDER BY symbol",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    /// Administrative correction of name, sector or volatility multiplier.
    pub async fn update_instrument(&self, instrument: &Instrument) -> Result<()> {
        if !(instrument.volatility_multiplier > 0.0) {
            return Err(AnalysisError::InvalidData(format!(
                "volatility multiplier for {} must be positive",
                instrument.symbol
            ))
            .into());
        }

        let result = sqlx::query(
            r#"
            UPDATE instruments
            SET name = ?, sector = ?, volatility_multiplier = ?, updated_at = ?
            WHERE symbol = ?
            "#,
        )
        .bind(&instrument.name)
        .bind(&instrument.sector)
        .bind(instrument.volatility_multiplier)
        .bind(Utc::now().to_rfc3339())
        .bind(instrument.symbol.to_uppercase())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Instrument not found: {}", instrument.symbol);
        }
        Ok(())
    }

    pub(crate) async fn instrument_row(&self, symbol: &str) -> Result<InstrumentRow> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AnalysisError::InvalidData("empty symbol".to_string()).into());
        }

        sqlx::query("INSERT OR IGNORE INTO instruments (symbol, name) VALUES (?, ?)")
            .bind(&symbol)
            .bind(&symbol)
            .execute(self.pool())
            .await?;

        let row = sqlx::query_as::<_, InstrumentRow>(
            "SELECT id, symbol, name, sector, volatility_multiplier FROM instruments WHERE symbol = ?",
        )
        .bind(&symbol)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    /// Insert or update a bar.
    ///
    /// When the prior stored bar is the previous trading day, `previous_close`
    /// must match its close and is filled from it when missing. Across a gap
    /// it is kept as supplied. The next session's `previous_close` is then
    /// realigned to this bar's close, which covers backfills and corrections.
    pub async fn upsert_bar(&self, bar: &PriceBar) -> Result<PriceBar> {
        if !(bar.close > 0.0) || bar.high < bar.low {
            return Err(AnalysisError::InvalidData(format!(
                "malformed bar for {} on {}",
                bar.symbol, bar.price_date
            ))
            .into());
        }

        let instrument = self.instrument_row(&bar.symbol).await?;
        let mut tx = self.pool().begin().await?;

        let prior: Option<(String, f64)> = sqlx::query_as(
            r#"
            SELECT price_date, close FROM price_bars
            WHERE instrument_id = ? AND bar_interval = ? AND price_date < ?
            ORDER BY price_date DESC
            LIMIT 1
            "#,
        )
        .bind(instrument.id)
        .bind(bar.interval.as_str())
        .bind(format_date(bar.price_date))
        .fetch_optional(&mut *tx)
        .await?;

        let mut stored = bar.clone();
        stored.symbol = instrument.symbol.clone();
        if let Some((prior_date, prior_close)) = prior {
            if next_trading_day(parse_date(&prior_date)?) == bar.price_date {
                match bar.previous_close {
                    Some(pc) if (pc - prior_close).abs() > PREVIOUS_CLOSE_TOLERANCE => {
                        return Err(AnalysisError::InvalidData(format!(
                            "{} {}: previous_close {:.4} does not match prior close {:.4}",
                            stored.symbol, bar.price_date, pc, prior_close
                        ))
                        .into());
                    }
                    Some(_) => {}
                    None => stored.previous_close = Some(prior_close),
                }
            } else {
                tracing::debug!(
                    symbol = %stored.symbol,
                    date = %bar.price_date,
                    prior = %prior_date,
                    "Gap before bar, previous_close not derived"
                );
            }
        }

        sqlx::query(
            r#"
            INSERT INTO price_bars
            (instrument_id, price_date, bar_interval, open, high, low, close, previous_close, volume, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(instrument_id, price_date, bar_interval) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                previous_close = excluded.previous_close,
                volume = excluded.volume,
                source = excluded.source
            "#,
        )
        .bind(instrument.id)
        .bind(format_date(stored.price_date))
        .bind(stored.interval.as_str())
        .bind(stored.open)
        .bind(stored.high)
        .bind(stored.low)
        .bind(stored.close)
        .bind(stored.previous_close)
        .bind(stored.volume)
        .bind(&stored.source)
        .execute(&mut *tx)
        .await?;

        let following: Option<(String, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT price_date, previous_close FROM price_bars
            WHERE instrument_id = ? AND bar_interval = ? AND price_date > ?
            ORDER BY price_date
            LIMIT 1
            "#,
        )
        .bind(instrument.id)
        .bind(bar.interval.as_str())
        .bind(format_date(bar.price_date))
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((next_date, next_previous_close)) = following {
            let adjacent = parse_date(&next_date)? == next_trading_day(bar.price_date);
            let stale = next_previous_close
                .map_or(true, |pc| (pc - stored.close).abs() > PREVIOUS_CLOSE_TOLERANCE);
            if adjacent && stale {
                if let Some(pc) = next_previous_close {
                    tracing::warn!(
                        symbol = %stored.symbol,
                        date = %next_date,
                        old = pc,
                        new = stored.close,
                        "Realigning previous_close of following bar"
                    );
                }
                sqlx::query(
                    r#"
                    UPDATE price_bars SET previous_close = ?
                    WHERE instrument_id = ? AND bar_interval = ? AND price_date = ?
                    "#,
                )
                .bind(stored.close)
                .bind(instrument.id)
                .bind(bar.interval.as_str())
                .bind(&next_date)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(stored)
    }

    /// Most recent `lookback` bars, oldest first.
    pub async fn price_history(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback: usize,
    ) -> Result<Vec<PriceBar>> {
        let query = format!(
            r#"
            SELECT {} FROM price_bars b
            JOIN instruments i ON i.id = b.instrument_id
            WHERE i.symbol = ? AND b.bar_interval = ?
            ORDER BY b.price_date DESC
            LIMIT ?
            "#,
            BAR_COLUMNS
        );
        let rows = sqlx::query_as::<_, PriceBarRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .bind(interval.as_str())
            .bind(lookback as i64)
            .fetch_all(self.pool())
            .await?;

        let mut bars = rows
            .into_iter()
            .map(PriceBar::try_from)
            .collect::<Result<Vec<_>>>()?;
        bars.reverse();
        Ok(bars)
    }

    /// Store a news item once; re-ingesting the same headline returns the existing id.
    pub async fn insert_news(&self, item: &NewsItem) -> Result<i64> {
        let instrument = self.instrument_row(&item.symbol).await?;
        let published_at = format_timestamp(item.published_at);

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO news_items
            (instrument_id, title, description, published_at, sentiment_score, is_important,
             importance_date, expected_surge_percent, surge_keywords)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(instrument.id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&published_at)
        .bind(item.sentiment_score)
        .bind(item.is_important)
        .bind(item.importance_date.map(format_date))
        .bind(item.expected_surge_percent)
        .bind(serde_json::to_string(&item.surge_keywords)?)
        .execute(self.pool())
        .await?;

        let (id,): (i64,) = sqlx::query_as(
            "SELECT id FROM news_items WHERE instrument_id = ? AND title = ? AND published_at = ?",
        )
        .bind(instrument.id)
        .bind(&item.title)
        .bind(&published_at)
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Persist the scoring fields of an already stored item.
    pub async fn update_news_scores(&self, item: &NewsItem) -> Result<()> {
        let id = item
            .id
            .ok_or_else(|| anyhow::anyhow!("News item has no id: {}", item.title))?;

        sqlx::query(
            r#"
            UPDATE news_items
            SET sentiment_score = ?, is_important = ?, importance_date = ?,
                expected_surge_percent = ?, surge_keywords = ?
            WHERE id = ?
            "#,
        )
        .bind(item.sentiment_score)
        .bind(item.is_important)
        .bind(item.importance_date.map(format_date))
        .bind(item.expected_surge_percent)
        .bind(serde_json::to_string(&item.surge_keywords)?)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// News published at or after `since`, newest first.
    pub async fn recent_news(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<NewsItem>> {
        let query = format!(
            r#"
            SELECT {} FROM news_items n
            JOIN instruments i ON i.id = n.instrument_id
            WHERE i.symbol = ? AND n.published_at >= ?
            ORDER BY n.published_at DESC
            "#,
            NEWS_COLUMNS
        );
        let rows = sqlx::query_as::<_, NewsRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .bind(format_timestamp(since))
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(NewsItem::try_from).collect()
    }

    pub async fn all_news(&self, symbol: &str) -> Result<Vec<NewsItem>> {
        let query = format!(
            r#"
            SELECT {} FROM news_items n
            JOIN instruments i ON i.id = n.instrument_id
            WHERE i.symbol = ?
            ORDER BY n.published_at
            "#,
            NEWS_COLUMNS
        );
        let rows = sqlx::query_as::<_, NewsRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(NewsItem::try_from).collect()
    }
}
