use analysis_core::{AnalysisError, Scenario, ScenarioBatch, ScenarioTimeframe};
use anyhow::Result;
use chrono::NaiveDate;

use crate::db::PredictionDb;
use crate::models::*;

const BATCH_COLUMNS: &str = r#"
    sb.id, i.symbol, sb.timeframe, sb.scenario_date, sb.generated_at, sb.resolved_at,
    sb.reference_price
"#;

const SCENARIO_COLUMNS: &str = r#"
    id, batch_id, position, scenario_type, expected_change_percent, min_change_percent,
    max_change_percent, target_price, current_price, confidence_level, probability,
    trigger_indicators, suggested_action, is_winner, actual_close_price,
    actual_change_percent, votes
"#;

impl PredictionDb {
    /// Insert a batch and its scenarios in one transaction. Returns it with ids.
    pub async fn save_batch(&self, batch: &ScenarioBatch) -> Result<ScenarioBatch> {
        let instrument = self.instrument_row(&batch.symbol).await?;
        let mut tx = self.pool().begin().await?;

        let (batch_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scenario_batches
            (instrument_id, timeframe, scenario_date, generated_at, resolved_at, reference_price)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(instrument.id)
        .bind(batch.timeframe.as_str())
        .bind(format_date(batch.scenario_date))
        .bind(format_timestamp(batch.generated_at))
        .bind(batch.resolved_at.map(format_timestamp))
        .bind(batch.reference_price)
        .fetch_one(&mut *tx)
        .await?;

        let mut saved = batch.clone();
        saved.id = Some(batch_id);
        saved.symbol = instrument.symbol;

        for (position, scenario) in saved.scenarios.iter_mut().enumerate() {
            let (id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO scenarios
                (batch_id, position, scenario_type, expected_change_percent, min_change_percent,
                 max_change_percent, target_price, current_price, confidence_level, probability,
                 trigger_indicators, suggested_action, is_winner, actual_close_price,
                 actual_change_percent, votes)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(batch_id)
            .bind(position as i64)
            .bind(scenario.scenario_type.as_str())
            .bind(scenario.expected_change_percent)
            .bind(scenario.min_change_percent)
            .bind(scenario.max_change_percent)
            .bind(scenario.target_price)
            .bind(scenario.current_price)
            .bind(scenario.confidence_level)
            .bind(scenario.probability)
            .bind(serde_json::to_string(&scenario.trigger_indicators)?)
            .bind(&scenario.suggested_action)
            .bind(scenario.is_winner)
            .bind(scenario.actual_close_price)
            .bind(scenario.actual_change_percent)
            .bind(scenario.votes)
            .fetch_one(&mut *tx)
            .await?;
            scenario.id = Some(id);
        }

        tx.commit().await?;
        Ok(saved)
    }

    pub async fn batch(&self, batch_id: i64) -> Result<Option<ScenarioBatch>> {
        let query = format!(
            r#"
            SELECT {} FROM scenario_batches sb
            JOIN instruments i ON i.id = sb.instrument_id
            WHERE sb.id = ?
            "#,
            BATCH_COLUMNS
        );
        let row = sqlx::query_as::<_, ScenarioBatchRow>(&query)
            .bind(batch_id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Newest batch for the session, if any.
    pub async fn latest_batch(
        &self,
        symbol: &str,
        timeframe: ScenarioTimeframe,
        scenario_date: NaiveDate,
    ) -> Result<Option<ScenarioBatch>> {
        let query = format!(
            r#"
            SELECT {} FROM scenario_batches sb
            JOIN instruments i ON i.id = sb.instrument_id
            WHERE i.symbol = ? AND sb.timeframe = ? AND sb.scenario_date = ?
            ORDER BY sb.id DESC
            LIMIT 1
            "#,
            BATCH_COLUMNS
        );
        let row = sqlx::query_as::<_, ScenarioBatchRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .bind(timeframe.as_str())
            .bind(format_date(scenario_date))
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Latest unresolved batch per (symbol, timeframe, date) whose date is on or before `through`.
    pub async fn unresolved_batches(&self, through: NaiveDate) -> Result<Vec<ScenarioBatch>> {
        let query = format!(
            r#"
            SELECT {} FROM scenario_batches sb
            JOIN instruments i ON i.id = sb.instrument_id
            WHERE sb.resolved_at IS NULL AND sb.scenario_date <= ?
              AND sb.id = (
                SELECT MAX(latest.id) FROM scenario_batches latest
                WHERE latest.instrument_id = sb.instrument_id
                  AND latest.timeframe = sb.timeframe
                  AND latest.scenario_date = sb.scenario_date
              )
            ORDER BY sb.scenario_date, i.symbol
            "#,
            BATCH_COLUMNS
        );
        let rows = sqlx::query_as::<_, ScenarioBatchRow>(&query)
            .bind(format_date(through))
            .fetch_all(self.pool())
            .await?;

        let mut batches = Vec::with_capacity(rows.len());
        for row in rows {
            batches.push(self.hydrate(row).await?);
        }
        Ok(batches)
    }

    /// Write a resolution computed in memory. Guarded so only the first
    /// writer for a batch succeeds; later ones get `AlreadyResolved`.
    pub async fn record_resolution(&self, batch: &ScenarioBatch) -> Result<()> {
        let batch_id = batch
            .id
            .ok_or_else(|| anyhow::anyhow!("Scenario batch has no id"))?;
        let resolved_at = batch
            .resolved_at
            .ok_or_else(|| anyhow::anyhow!("Scenario batch {} is not resolved", batch_id))?;

        let mut tx = self.pool().begin().await?;

        let claimed = sqlx::query(
            "UPDATE scenario_batches SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(format_timestamp(resolved_at))
        .bind(batch_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            return Err(AnalysisError::AlreadyResolved(format!("scenario batch {}", batch_id)).into());
        }

        for scenario in &batch.scenarios {
            let Some(id) = scenario.id else {
                anyhow::bail!("Scenario in batch {} has no id", batch_id);
            };
            sqlx::query(
                r#"
                UPDATE scenarios
                SET is_winner = ?, actual_close_price = ?, actual_change_percent = ?
                WHERE id = ? AND batch_id = ?
                "#,
            )
            .bind(scenario.is_winner)
            .bind(scenario.actual_close_price)
            .bind(scenario.actual_change_percent)
            .bind(id)
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns the new vote count.
    pub async fn vote_scenario(&self, scenario_id: i64) -> Result<i64> {
        let votes: Option<(i64,)> =
            sqlx::query_as("UPDATE scenarios SET votes = votes + 1 WHERE id = ? RETURNING votes")
                .bind(scenario_id)
                .fetch_optional(self.pool())
                .await?;

        votes
            .map(|(v,)| v)
            .ok_or_else(|| anyhow::anyhow!("Scenario not found: {}", scenario_id))
    }

    async fn hydrate(&self, row: ScenarioBatchRow) -> Result<ScenarioBatch> {
        let query = format!(
            "SELECT {} FROM scenarios WHERE batch_id = ? ORDER BY position",
            SCENARIO_COLUMNS
        );
        let scenarios = sqlx::query_as::<_, ScenarioRow>(&query)
            .bind(row.id)
            .fetch_all(self.pool())
            .await?
            .into_iter()
            .map(Scenario::try_from)
            .collect::<Result<Vec<_>>>()?;

        row.into_batch(scenarios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::ScenarioType;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    async fn setup_db() -> PredictionDb {
        PredictionDb::new("sqlite::memory:").await.unwrap()
    }

    fn scenario(kind: ScenarioType, min: f64, max: f64) -> Scenario {
        Scenario {
            id: None,
            scenario_type: kind,
            expected_change_percent: (min + max) / 2.0,
            min_change_percent: min,
            max_change_percent: max,
            target_price: 100.0,
            current_price: 100.0,
            confidence_level: 30.0,
            probability: 0.5,
            trigger_indicators: json!({ "triggers": ["MACD bullish"] }),
            suggested_action: "Hold".into(),
            is_winner: false,
            actual_close_price: None,
            actual_change_percent: None,
            votes: 0,
        }
    }

    fn batch(day: u32) -> ScenarioBatch {
        ScenarioBatch {
            id: None,
            symbol: "nvda".into(),
            timeframe: ScenarioTimeframe::Today,
            scenario_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            generated_at: Utc.with_ymd_and_hms(2024, 6, day, 14, 0, 0).unwrap(),
            resolved_at: None,
            reference_price: Some(100.0),
            scenarios: vec![
                scenario(ScenarioType::Bullish, 0.5, 3.0),
                scenario(ScenarioType::Bearish, -3.0, -0.5),
            ],
        }
    }

    fn resolve(mut b: ScenarioBatch, winner: usize) -> ScenarioBatch {
        for (i, s) in b.scenarios.iter_mut().enumerate() {
            s.is_winner = i == winner;
            s.actual_close_price = Some(101.0);
            s.actual_change_percent = Some(1.0);
        }
        b.resolved_at = Some(Utc.with_ymd_and_hms(2024, 6, 4, 20, 30, 0).unwrap());
        b
    }

    #[tokio::test]
    async fn test_save_and_load_batch() {
        let db = setup_db().await;
        let saved = db.save_batch(&batch(4)).await.unwrap();
        assert!(saved.id.is_some());
        assert!(saved.scenarios.iter().all(|s| s.id.is_some()));

        let date = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        let loaded = db
            .latest_batch("NVDA", ScenarioTimeframe::Today, date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.symbol, "NVDA");
        assert_eq!(loaded.reference_price, Some(100.0));
        assert_eq!(loaded.scenarios[0].scenario_type, ScenarioType::Bullish);
        assert_eq!(loaded.scenarios[0].trigger_indicators["triggers"][0], "MACD bullish");
        assert!(db
            .latest_batch("NVDA", ScenarioTimeframe::Tomorrow, date)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resolution_is_compare_and_set() {
        let db = setup_db().await;
        let saved = db.save_batch(&batch(4)).await.unwrap();

        db.record_resolution(&resolve(saved.clone(), 0)).await.unwrap();
        let err = db.record_resolution(&resolve(saved.clone(), 1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::AlreadyResolved(_))
        ));

        let stored = db.batch(saved.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.winner().unwrap().scenario_type, ScenarioType::Bullish);
        assert_eq!(stored.scenarios.iter().filter(|s| s.is_winner).count(), 1);
        assert!(stored.resolved_at.is_some());
        assert!(stored.scenarios.iter().all(|s| s.actual_close_price == Some(101.0)));
    }

    #[tokio::test]
    async fn test_unresolved_batches_skip_superseded_and_resolved() {
        let db = setup_db().await;
        db.save_batch(&batch(3)).await.unwrap();
        let newer = db.save_batch(&batch(3)).await.unwrap();
        let done = db.save_batch(&batch(4)).await.unwrap();
        db.record_resolution(&resolve(done, 0)).await.unwrap();
        db.save_batch(&batch(5)).await.unwrap();

        let pending = db
            .unresolved_batches(NaiveDate::from_ymd_opt(2024, 6, 4).unwrap())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_votes_increment() {
        let db = setup_db().await;
        let saved = db.save_batch(&batch(4)).await.unwrap();
        let id = saved.scenarios[1].id.unwrap();
        assert_eq!(db.vote_scenario(id).await.unwrap(), 1);
        assert_eq!(db.vote_scenario(id).await.unwrap(), 2);
        assert!(db.vote_scenario(9_999).await.is_err());
    }
}
