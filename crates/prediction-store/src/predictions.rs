use analysis_core::{Horizon, Prediction};
use anyhow::Result;

use crate::db::PredictionDb;
use crate::models::*;

const PREDICTION_COLUMNS: &str = r#"
    p.id, i.symbol, p.horizon, p.direction, p.probability, p.confidence_score,
    p.signal_strength, p.current_price, p.previous_close, p.predicted_price,
    p.predicted_low, p.predicted_high, p.expected_pct_move, p.reasoning,
    p.indicators, p.model_version, p.prediction_date, p.target_date, p.is_active
"#;

impl PredictionDb {
    /// Store `prediction` as the single active one for its (symbol, horizon),
    /// retiring the previous one in the same transaction.
    pub async fn activate_prediction(&self, prediction: &Prediction) -> Result<Prediction> {
        let instrument = self.instrument_row(&prediction.symbol).await?;
        let horizon = prediction.horizon.as_str();

        let mut tx = self.pool().begin().await?;

        let retired = sqlx::query(
            "UPDATE predictions SET is_active = 0 WHERE instrument_id = ? AND horizon = ? AND is_active = 1",
        )
        .bind(instrument.id)
        .bind(horizon)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO predictions
            (instrument_id, horizon, direction, label, probability, confidence_score, signal_strength,
             current_price, previous_close, predicted_price, predicted_low, predicted_high,
             expected_pct_move, reasoning, indicators, model_version, prediction_date, target_date, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING id
            "#,
        )
        .bind(instrument.id)
        .bind(horizon)
        .bind(prediction.direction.as_str())
        .bind(prediction.label())
        .bind(prediction.probability)
        .bind(prediction.confidence_score as i64)
        .bind(prediction.signal_strength)
        .bind(prediction.current_price)
        .bind(prediction.previous_close)
        .bind(prediction.predicted_price)
        .bind(prediction.predicted_low)
        .bind(prediction.predicted_high)
        .bind(prediction.expected_pct_move)
        .bind(&prediction.reasoning)
        .bind(serde_json::to_string(&prediction.indicators)?)
        .bind(&prediction.model_version)
        .bind(format_timestamp(prediction.prediction_date))
        .bind(format_date(prediction.target_date))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            symbol = %instrument.symbol,
            horizon,
            id,
            retired,
            "Activated prediction"
        );

        let mut stored = prediction.clone();
        stored.id = Some(id);
        stored.symbol = instrument.symbol;
        stored.is_active = true;
        Ok(stored)
    }

    pub async fn active_prediction(&self, symbol: &str, horizon: Horizon) -> Result<Option<Prediction>> {
        let query = format!(
            r#"
            SELECT {} FROM predictions p
            JOIN instruments i ON i.id = p.instrument_id
            WHERE i.symbol = ? AND p.horizon = ? AND p.is_active = 1
            "#,
            PREDICTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PredictionRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .bind(horizon.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.map(Prediction::try_from).transpose()
    }

    /// Newest first, active and retired alike.
    pub async fn prediction_history(
        &self,
        symbol: &str,
        horizon: Horizon,
        limit: i64,
    ) -> Result<Vec<Prediction>> {
        let query = format!(
            r#"
            SELECT {} FROM predictions p
            JOIN instruments i ON i.id = p.instrument_id
            WHERE i.symbol = ? AND p.horizon = ?
            ORDER BY p.id DESC
            LIMIT ?
            "#,
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&query)
            .bind(symbol.trim().to_uppercase())
            .bind(horizon.as_str())
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Prediction::try_from).collect()
    }
}
