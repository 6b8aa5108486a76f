use analysis_core::session::is_session_closed;
use analysis_core::stats::{percent_change, round_to};
use analysis_core::{AnalysisError, RealizedOutcome, ScenarioBatch, ScenarioTimeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Index into the batch's scenarios; None when no band held the close
    pub winner_index: Option<usize>,
    pub actual_close_price: f64,
    pub actual_change_percent: f64,
    pub resolved_at: DateTime<Utc>,
}

/// Price the realized change is measured from.
///
/// Intraday sets use the session's realized open. Otherwise the reference
/// stored at generation applies, then the scenarios' own anchor.
pub fn reference_price(batch: &ScenarioBatch, outcome: &RealizedOutcome) -> Option<f64> {
    let realized_open = match batch.timeframe {
        ScenarioTimeframe::Today => outcome.open,
        ScenarioTimeframe::Tomorrow => None,
    };
    realized_open
        .into_iter()
        .chain(batch.reference_price)
        .chain(batch.scenarios.first().map(|s| s.current_price))
        .find(|p| *p > 0.0 && p.is_finite())
}

/// Flag the best-fitting scenario once the session has closed.
///
/// Among the bands that contain the realized change, the narrowest wins, then
/// the most confident, then the earliest. Actuals are written to every
/// scenario. A batch that was already resolved is left untouched.
pub fn resolve_batch(
    batch: &mut ScenarioBatch,
    outcome: RealizedOutcome,
    now: DateTime<Utc>,
) -> Result<Resolution, AnalysisError> {
    if batch.is_frozen() {
        return Err(AnalysisError::AlreadyResolved(format!(
            "{} {} scenarios for {}",
            batch.symbol, batch.timeframe, batch.scenario_date
        )));
    }
    if !is_session_closed(batch.scenario_date, now) {
        return Err(AnalysisError::NotYetClosed(format!(
            "session {} has not closed",
            batch.scenario_date
        )));
    }
    if !(outcome.close > 0.0) || !outcome.close.is_finite() {
        return Err(AnalysisError::InvalidData(format!(
            "realized close {} for {}",
            outcome.close, batch.symbol
        )));
    }

    let reference = reference_price(batch, &outcome).ok_or_else(|| {
        AnalysisError::InvalidData(format!(
            "no reference price for {} {} scenarios",
            batch.symbol, batch.timeframe
        ))
    })?;
    let actual_change_percent = round_to(percent_change(reference, outcome.close), 4);

    let winner_index = batch
        .scenarios
        .iter()
        .enumerate()
        .filter(|(_, scenario)| scenario.contains(actual_change_percent))
        .min_by(|(ia, a), (ib, b)| {
            a.band_width()
                .partial_cmp(&b.band_width())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.confidence_level
                        .partial_cmp(&a.confidence_level)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(ia.cmp(ib))
        })
        .map(|(i, _)| i);

    for (i, scenario) in batch.scenarios.iter_mut().enumerate() {
        scenario.actual_close_price = Some(outcome.close);
        scenario.actual_change_percent = Some(actual_change_percent);
        scenario.is_winner = Some(i) == winner_index;
    }
    batch.resolved_at = Some(now);

    if winner_index.is_none() {
        tracing::info!(
            symbol = %batch.symbol,
            change = actual_change_percent,
            reference,
            "No scenario band held the realized close"
        );
    }

    Ok(Resolution {
        winner_index,
        actual_close_price: outcome.close,
        actual_change_percent,
        resolved_at: now,
    })
}
