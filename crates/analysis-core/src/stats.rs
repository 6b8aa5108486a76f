//! Numeric helpers shared by the indicator, sentiment and aggregation crates.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Compute sample standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Population standard deviation (divides by n), as used by Bollinger Bands.
pub fn population_std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

pub fn percent_change(from: f64, to: f64) -> f64 {
    if from.abs() < f64::EPSILON {
        return 0.0;
    }
    (to - from) / from * 100.0
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Piecewise-linear interpolation over `points` sorted by x.
/// Values outside the curve clamp to the end points.
pub fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x >= x0 && x <= x1 {
            if (x1 - x0).abs() < f64::EPSILON {
                return y0;
            }
            return y0 + (x - x0) / (x1 - x0) * (y1 - y0);
        }
    }
    last.1
}

/// Round a price to whole cents, half away from zero.
pub fn round_cents(price: f64) -> f64 {
    Decimal::from_f64(price)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(price)
}

/// Round to `dp` decimal places for display fields.
pub fn round_to(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_dev_sample_vs_population() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std_dev(&data) - 2.0).abs() < 1e-9);
        assert!(std_dev(&data) > population_std_dev(&data));
        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_interpolate_clamps_and_blends() {
        let curve = [(0.1, 0.5), (0.3, 1.2), (0.5, 2.0)];
        assert_eq!(interpolate(&curve, 0.0), 0.5);
        assert_eq!(interpolate(&curve, 0.9), 2.0);
        assert!((interpolate(&curve, 0.4) - 1.6).abs() < 1e-9);
        assert_eq!(interpolate(&[], 0.4), 0.0);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(5.0) > 0.99);
        assert!(sigmoid(-5.0) < 0.01);
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(105.0), 105.0);
        assert_eq!(round_cents(100.0 * 1.0123), 101.23);
        assert_eq!(round_to(1.23456, 3), 1.235);
    }
}
