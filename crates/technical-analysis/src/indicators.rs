use analysis_core::stats::{mean, population_std_dev, std_dev};
use analysis_core::PriceBar;
use serde::{Deserialize, Serialize};

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values.
/// Element 0 of the result lines up with `data[period - 1]`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);

    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    result.push(seed);

    for &value in &data[period..] {
        let prev = result[result.len() - 1];
        result.push((value - prev) * multiplier + prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
/// The first value covers the first `period` changes.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for pair in data.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // flat series is neutral, pure gains pin to 100
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiSignal {
    Oversold,
    Neutral,
    Overbought,
}

pub fn classify_rsi(value: f64) -> RsiSignal {
    if value < 30.0 {
        RsiSignal::Oversold
    } else if value > 70.0 {
        RsiSignal::Overbought
    } else {
        RsiSignal::Neutral
    }
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    let empty = MacdResult { macd_line: vec![], signal_line: vec![], histogram: vec![] };
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || slow_period < fast_period {
        return empty;
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);
    if ema_slow.is_empty() {
        return empty;
    }

    let offset = slow_period - fast_period;
    let macd_line: Vec<f64> = (offset..ema_fast.len())
        .map(|i| ema_fast[i] - ema_slow[i - offset])
        .collect();

    let signal_line = ema(&macd_line, signal_period);

    let hist_offset = macd_line.len().saturating_sub(signal_line.len());
    let histogram = signal_line
        .iter()
        .enumerate()
        .map(|(i, signal)| macd_line[i + hist_offset] - signal)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdState {
    Bullish,
    Bearish,
    Neutral,
}

/// Bullish when MACD sits above its signal with a rising histogram, bearish on the mirror.
pub fn macd_state(result: &MacdResult) -> MacdState {
    let (Some(&macd), Some(&signal)) = (result.macd_line.last(), result.signal_line.last()) else {
        return MacdState::Neutral;
    };
    let n = result.histogram.len();
    if n < 2 {
        return MacdState::Neutral;
    }
    let rising = result.histogram[n - 1] > result.histogram[n - 2];
    let falling = result.histogram[n - 1] < result.histogram[n - 2];

    if macd > signal && rising {
        MacdState::Bullish
    } else if macd < signal && falling {
        MacdState::Bearish
    } else {
        MacdState::Neutral
    }
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev_mult: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands { upper: vec![], middle: vec![], lower: vec![] };
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for (i, mean) in middle.iter().enumerate() {
        let std = population_std_dev(&data[i..i + period]);
        upper.push(mean + std_dev_mult * std);
        lower.push(mean - std_dev_mult * std);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BollingerPosition {
    Oversold,
    Middle,
    Overbought,
}

/// %B of `price` against the latest band. Flat bands read as 0.5.
pub fn percent_b(bands: &BollingerBands, price: f64) -> Option<f64> {
    let upper = *bands.upper.last()?;
    let lower = *bands.lower.last()?;
    let width = upper - lower;
    if width <= f64::EPSILON {
        return Some(0.5);
    }
    Some((price - lower) / width)
}

pub fn classify_percent_b(pct_b: f64) -> BollingerPosition {
    if pct_b <= 0.1 {
        BollingerPosition::Oversold
    } else if pct_b >= 0.9 {
        BollingerPosition::Overbought
    } else {
        BollingerPosition::Middle
    }
}

/// Average True Range
pub fn atr(bars: &[PriceBar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|pair| {
            let (prev, bar) = (&pair[0], &pair[1]);
            let high_low = bar.high - bar.low;
            let high_close = (bar.high - prev.close).abs();
            let low_close = (bar.low - prev.close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect();

    let mut atr_values = Vec::with_capacity(true_ranges.len() - period + 1);
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    atr_values.push(atr);

    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(atr);
    }

    atr_values
}

/// Percent change of the last value over `period` bars.
pub fn momentum(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() <= period {
        return None;
    }
    let last = data[data.len() - 1];
    let base = data[data.len() - 1 - period];
    if base.abs() < f64::EPSILON {
        return None;
    }
    Some((last - base) / base * 100.0)
}

/// Day-over-day percent returns.
pub fn daily_returns(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .filter(|pair| pair[0].abs() > f64::EPSILON)
        .map(|pair| (pair[1] - pair[0]) / pair[0] * 100.0)
        .collect()
}

/// Sample standard deviation of percent returns over the last `window` returns.
pub fn volatility(data: &[f64], window: usize) -> Option<f64> {
    let returns = daily_returns(data);
    if window < 2 || returns.len() < window {
        return None;
    }
    Some(std_dev(&returns[returns.len() - window..]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

pub fn classify_volatility(daily_std_pct: f64) -> VolatilityLevel {
    if daily_std_pct < 1.5 {
        VolatilityLevel::Low
    } else if daily_std_pct < 3.0 {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::High
    }
}

/// Latest volume relative to the mean of the `window` volumes before it.
pub fn volume_ratio(volumes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || volumes.len() < window + 1 {
        return None;
    }
    let last = volumes[volumes.len() - 1];
    let prior = &volumes[volumes.len() - 1 - window..volumes.len() - 1];
    let avg = mean(prior);
    if avg <= f64::EPSILON {
        return None;
    }
    Some(last / avg)
}

/// A clustered swing level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub touches: usize,
    /// Index (into the analysed bars) of the most recent swing in the cluster
    pub last_touch: usize,
}

impl PriceLevel {
    pub fn is_strong(&self) -> bool {
        self.touches >= STRONG_LEVEL_TOUCHES
    }
}

pub const STRONG_LEVEL_TOUCHES: usize = 3;
pub const LEVEL_CLUSTER_TOLERANCE: f64 = 0.02;

/// Support and resistance levels from clustered swing points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportResistance {
    /// Ranked by touches, then recency
    pub supports: Vec<PriceLevel>,
    pub resistances: Vec<PriceLevel>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
}

pub fn support_resistance(bars: &[PriceBar], lookback: usize) -> SupportResistance {
    if bars.len() < 5 {
        return SupportResistance::default();
    }

    let start = bars.len().saturating_sub(lookback.max(5));
    let recent = &bars[start..];
    let mut swing_highs: Vec<(usize, f64)> = Vec::new();
    let mut swing_lows: Vec<(usize, f64)> = Vec::new();

    // Find swing highs/lows (local extremes with 2-bar confirmation)
    for i in 2..recent.len() - 2 {
        if recent[i].high > recent[i - 1].high
            && recent[i].high > recent[i - 2].high
            && recent[i].high > recent[i + 1].high
            && recent[i].high > recent[i + 2].high
        {
            swing_highs.push((start + i, recent[i].high));
        }
        if recent[i].low < recent[i - 1].low
            && recent[i].low < recent[i - 2].low
            && recent[i].low < recent[i + 1].low
            && recent[i].low < recent[i + 2].low
        {
            swing_lows.push((start + i, recent[i].low));
        }
    }

    let current_price = recent[recent.len() - 1].close;
    let highs = cluster_levels(&swing_highs, LEVEL_CLUSTER_TOLERANCE);
    let lows = cluster_levels(&swing_lows, LEVEL_CLUSTER_TOLERANCE);

    // A broken resistance acts as support and vice versa
    let mut supports: Vec<PriceLevel> = highs
        .iter()
        .chain(lows.iter())
        .filter(|l| l.price < current_price)
        .cloned()
        .collect();
    let mut resistances: Vec<PriceLevel> = highs
        .iter()
        .chain(lows.iter())
        .filter(|l| l.price > current_price)
        .cloned()
        .collect();
    rank_levels(&mut supports);
    rank_levels(&mut resistances);

    let nearest_support = supports.iter().map(|l| l.price).reduce(f64::max);
    let nearest_resistance = resistances.iter().map(|l| l.price).reduce(f64::min);

    SupportResistance {
        supports,
        resistances,
        nearest_support,
        nearest_resistance,
    }
}

/// Greedy clustering of swing prices: a point joins the first cluster whose
/// mean is within `tolerance` (fractional) of it.
fn cluster_levels(points: &[(usize, f64)], tolerance: f64) -> Vec<PriceLevel> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut clusters: Vec<(Vec<f64>, usize)> = Vec::new();
    for (idx, price) in sorted {
        let joined = clusters.iter_mut().find(|(prices, _)| {
            let center = mean(prices);
            center > 0.0 && ((price - center) / center).abs() <= tolerance
        });
        match joined {
            Some((prices, last)) => {
                prices.push(price);
                *last = (*last).max(idx);
            }
            None => clusters.push((vec![price], idx)),
        }
    }

    clusters
        .into_iter()
        .map(|(prices, last_touch)| PriceLevel {
            price: mean(&prices),
            touches: prices.len(),
            last_touch,
        })
        .collect()
}

fn rank_levels(levels: &mut [PriceLevel]) {
    levels.sort_by(|a, b| b.touches.cmp(&a.touches).then(b.last_touch.cmp(&a.last_touch)));
}
