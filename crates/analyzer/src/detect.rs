use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use common::Candle;

use crate::AnalyzerConfig;

/// The resistance scan needs this many candles before the reference low to
/// say anything about structure.
const MIN_PEAK_WINDOW: usize = 5;

/// Fully parameterized detection output.
///
/// All prices are rounded to one decimal at this boundary and nowhere
/// earlier; `entry_price > stop_price` holds for every value returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalLevels {
    pub reference_low: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub reward_ratio: f64,
    pub reference_low_time: DateTime<Utc>,
    pub last_price: f64,
}

/// Evaluate one candle sequence for the accumulation-low / lower-high /
/// gap-retracement structure.
///
/// Pure and deterministic: identical candles and config produce bit-for-bit
/// identical output. Returns `None` both when no structure is present and
/// when a candidate fails a quality gate; callers cannot tell the two apart
/// and must not treat either as an error.
pub fn analyze(candles: &[Candle], cfg: &AnalyzerConfig) -> Option<SignalLevels> {
    if candles.len() < cfg.min_candles {
        return None;
    }

    // Reference low: first index of the minimum low over the whole sequence.
    let (low_idx, low_candle) = candles.iter().enumerate().min_by(|(_, a), (_, b)| {
        a.low.partial_cmp(&b.low).unwrap_or(Ordering::Equal)
    })?;
    let reference_low = low_candle.low;

    // Domain sanity band, strict on both sides.
    if reference_low <= cfg.price_floor || reference_low >= cfg.price_ceiling {
        return None;
    }

    // The structure needs room after the low for the gap to print.
    if candles.len() - 1 - low_idx < cfg.tail_guard {
        return None;
    }

    // Resistance peaks in the window immediately preceding the low,
    // collected newest-first. A peak's high must strictly exceed both
    // neighbours, so only interior window candles qualify.
    let window_start = low_idx.saturating_sub(cfg.lookback);
    let window = &candles[window_start..low_idx];
    if window.len() < MIN_PEAK_WINDOW {
        return None;
    }

    let mut peaks: Vec<f64> = Vec::new();
    for i in (2..window.len() - 1).rev() {
        let h = window[i].high;
        if h > window[i - 1].high && h > window[i + 1].high {
            peaks.push(h);
        }
    }
    // One lower high is noise, not structure.
    if peaks.len() < 2 {
        return None;
    }

    let resistance_1 = peaks[0];
    // Second resistance: first later peak clearing the multiplier, else the
    // next peak outright. Never resistance_1 itself.
    let resistance_2 = peaks[1..]
        .iter()
        .copied()
        .find(|&p| p > resistance_1 * cfg.resistance_multiplier)
        .unwrap_or(peaks[1]);

    // Entry: midpoint of the first three-candle imbalance after the low,
    // where the third candle's low clears the first candle's high. Falls
    // back to a fixed markup when price left no gap behind.
    let post = &candles[low_idx..];
    let gap_entry = post
        .windows(3)
        .find(|w| w[2].low > w[0].high)
        .map(|w| (w[2].low + w[0].high) / 2.0);
    let entry_price = gap_entry.unwrap_or(reference_low * (1.0 + cfg.entry_markup_pct));

    let stop_price = reference_low * (1.0 - cfg.stop_pct);

    // Reward gate on unrounded values; rounding earlier would compound into
    // this ratio.
    let risk = entry_price - stop_price;
    if risk <= 0.0 {
        return None;
    }
    let reward_ratio = (resistance_2 - entry_price) / risk;
    if reward_ratio <= cfg.min_reward_ratio {
        return None;
    }

    let entry_out = round1(entry_price);
    let stop_out = round1(stop_price);
    // Rounding must not collapse entry onto (or under) the stop.
    if entry_out <= stop_out {
        return None;
    }

    Some(SignalLevels {
        reference_low: round1(reference_low),
        resistance_1: round1(resistance_1),
        resistance_2: round1(resistance_2),
        entry_price: entry_out,
        stop_price: stop_out,
        reward_ratio: round1(reward_ratio),
        reference_low_time: low_candle.time,
        last_price: round1(candles[candles.len() - 1].close),
    })
}

/// Round to one decimal for display stability.
fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            time: Utc
                .timestamp_opt(1_700_000_000 + i as i64 * 60, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    /// 60 candles, reference low 100 at index 50, peaks 120 (index 45) and
    /// 200 (index 20) before it, and a gap after it giving entry 105.
    fn pattern_series() -> Vec<Candle> {
        let mut s: Vec<Candle> = (0..60)
            .map(|i| candle(i, 108.0, 110.0, 105.0, 108.0))
            .collect();
        s[20] = candle(20, 150.0, 200.0, 140.0, 150.0);
        s[45] = candle(45, 112.0, 120.0, 108.0, 112.0);
        s[50] = candle(50, 101.0, 103.0, 100.0, 102.0);
        s[51] = candle(51, 103.0, 104.0, 102.0, 103.0);
        // low 107 clears the reference candle's high 103: fair-value gap
        s[52] = candle(52, 107.5, 108.0, 107.0, 107.5);
        s
    }

    #[test]
    fn accepts_reference_scenario() {
        let sig = analyze(&pattern_series(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(sig.reference_low, 100.0);
        assert_eq!(sig.resistance_1, 120.0);
        assert_eq!(sig.resistance_2, 200.0);
        assert_eq!(sig.entry_price, 105.0);
        assert_eq!(sig.stop_price, 98.0);
        // (200 - 105) / (105 - 98) = 13.571... → 13.6
        assert_eq!(sig.reward_ratio, 13.6);
        assert_eq!(sig.last_price, 108.0);
    }

    #[test]
    fn analyze_is_pure() {
        let series = pattern_series();
        let cfg = AnalyzerConfig::default();
        assert_eq!(analyze(&series, &cfg), analyze(&series, &cfg));
    }

    #[test]
    fn rejects_short_series() {
        let series: Vec<Candle> = (0..19)
            .map(|i| candle(i, 100.0, 101.0, 99.0, 100.0))
            .collect();
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_reference_low_below_band() {
        let series: Vec<Candle> = (0..30)
            .map(|i| candle(i, 11.0, 12.0, 10.0, 11.0))
            .collect();
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_reference_low_above_band() {
        let series: Vec<Candle> = (0..30)
            .map(|i| candle(i, 310.0, 320.0, 300.0, 310.0))
            .collect();
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_low_in_final_candles() {
        let mut series = pattern_series();
        let last = series.len() - 1;
        series[last] = candle(last, 96.0, 97.0, 95.0, 96.0);
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_when_window_before_low_is_tiny() {
        let mut series: Vec<Candle> = (0..30)
            .map(|i| candle(i, 108.0, 110.0, 105.0, 108.0))
            .collect();
        series[3] = candle(3, 91.0, 92.0, 90.0, 91.0);
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_single_resistance_peak() {
        let mut series = pattern_series();
        // Flatten the older peak; only the 120 peak at index 45 remains.
        series[20] = candle(20, 108.0, 110.0, 105.0, 108.0);
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn rejects_flat_window_with_no_peaks() {
        let mut series = pattern_series();
        series[20] = candle(20, 108.0, 110.0, 105.0, 108.0);
        series[45] = candle(45, 108.0, 110.0, 105.0, 108.0);
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }

    #[test]
    fn second_resistance_prefers_multiplier_peak() {
        // 200 >= 120 * 1.5, so the older peak is taken outright.
        let sig = analyze(&pattern_series(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(sig.resistance_2, 200.0);
    }

    #[test]
    fn second_resistance_falls_back_to_next_peak() {
        let mut series = pattern_series();
        // 150 < 120 * 1.5: no peak clears the multiplier, next peak is used.
        series[20] = candle(20, 130.0, 150.0, 125.0, 130.0);
        let sig = analyze(&series, &AnalyzerConfig::default()).unwrap();
        assert_eq!(sig.resistance_2, 150.0);
        // (150 - 105) / (105 - 98) = 6.43 → 6.4
        assert_eq!(sig.reward_ratio, 6.4);
    }

    #[test]
    fn fallback_peak_failing_reward_gate_rejects_consistently() {
        let mut series = pattern_series();
        // Peaks 120 and 121: fallback picks 121, reward collapses below 4.
        series[20] = candle(20, 118.0, 121.0, 115.0, 118.0);
        let cfg = AnalyzerConfig::default();
        assert!(analyze(&series, &cfg).is_none());
        assert!(analyze(&series, &cfg).is_none());
    }

    #[test]
    fn entry_falls_back_to_markup_without_gap() {
        let mut series = pattern_series();
        // Overlap every post-low candle so no 3-candle imbalance exists.
        for i in 51..series.len() {
            series[i] = candle(i, 103.0, 106.0, 101.0, 103.0);
        }
        let sig = analyze(&series, &AnalyzerConfig::default()).unwrap();
        // 100 * 1.05
        assert_eq!(sig.entry_price, 105.0);
    }

    #[test]
    fn entry_always_exceeds_stop() {
        let sig = analyze(&pattern_series(), &AnalyzerConfig::default()).unwrap();
        assert!(sig.entry_price > sig.stop_price);
    }

    #[test]
    fn reward_ratio_matches_rounded_levels_within_tolerance() {
        let sig = analyze(&pattern_series(), &AnalyzerConfig::default()).unwrap();
        let recomputed =
            (sig.resistance_2 - sig.entry_price) / (sig.entry_price - sig.stop_price);
        assert!(
            (sig.reward_ratio - recomputed).abs() <= 0.2,
            "reward_ratio {} drifted from recomputed {}",
            sig.reward_ratio,
            recomputed
        );
    }

    #[test]
    fn reward_gate_is_strict() {
        let mut series = pattern_series();
        // Entry 105, stop 98, risk 7. A second resistance of exactly
        // 105 + 4 * 7 = 133 gives reward_ratio == 4.0, which must reject.
        series[20] = candle(20, 130.0, 133.0, 125.0, 130.0);
        assert!(analyze(&series, &AnalyzerConfig::default()).is_none());
    }
}
