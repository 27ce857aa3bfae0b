//! ==============================================================================
//! aggregate.rs - mean of the valid readings
//! ==============================================================================
//!
//! purpose:
//!     values are quantized to the DS18B20's millidegree resolution and summed
//!     as integers, so the 3-decimal rounding is exact: half away from zero.
//!
//! relationships:
//!     - used by: sampler.rs (every tick)
//!
//! ==============================================================================

use crate::domain::Reading;

const MILLI: f64 = 1000.0;

/// mean of the present readings rounded to 3 decimals; `None` if none present
pub fn average(readings: &[Reading]) -> Option<f64> {
    let millis: Vec<i64> = readings.iter().flatten().map(|&t| to_millis(t)).collect();
    if millis.is_empty() {
        return None;
    }
    let sum: i64 = millis.iter().sum();
    let mean = div_round_half_away(sum, millis.len() as i64);
    Some(mean as f64 / MILLI)
}

/// round to 3 decimals, half away from zero
pub fn round3(value: f64) -> f64 {
    to_millis(value) as f64 / MILLI
}

fn to_millis(celsius: f64) -> i64 {
    (celsius * MILLI).round() as i64
}

fn div_round_half_away(numerator: i64, denominator: i64) -> i64 {
    let magnitude = (2 * numerator.abs() + denominator) / (2 * denominator);
    if numerator < 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_present_is_absent() {
        assert_eq!(average(&[None, None, None]), None);
        assert_eq!(average(&[]), None);
    }

    #[test]
    fn single_reading_is_its_own_mean() {
        assert_eq!(average(&[None, Some(19.5), None]), Some(19.5));
    }

    #[test]
    fn half_millidegree_rounds_away_from_zero() {
        assert_eq!(average(&[Some(21.111), None, Some(23.222)]), Some(22.167));
        assert_eq!(average(&[Some(-21.111), None, Some(-23.222)]), Some(-22.167));
    }

    #[test]
    fn thirds_round_to_nearest() {
        // 60.001 / 3 = 20.000333…
        assert_eq!(average(&[Some(20.0), Some(20.0), Some(20.001)]), Some(20.0));
        // 60.002 / 3 = 20.000666…
        assert_eq!(average(&[Some(20.0), Some(20.001), Some(20.001)]), Some(20.001));
    }

    #[test]
    fn round3_matches_average_of_one() {
        assert_eq!(round3(22.1666), 22.167);
        assert_eq!(round3(-0.0004), 0.0);
    }
}
