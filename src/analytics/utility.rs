use chrono::{DateTime, Utc};

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Floors a timestamp to the start of its UTC hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    DateTime::<Utc>::from_timestamp(floored, 0).expect("hour-floored timestamp in range")
}

/// Rounds to two decimal places, the precision congestion indices are
/// reported at.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Rounds to four decimal places, the precision confidences are reported at.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_mean_values() {
        assert_eq!(mean(&[20.0, 25.0]), 22.5);
    }

    #[test]
    fn test_truncate_to_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 8, 42, 17).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap();
        assert_eq!(truncate_to_hour(ts), expected);

        // Already aligned timestamps are unchanged.
        assert_eq!(truncate_to_hour(expected), expected);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round2(70.004), 70.0);
        assert_eq!(round2(70.005), 70.01);
        assert_eq!(round4(0.123456), 0.1235);
    }
}
