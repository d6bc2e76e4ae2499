/// Exponential recency decay, bucketed into `day_span`-day steps:
/// `exp(-decay * ceil(days_since / day_span))`.
///
/// A game on the fit date itself (days_since = 0) lands in bucket 0 and
/// gets weight 1.0 regardless of decay.
pub fn bucket_weight(decay: f64, day_span_days: u32, days_since: i64) -> f64 {
    let days_since = days_since.max(0);
    let span = i64::from(day_span_days.max(1));
    let bucket = (days_since as u64).div_ceil(span as u64);
    (-decay * bucket as f64).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_decay_weights_everything_equally() {
        assert_eq!(bucket_weight(0.0, 7, 0), 1.0);
        assert_eq!(bucket_weight(0.0, 7, 365), 1.0);
    }

    #[test]
    fn older_buckets_weigh_strictly_less() {
        // P5: doubling the age in day-span units strictly lowers the weight,
        // scaling as exp(-decay * delta_buckets).
        let decay = 0.1;
        let w1 = bucket_weight(decay, 7, 7);
        let w2 = bucket_weight(decay, 7, 14);
        assert!(w2 < w1);
        assert!((w2 / w1 - (-decay).exp()).abs() < 1e-12);
    }

    #[test]
    fn ages_within_one_bucket_share_a_weight() {
        let a = bucket_weight(0.2, 7, 1);
        let b = bucket_weight(0.2, 7, 7);
        assert_eq!(a, b);
        assert!(bucket_weight(0.2, 7, 8) < b);
    }

    #[test]
    fn negative_age_clamps_to_current_bucket() {
        assert_eq!(bucket_weight(0.3, 7, -5), 1.0);
    }
}
