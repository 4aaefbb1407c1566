//! Pure metric math shared by the classifier and data-quality validators.

/// Percentage difference of `claimed` against `platform`.
///
/// `0.0` if both are zero, `1.0` if `platform` is zero and `claimed` is
/// positive (a claim with no platform baseline is maximally suspect),
/// otherwise `|claimed - platform| / platform`.
pub fn pct_diff(claimed: i64, platform: i64) -> f64 {
    if claimed == 0 && platform == 0 {
        return 0.0;
    }
    if platform == 0 {
        return 1.0;
    }
    ((claimed - platform).abs() as f64) / (platform as f64)
}

/// Adjusts a platform-reported value upward to account for organic growth
/// between claim submission and fetch time. `elapsed_hours` is clamped to
/// `[0, cap_hours]` before being applied.
pub fn apply_growth_allowance(
    platform_value: i64,
    elapsed_hours: f64,
    growth_per_hour_pct: f64,
    cap_hours: i64,
) -> i64 {
    let hours = elapsed_hours.clamp(0.0, cap_hours as f64);
    let adjusted = platform_value as f64 * (1.0 + growth_per_hour_pct * hours);
    adjusted.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_diff_both_zero() {
        assert_eq!(pct_diff(0, 0), 0.0);
    }

    #[test]
    fn pct_diff_platform_zero_claimed_positive() {
        assert_eq!(pct_diff(50, 0), 1.0);
    }

    #[test]
    fn pct_diff_general_case() {
        assert!((pct_diff(118, 100) - 0.18).abs() < 1e-9);
        assert!((pct_diff(100, 118) - (18.0 / 118.0)).abs() < 1e-9);
    }

    #[test]
    fn growth_allowance_within_cap() {
        // 100 * (1 + 0.10 * 2) = 120
        assert_eq!(apply_growth_allowance(100, 2.0, 0.10, 24), 120);
    }

    #[test]
    fn growth_allowance_clamps_elapsed_to_cap() {
        let at_cap = apply_growth_allowance(100, 24.0, 0.10, 24);
        let beyond_cap = apply_growth_allowance(100, 1000.0, 0.10, 24);
        assert_eq!(at_cap, beyond_cap);
    }

    #[test]
    fn growth_allowance_negative_elapsed_clamped_to_zero() {
        assert_eq!(apply_growth_allowance(100, -5.0, 0.10, 24), 100);
    }
}
