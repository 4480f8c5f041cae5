//! Percentile-based calibration of entropy budgets.
//!
//! Thresholds drift with the repository: a budget tuned for a young
//! codebase throttles a mature one. Calibration reads the historical
//! `entropy_score` distribution and re-derives the per-level budgets
//! from its percentiles, with floors so a quiet history can never
//! collapse the budgets to zero.

use std::collections::BTreeMap;

use super::Profile;

/// Per-level `(percentile, multiplier, floor)` rules.
const RULES: [(&str, f64, f64, f64); 4] = [
    ("low", 0.75, 1.5, 10.0),
    ("medium", 0.75, 1.0, 8.0),
    ("high", 0.90, 1.0, 5.0),
    ("critical", 0.95, 0.8, 3.0),
];

/// Recalibrates the entropy budgets of `profiles` from a history of
/// entropy scores. Other profile fields are untouched; an empty
/// history returns the profiles unchanged.
#[must_use]
pub fn calibrate_profiles(
    profiles: &BTreeMap<String, Profile>,
    entropy_history: &[f64],
) -> BTreeMap<String, Profile> {
    let mut calibrated = profiles.clone();
    if entropy_history.is_empty() {
        return calibrated;
    }

    let mut sorted: Vec<f64> = entropy_history.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    for (level, percentile, multiplier, floor) in RULES {
        if let Some(profile) = calibrated.get_mut(level) {
            let value = percentile_of(&sorted, percentile);
            profile.entropy_budget = round1((value * multiplier).max(floor));
        }
    }
    calibrated
}

/// The value at `percentile` of an ascending-sorted sequence
/// (index-truncating, matching the historical behavior of the
/// calibration data set).
fn percentile_of(sorted: &[f64], percentile: f64) -> f64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
    sorted[index]
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
