use crate::types::{PercentileError, PercentileResult};

/// Compute one threshold per requested rank by nearest-rank selection.
///
/// `values` is sorted ascending in place; the buffer is consumed as scratch
/// and must not be reused by the caller afterwards. For each rank `p` the
/// threshold is `values[floor(p / 100 * len)]` with the index clamped to the
/// last element, so `p = 100` selects the maximum rather than overflowing.
/// Ranks are looked up independently; duplicates simply repeat the lookup.
pub fn compute_thresholds(ranks: &[u8], values: &mut [f32]) -> Vec<f32> {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ranks
        .iter()
        .map(|&p| {
            let idx = nearest_rank_index(p, values.len());
            values[idx]
        })
        .collect()
}

/// Index of the nearest-rank sample for rank `p` in a sorted buffer of
/// `len` values, clamped to `[0, len - 1]`.
pub fn nearest_rank_index(rank: u8, len: usize) -> usize {
    let idx = (rank as f32 / 100.0 * len as f32).floor() as usize;
    idx.min(len - 1)
}

/// Validate requested percentile ranks (each must lie in 0..=100).
pub fn validate_ranks(ranks: &[u8]) -> PercentileResult<()> {
    if ranks.is_empty() {
        return Err(PercentileError::Configuration(
            "at least one percentile rank must be requested".to_string(),
        ));
    }
    for &rank in ranks {
        if rank > 100 {
            return Err(PercentileError::Configuration(format!(
                "percentile rank {} is outside 0..=100",
                rank
            )));
        }
    }
    Ok(())
}

/// Output band name for one percentile rank, e.g. `ndvi_p90_threshold`.
pub fn threshold_band_name(prefix: &str, rank: u8) -> String {
    format!("{}_p{}_threshold", prefix, rank)
}

/// Daily mean band name, e.g. `ndvi_20120601`.
pub fn mean_band_name(prefix: &str, day: crate::types::DayIndex) -> String {
    let date = super::time_axis::day_index_date(day);
    format!("{}_{}", prefix, date.format("%Y%m%d"))
}

/// Collapse a band-maths expression into a band name prefix by replacing
/// whitespace runs with underscores.
pub fn sanitize_band_prefix(expression: &str) -> String {
    let ws = regex::Regex::new(r"\s+").expect("static regex is valid");
    ws.replace_all(expression.trim(), "_").into_owned()
}
