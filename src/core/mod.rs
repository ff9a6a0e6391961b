//! Core temporal percentile processing modules

pub mod time_axis;
pub mod aggregate;
pub mod gapfill;
pub mod percentile;
pub mod tile_driver;
pub mod processor;

// Re-export main types
pub use time_axis::{day_index, day_index_date, group_by_day, DailyGroups};
pub use aggregate::{daily_mean, DailyAggregator};
pub use gapfill::fill_gaps;
pub use percentile::{
    compute_thresholds, mean_band_name, nearest_rank_index, sanitize_band_prefix,
    threshold_band_name, validate_ranks,
};
pub use tile_driver::{DriverState, GapFillParams, TileDriver, TileGrid, TileRunStats};
pub use processor::{RunSummary, TemporalPercentileParams, TemporalPercentileProcessor};
