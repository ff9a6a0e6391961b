use crate::core::aggregate::DailyAggregator;
use crate::core::percentile::{sanitize_band_prefix, threshold_band_name, validate_ranks};
use crate::core::tile_driver::{GapFillParams, TileDriver};
use crate::core::time_axis::{day_index, group_by_day};
use crate::io::source::{Collocator, SourceRaster};
use crate::io::store::{BandSink, BandSource, SeriesWriteHandle};
use crate::types::{
    GapFillMethod, PercentileError, PercentileResult, RasterGrid, TimeSeriesAxis,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of a temporal percentile run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalPercentileParams {
    /// Series start; taken from the oldest acquisition when absent.
    pub start_date: Option<DateTime<Utc>>,
    /// Series end; taken from the newest acquisition when absent.
    pub end_date: Option<DateTime<Utc>>,
    /// Requested percentile ranks, each in 0..=100.
    pub percentiles: Vec<u8>,
    pub gap_fill_method: GapFillMethod,
    /// Substituted for a missing first slot of a pixel time series.
    pub start_value_fallback: f32,
    /// Substituted for a missing last slot of a pixel time series.
    pub end_value_fallback: f32,
    /// Resampling method handed through to the collocation collaborator.
    pub resampling: String,
    /// Explicit output band name prefix; wins over the derived names.
    pub percentile_band_name: Option<String>,
    /// Name of the processed band in the source products.
    pub source_band_name: Option<String>,
    /// Band maths expression serving as the input band.
    pub band_maths_expression: Option<String>,
    /// Edge length of the square processing tiles.
    pub tile_size: usize,
}

impl Default for TemporalPercentileParams {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            percentiles: vec![90],
            gap_fill_method: GapFillMethod::Linear,
            start_value_fallback: 0.0,
            end_value_fallback: 0.0,
            resampling: "nearest".to_string(),
            percentile_band_name: None,
            source_band_name: None,
            band_maths_expression: None,
            tile_size: 512,
        }
    }
}

impl TemporalPercentileParams {
    pub fn validate(&self) -> PercentileResult<()> {
        validate_ranks(&self.percentiles)?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(PercentileError::Configuration(format!(
                    "end date '{}' before start date '{}'",
                    end, start
                )));
            }
        }
        if self.percentile_band_name.is_none()
            && self.source_band_name.is_none()
            && self.band_maths_expression.is_none()
        {
            return Err(PercentileError::Configuration(
                "either 'source_band_name' or 'band_maths_expression' must be specified"
                    .to_string(),
            ));
        }
        if self.tile_size == 0 {
            return Err(PercentileError::Configuration(
                "tile size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Output band name prefix: the explicit name, else the source band name,
    /// else the sanitized band maths expression.
    pub fn band_name_prefix(&self) -> PercentileResult<String> {
        if let Some(name) = &self.percentile_band_name {
            return Ok(name.clone());
        }
        if let Some(name) = &self.source_band_name {
            return Ok(name.clone());
        }
        if let Some(expression) = &self.band_maths_expression {
            return Ok(sanitize_band_prefix(expression));
        }
        Err(PercentileError::Configuration(
            "no band name prefix available".to_string(),
        ))
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub axis: TimeSeriesAxis,
    /// Number of daily mean bands written to the intermediate store.
    pub day_band_count: usize,
    /// Output threshold band names, one per distinct requested rank.
    pub output_bands: Vec<String>,
    pub tiles_processed: usize,
    pub pixels_skipped: usize,
}

/// Orchestrates a whole run: grouping, axis resolution, daily aggregation,
/// the store write/read hand-off and the tile loop.
///
/// Each stage's output is passed to the next explicitly; the processor holds
/// no mutable cross-stage state.
pub struct TemporalPercentileProcessor {
    params: TemporalPercentileParams,
    target_grid: RasterGrid,
}

impl TemporalPercentileProcessor {
    pub fn new(
        params: TemporalPercentileParams,
        target_grid: RasterGrid,
    ) -> PercentileResult<Self> {
        params.validate()?;
        if target_grid.is_empty() {
            return Err(PercentileError::Configuration(
                "target grid must not be empty".to_string(),
            ));
        }
        Ok(Self {
            params,
            target_grid,
        })
    }

    pub fn params(&self) -> &TemporalPercentileParams {
        &self.params
    }

    /// Run the full pipeline.
    ///
    /// `store` receives the intermediate daily mean bands and is converted
    /// into its read-only form before any tile is processed; `output`
    /// receives one threshold band per distinct requested rank.
    pub fn run<W, O>(
        &self,
        rasters: &[&dyn SourceRaster],
        collocator: &dyn Collocator,
        store: W,
        output: &mut O,
    ) -> PercentileResult<RunSummary>
    where
        W: SeriesWriteHandle,
        W::Reader: BandSource + Sync,
        O: BandSink + Send,
    {
        let groups = group_by_day(rasters)?;
        let data_start = *groups
            .keys()
            .next()
            .expect("grouping yields at least two days");
        let data_end = *groups
            .keys()
            .last()
            .expect("grouping yields at least two days");
        let axis = TimeSeriesAxis::resolve(
            data_start,
            data_end,
            self.params.start_date.as_ref().map(day_index),
            self.params.end_date.as_ref().map(day_index),
        )?;
        log::info!(
            "time series axis spans days {}..={} ({} slots)",
            axis.start_day(),
            axis.end_day(),
            axis.len()
        );

        let prefix = self.params.band_name_prefix()?;

        let mut store = store;
        let aggregator = DailyAggregator::new(
            collocator,
            self.target_grid,
            self.params.resampling.clone(),
        );
        let day_bands = aggregator.aggregate(&groups, &axis, &prefix, &mut store)?;
        if day_bands.len() < 2 {
            return Err(PercentileError::Configuration(
                "the explicit time bounds leave fewer than two days with input products"
                    .to_string(),
            ));
        }

        // Write/read hand-off: the store is closed for writing and reopened
        // read-only before the tile loop starts.
        let reader = store.finish()?;

        let mut targets: Vec<(u8, String)> = Vec::with_capacity(self.params.percentiles.len());
        for &rank in &self.params.percentiles {
            if targets.iter().any(|(r, _)| *r == rank) {
                continue;
            }
            targets.push((rank, threshold_band_name(&prefix, rank)));
        }
        if targets.len() < self.params.percentiles.len() {
            log::warn!("duplicate percentile ranks collapse onto one output band each");
        }
        let output_bands: Vec<String> = targets.iter().map(|(_, name)| name.clone()).collect();

        let gap_fill = GapFillParams {
            method: self.params.gap_fill_method,
            start_fallback: self.params.start_value_fallback,
            end_fallback: self.params.end_value_fallback,
        };
        let mut driver = TileDriver::new(
            &reader,
            &day_bands,
            axis.len(),
            self.target_grid,
            self.params.tile_size,
            targets,
            gap_fill,
        )?;
        let stats = driver.run(output)?;

        log::info!(
            "temporal percentile run complete: {} output bands, {} tiles",
            output_bands.len(),
            stats.tiles_processed
        );
        Ok(RunSummary {
            axis,
            day_band_count: day_bands.len(),
            output_bands,
            tiles_processed: stats.tiles_processed,
            pixels_skipped: stats.pixels_skipped,
        })
    }
}
