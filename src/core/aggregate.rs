use crate::core::percentile::mean_band_name;
use crate::core::time_axis::DailyGroups;
use crate::io::source::Collocator;
use crate::io::store::BandSink;
use crate::types::{PercentileError, PercentileResult, PixelRect, RasterGrid, TimeSeriesAxis};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Builds the intermediate time series: one collocated mean band per
/// acquisition day, persisted into the store at the day's axis offset.
pub struct DailyAggregator<'a> {
    collocator: &'a dyn Collocator,
    target_grid: RasterGrid,
    resampling: String,
}

impl<'a> DailyAggregator<'a> {
    pub fn new(
        collocator: &'a dyn Collocator,
        target_grid: RasterGrid,
        resampling: impl Into<String>,
    ) -> Self {
        Self {
            collocator,
            target_grid,
            resampling: resampling.into(),
        }
    }

    /// Aggregate every grouped day and persist its mean band.
    ///
    /// Days outside the axis (excluded by explicit bounds) are skipped with a
    /// warning. Returns the mapping from axis offset to daily mean band name.
    /// Any failure to persist a band aborts the run; later stages rely on the
    /// store being complete, so there is no partial salvage.
    pub fn aggregate<W: BandSink>(
        &self,
        groups: &DailyGroups<'_>,
        axis: &TimeSeriesAxis,
        prefix: &str,
        store: &mut W,
    ) -> PercentileResult<BTreeMap<usize, String>> {
        let mut day_bands = BTreeMap::new();

        for (&day, rasters) in groups {
            let offset = match axis.offset_of(day) {
                Some(offset) => offset,
                None => {
                    log::warn!(
                        "skipping day {}: outside the [{}, {}] time series bounds",
                        day,
                        axis.start_day(),
                        axis.end_day()
                    );
                    continue;
                }
            };

            log::info!(
                "computing collocated mean band for day {} from {} raster(s)",
                day,
                rasters.len()
            );

            // Collocated planes are scoped to this day's iteration; they are
            // released before the next day's aggregation starts, bounding
            // peak memory to one day's worth of inputs.
            let mean = {
                let mut planes = Vec::with_capacity(rasters.len());
                for raster in rasters {
                    planes.push(self.collocator.collocate(
                        *raster,
                        &self.target_grid,
                        &self.resampling,
                    )?);
                }
                daily_mean(&planes, &self.target_grid)?
            };

            let name = mean_band_name(prefix, day);
            let data: Vec<f32> = mean.iter().copied().collect();
            store.create_band(&name).map_err(|e| persistence(&name, e))?;
            store
                .write_region(&name, &PixelRect::full(&self.target_grid), &data)
                .map_err(|e| persistence(&name, e))?;

            day_bands.insert(offset, name);
        }

        Ok(day_bands)
    }
}

fn persistence(band: &str, err: PercentileError) -> PercentileError {
    PercentileError::Persistence(format!(
        "unable to write daily mean band '{}': {}",
        band, err
    ))
}

/// Per-pixel arithmetic mean across same-grid planes.
///
/// Missing cells (NaN) are excluded from the mean; a cell missing from every
/// plane stays missing rather than becoming zero.
pub fn daily_mean(planes: &[Array2<f32>], grid: &RasterGrid) -> PercentileResult<Array2<f32>> {
    if planes.is_empty() {
        return Err(PercentileError::Processing(
            "no collocated rasters to average".to_string(),
        ));
    }
    let dim = (grid.height, grid.width);
    for plane in planes {
        if plane.dim() != dim {
            return Err(PercentileError::Processing(format!(
                "collocated raster is {:?}, expected {:?}",
                plane.dim(),
                dim
            )));
        }
    }

    let mut sum = Array2::<f32>::zeros(dim);
    let mut count = Array2::<u32>::zeros(dim);
    for plane in planes {
        for ((r, c), v) in plane.indexed_iter() {
            if v.is_finite() {
                sum[[r, c]] += *v;
                count[[r, c]] += 1;
            }
        }
    }

    let mut mean = Array2::<f32>::from_elem(dim, f32::NAN);
    for ((r, c), m) in mean.indexed_iter_mut() {
        let n = count[[r, c]];
        if n > 0 {
            *m = sum[[r, c]] / n as f32;
        }
    }
    Ok(mean)
}
