use crate::types::{PercentileError, PercentileResult, RasterGrid};
use chrono::{DateTime, Utc};
use ndarray::Array2;

/// Read-only view of one geolocated input raster.
///
/// Implementations own decoding and validity evaluation; the processing core
/// only borrows these for the duration of daily aggregation. Cells failing
/// the validity predicate must be reported as NaN.
pub trait SourceRaster {
    /// Pixel grid of the raster in its native geometry.
    fn grid(&self) -> RasterGrid;

    /// Observation timestamp used for temporal grouping.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Band values with invalid cells masked to NaN.
    fn read_values(&self) -> PercentileResult<Array2<f32>>;
}

/// Resamples a source raster onto a shared target grid.
///
/// The resampling method is an opaque configuration string handed through
/// from the caller; implementations decide what they support.
pub trait Collocator {
    fn collocate(
        &self,
        source: &dyn SourceRaster,
        target: &RasterGrid,
        resampling: &str,
    ) -> PercentileResult<Array2<f32>>;
}

/// In-memory raster backed by an `ndarray` plane.
///
/// The workhorse for tests and for callers whose loader already produced
/// decoded pixel data. An optional no-data value and an optional validity
/// mask are applied when the values are read.
#[derive(Debug, Clone)]
pub struct ArrayRaster {
    values: Array2<f32>,
    timestamp: DateTime<Utc>,
    no_data: Option<f32>,
    valid_mask: Option<Array2<bool>>,
}

impl ArrayRaster {
    pub fn new(values: Array2<f32>, timestamp: DateTime<Utc>) -> Self {
        Self {
            values,
            timestamp,
            no_data: None,
            valid_mask: None,
        }
    }

    /// Treat cells equal to `no_data` as missing.
    pub fn with_no_data(mut self, no_data: f32) -> Self {
        self.no_data = Some(no_data);
        self
    }

    /// Attach a validity mask; `false` cells are treated as missing.
    pub fn with_valid_mask(mut self, mask: Array2<bool>) -> Self {
        self.valid_mask = Some(mask);
        self
    }
}

impl SourceRaster for ArrayRaster {
    fn grid(&self) -> RasterGrid {
        let (rows, cols) = self.values.dim();
        RasterGrid::new(cols, rows)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn read_values(&self) -> PercentileResult<Array2<f32>> {
        if let Some(mask) = &self.valid_mask {
            if mask.dim() != self.values.dim() {
                return Err(PercentileError::Configuration(format!(
                    "validity mask {:?} does not match raster {:?}",
                    mask.dim(),
                    self.values.dim()
                )));
            }
        }
        let mut out = self.values.clone();
        for ((r, c), v) in out.indexed_iter_mut() {
            let masked_out = self
                .valid_mask
                .as_ref()
                .map(|m| !m[[r, c]])
                .unwrap_or(false);
            let is_no_data = self.no_data.map(|nd| *v == nd).unwrap_or(false);
            if masked_out || is_no_data {
                *v = f32::NAN;
            }
        }
        Ok(out)
    }
}

/// Nearest-neighbour collocation between plain pixel grids.
///
/// Maps each target cell to the source cell whose centre is nearest under a
/// uniform scale between the two grids. CRS-aware reprojection is the job of
/// an external collaborator; this covers the common case where inputs share
/// the target footprint but not its resolution.
#[derive(Debug, Default)]
pub struct NearestResampler;

impl NearestResampler {
    pub fn new() -> Self {
        Self
    }
}

impl Collocator for NearestResampler {
    fn collocate(
        &self,
        source: &dyn SourceRaster,
        target: &RasterGrid,
        resampling: &str,
    ) -> PercentileResult<Array2<f32>> {
        if !resampling.eq_ignore_ascii_case("nearest") {
            return Err(PercentileError::Configuration(format!(
                "NearestResampler does not support resampling method '{}'",
                resampling
            )));
        }
        if target.is_empty() {
            return Err(PercentileError::Configuration(
                "target grid is empty".to_string(),
            ));
        }

        let values = source.read_values()?;
        let src = source.grid();
        if src.is_empty() {
            return Err(PercentileError::Configuration(
                "source raster is empty".to_string(),
            ));
        }
        if src == *target {
            return Ok(values);
        }

        log::debug!(
            "resampling {}x{} -> {}x{} (nearest)",
            src.width,
            src.height,
            target.width,
            target.height
        );

        let mut out = Array2::<f32>::from_elem((target.height, target.width), f32::NAN);
        for r in 0..target.height {
            let sr = nearest_index(r, target.height, src.height);
            for c in 0..target.width {
                let sc = nearest_index(c, target.width, src.width);
                out[[r, c]] = values[[sr, sc]];
            }
        }
        Ok(out)
    }
}

/// Source index whose cell centre is nearest to target cell `i`.
fn nearest_index(i: usize, target_len: usize, source_len: usize) -> usize {
    let pos = (i as f64 + 0.5) * source_len as f64 / target_len as f64;
    (pos.floor() as usize).min(source_len - 1)
}
