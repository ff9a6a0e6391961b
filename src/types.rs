use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Integer day index on the time axis (Modified Julian Day).
pub type DayIndex = i64;

/// Missing-value sentinel for raster cells and time-series slots.
pub const NO_DATA: f32 = f32::NAN;

/// Pixel dimensions of a raster plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
}

impl RasterGrid {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rectangular pixel region, in global raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Full extent of a grid as a single region.
    pub fn full(grid: &RasterGrid) -> Self {
        Self::new(0, 0, grid.width, grid.height)
    }

    /// Number of pixels in the region.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the region lies entirely inside `grid`.
    pub fn fits(&self, grid: &RasterGrid) -> bool {
        self.x + self.width <= grid.width && self.y + self.height <= grid.height
    }
}

/// Inclusive day range of the time series.
///
/// Immutable after construction; every day in `[start_day, end_day]` occupies
/// one slot on the axis whether or not any input was acquired that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesAxis {
    start_day: DayIndex,
    end_day: DayIndex,
}

impl TimeSeriesAxis {
    /// Resolve the axis from the data extrema and optional explicit bounds.
    ///
    /// Explicit bounds win over the extrema. The resulting range must span at
    /// least two days.
    pub fn resolve(
        data_start: DayIndex,
        data_end: DayIndex,
        explicit_start: Option<DayIndex>,
        explicit_end: Option<DayIndex>,
    ) -> PercentileResult<Self> {
        let start_day = explicit_start.unwrap_or(data_start);
        let end_day = explicit_end.unwrap_or(data_end);
        if end_day < start_day {
            return Err(PercentileError::Configuration(format!(
                "end day {} is before start day {}",
                end_day, start_day
            )));
        }
        let axis = Self { start_day, end_day };
        if axis.len() < 2 {
            return Err(PercentileError::Configuration(
                "the time series must span at least two days".to_string(),
            ));
        }
        Ok(axis)
    }

    pub fn start_day(&self) -> DayIndex {
        self.start_day
    }

    pub fn end_day(&self) -> DayIndex {
        self.end_day
    }

    /// Number of slots on the axis.
    pub fn len(&self) -> usize {
        (self.end_day - self.start_day + 1) as usize
    }

    /// Zero-based slot of `day`, or `None` if the day falls outside the axis.
    pub fn offset_of(&self, day: DayIndex) -> Option<usize> {
        if day < self.start_day || day > self.end_day {
            None
        } else {
            Some((day - self.start_day) as usize)
        }
    }
}

/// Gap-filling strategy for missing time-series slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapFillMethod {
    /// Straight line between the known samples bounding a gap
    Linear,
    /// Second-degree polynomial through the three nearest known samples
    Quadratic,
    /// Natural cubic spline through all known samples
    Spline,
}

impl FromStr for GapFillMethod {
    type Err = PercentileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(GapFillMethod::Linear),
            "quadratic" => Ok(GapFillMethod::Quadratic),
            "spline" => Ok(GapFillMethod::Spline),
            _ => Err(PercentileError::Configuration(format!(
                "unknown gap-fill method: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for GapFillMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapFillMethod::Linear => write!(f, "linear"),
            GapFillMethod::Quadratic => write!(f, "quadratic"),
            GapFillMethod::Spline => write!(f, "spline"),
        }
    }
}

/// Error types for temporal percentile processing
#[derive(Debug, thiserror::Error)]
pub enum PercentileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("no valid sample in time series")]
    EmptySeries,

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for temporal percentile operations
pub type PercentileResult<T> = Result<T, PercentileError>;
