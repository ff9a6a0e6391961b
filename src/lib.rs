//! temporal-percentile: A Fast, Tile-Streaming Temporal Percentile Processor
//!
//! This library computes per-pixel percentile thresholds over a stack of
//! geospatially registered rasters acquired at different times. Inputs are
//! grouped per acquisition day, reduced to collocated daily mean bands,
//! gap-filled along the time axis by numerical interpolation and streamed
//! tile by tile through a nearest-rank percentile extraction, so rasters
//! never need to fit in memory as one dense cube.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    DayIndex, GapFillMethod, PercentileError, PercentileResult, PixelRect, RasterGrid,
    TimeSeriesAxis, NO_DATA,
};

pub use crate::core::{
    RunSummary, TemporalPercentileParams, TemporalPercentileProcessor, TileDriver,
};

pub use io::{
    ArrayRaster, BandSink, BandSource, Collocator, MemoryStore, NearestResampler,
    SeriesWriteHandle, SourceRaster, TimeSeriesReader, TimeSeriesWriter,
};
