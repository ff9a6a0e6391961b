//! I/O boundary: source raster, collocation and band store collaborators.

pub mod source;
pub mod store;

pub use source::{ArrayRaster, Collocator, NearestResampler, SourceRaster};
pub use store::{
    BandSink, BandSource, MemoryStore, SeriesWriteHandle, TimeSeriesReader, TimeSeriesWriter,
};
