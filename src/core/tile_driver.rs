use crate::core::gapfill::fill_gaps;
use crate::core::percentile::compute_thresholds;
use crate::io::store::{BandSink, BandSource};
use crate::types::{
    GapFillMethod, PercentileError, PercentileResult, PixelRect, RasterGrid, NO_DATA,
};
use std::collections::BTreeMap;

/// Lifecycle of the tile loop. Each tile passes through
/// `LoadingTile -> Computing -> Writing` and back to `Idle`; `Done` and
/// `Failed` are terminal for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    LoadingTile,
    Computing,
    Writing,
    Done,
    Failed,
}

/// Splits a raster into row-major rectangular tiles.
#[derive(Debug, Clone)]
pub struct TileGrid {
    grid: RasterGrid,
    tile_size: usize,
}

impl TileGrid {
    pub fn new(grid: RasterGrid, tile_size: usize) -> PercentileResult<Self> {
        if tile_size == 0 {
            return Err(PercentileError::Configuration(
                "tile size must be positive".to_string(),
            ));
        }
        if grid.is_empty() {
            return Err(PercentileError::Configuration(
                "raster grid must not be empty".to_string(),
            ));
        }
        Ok(Self { grid, tile_size })
    }

    pub fn tile_count(&self) -> usize {
        let nx = (self.grid.width + self.tile_size - 1) / self.tile_size;
        let ny = (self.grid.height + self.tile_size - 1) / self.tile_size;
        nx * ny
    }

    /// All tile rectangles in row-major order; edge tiles are clipped to the
    /// grid.
    pub fn tiles(&self) -> Vec<PixelRect> {
        let mut rects = Vec::with_capacity(self.tile_count());
        for y in (0..self.grid.height).step_by(self.tile_size) {
            let height = self.tile_size.min(self.grid.height - y);
            for x in (0..self.grid.width).step_by(self.tile_size) {
                let width = self.tile_size.min(self.grid.width - x);
                rects.push(PixelRect::new(x, y, width, height));
            }
        }
        rects
    }
}

/// Gap-fill settings applied to every pixel time vector.
#[derive(Debug, Clone, Copy)]
pub struct GapFillParams {
    pub method: GapFillMethod,
    pub start_fallback: f32,
    pub end_fallback: f32,
}

/// Outcome counters of one tile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRunStats {
    pub tiles_processed: usize,
    /// Pixels whose time vector held no valid sample; written as no-data.
    pub pixels_skipped: usize,
}

/// The control loop over the output raster.
///
/// For each tile it reads one sub-array per daily mean band, gathers a time
/// vector per pixel, gap-fills it and extracts the requested percentile
/// thresholds into the output bands. All per-tile buffers are released
/// before the next tile starts loading, so memory stays bounded by one
/// tile's worth of day slices regardless of raster size.
pub struct TileDriver<'a, R: BandSource> {
    reader: &'a R,
    day_bands: &'a BTreeMap<usize, String>,
    series_len: usize,
    tiles: TileGrid,
    /// Percentile rank and its output band, one entry per distinct rank.
    targets: Vec<(u8, String)>,
    ranks: Vec<u8>,
    gap_fill: GapFillParams,
    state: DriverState,
}

impl<'a, R: BandSource> TileDriver<'a, R> {
    pub fn new(
        reader: &'a R,
        day_bands: &'a BTreeMap<usize, String>,
        series_len: usize,
        grid: RasterGrid,
        tile_size: usize,
        targets: Vec<(u8, String)>,
        gap_fill: GapFillParams,
    ) -> PercentileResult<Self> {
        if targets.is_empty() {
            return Err(PercentileError::Configuration(
                "at least one output percentile band is required".to_string(),
            ));
        }
        if let Some(&offset) = day_bands.keys().max() {
            if offset >= series_len {
                return Err(PercentileError::Configuration(format!(
                    "day band offset {} exceeds series length {}",
                    offset, series_len
                )));
            }
        }
        let tiles = TileGrid::new(grid, tile_size)?;
        let ranks = targets.iter().map(|(rank, _)| *rank).collect();
        Ok(Self {
            reader,
            day_bands,
            series_len,
            tiles,
            targets,
            ranks,
            gap_fill,
            state: DriverState::Idle,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Process every tile, parallel when the `parallel` feature is enabled.
    pub fn run<O: BandSink + Send>(&mut self, output: &mut O) -> PercentileResult<TileRunStats>
    where
        R: Sync,
    {
        #[cfg(feature = "parallel")]
        {
            self.run_parallel(output)
        }
        #[cfg(not(feature = "parallel"))]
        {
            self.run_sequential(output)
        }
    }

    /// Process tiles one at a time on the calling thread.
    pub fn run_sequential<O: BandSink>(&mut self, output: &mut O) -> PercentileResult<TileRunStats> {
        let result = self.drive_sequential(output);
        self.state = if result.is_ok() {
            DriverState::Done
        } else {
            DriverState::Failed
        };
        result
    }

    fn drive_sequential<O: BandSink>(&mut self, output: &mut O) -> PercentileResult<TileRunStats> {
        self.create_output_bands(output)?;
        let rects = self.tiles.tiles();
        log::info!(
            "processing {} tiles over {} day bands",
            rects.len(),
            self.day_bands.len()
        );

        let mut pixels_skipped = 0;
        for rect in &rects {
            self.state = DriverState::LoadingTile;
            let slices = self.load_tile(rect)?;

            self.state = DriverState::Computing;
            let (buffers, skipped) = self.compute_tile(rect, &slices)?;
            pixels_skipped += skipped;

            self.state = DriverState::Writing;
            self.write_tile(output, rect, &buffers)?;
            self.state = DriverState::Idle;
            // Day slices and output buffers are dropped here, before the
            // next tile begins loading.
        }

        self.finish_stats(rects.len(), pixels_skipped)
    }

    /// Process tiles on the rayon pool. Tiles are shared-nothing: workers
    /// read the common read-only day bands and own their tile's buffers;
    /// writes to the output sink are serialized.
    #[cfg(feature = "parallel")]
    pub fn run_parallel<O: BandSink + Send>(&mut self, output: &mut O) -> PercentileResult<TileRunStats>
    where
        R: Sync,
    {
        use rayon::prelude::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        let result = (|| {
            self.create_output_bands(output)?;
            let rects = self.tiles.tiles();
            log::info!(
                "processing {} tiles over {} day bands ({} rayon threads)",
                rects.len(),
                self.day_bands.len(),
                rayon::current_num_threads()
            );

            let tile_count = rects.len();
            let skipped = AtomicUsize::new(0);
            let sink = Mutex::new(output);
            let this = &*self;

            rects.par_iter().try_for_each(|rect| {
                let slices = this.load_tile(rect)?;
                let (buffers, tile_skipped) = this.compute_tile(rect, &slices)?;
                skipped.fetch_add(tile_skipped, Ordering::Relaxed);

                let mut guard = sink.lock().map_err(|_| {
                    PercentileError::Processing("output sink lock poisoned".to_string())
                })?;
                this.write_tile(&mut **guard, rect, &buffers)
            })?;

            self.finish_stats(tile_count, skipped.into_inner())
        })();

        self.state = if result.is_ok() {
            DriverState::Done
        } else {
            DriverState::Failed
        };
        result
    }

    fn finish_stats(
        &self,
        tiles_processed: usize,
        pixels_skipped: usize,
    ) -> PercentileResult<TileRunStats> {
        if pixels_skipped > 0 {
            log::warn!(
                "{} pixel(s) had no valid sample and were written as no-data",
                pixels_skipped
            );
        }
        Ok(TileRunStats {
            tiles_processed,
            pixels_skipped,
        })
    }

    fn create_output_bands<O: BandSink>(&self, output: &mut O) -> PercentileResult<()> {
        for (_, band) in &self.targets {
            output.create_band(band)?;
        }
        Ok(())
    }

    /// Read this tile's sub-array from every daily mean band. Offsets with
    /// no band (days without data) stay `None` and gather as missing.
    fn load_tile(&self, rect: &PixelRect) -> PercentileResult<Vec<Option<Vec<f32>>>> {
        let mut slices: Vec<Option<Vec<f32>>> = vec![None; self.series_len];
        for (&offset, band) in self.day_bands {
            log::trace!("loading {}x{} slice of '{}'", rect.width, rect.height, band);
            slices[offset] = Some(self.reader.read_region(band, rect)?);
        }
        Ok(slices)
    }

    /// Row-major walk over the tile: gather, gap-fill, extract thresholds.
    fn compute_tile(
        &self,
        rect: &PixelRect,
        slices: &[Option<Vec<f32>>],
    ) -> PercentileResult<(Vec<Vec<f32>>, usize)> {
        let pixels = rect.len();
        let mut buffers: Vec<Vec<f32>> = self
            .targets
            .iter()
            .map(|_| vec![NO_DATA; pixels])
            .collect();
        let mut series = vec![NO_DATA; self.series_len];
        let mut skipped = 0;

        for idx in 0..pixels {
            series.fill(NO_DATA);
            for (offset, slice) in slices.iter().enumerate() {
                if let Some(values) = slice {
                    series[offset] = values[idx];
                }
            }

            match fill_gaps(
                &mut series,
                self.gap_fill.method,
                self.gap_fill.start_fallback,
                self.gap_fill.end_fallback,
            ) {
                Ok(()) => {
                    let thresholds = compute_thresholds(&self.ranks, &mut series);
                    for (t, value) in thresholds.into_iter().enumerate() {
                        buffers[t][idx] = value;
                    }
                }
                Err(PercentileError::EmptySeries) => {
                    // Recovered locally: this pixel stays no-data in every
                    // output band.
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((buffers, skipped))
    }

    fn write_tile<O: BandSink>(
        &self,
        output: &mut O,
        rect: &PixelRect,
        buffers: &[Vec<f32>],
    ) -> PercentileResult<()> {
        for ((_, band), buffer) in self.targets.iter().zip(buffers) {
            output.write_region(band, rect, buffer)?;
        }
        Ok(())
    }
}
