use crate::types::{PercentileError, PercentileResult, PixelRect, RasterGrid, NO_DATA};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Writable band container (the intermediate time-series store while it is
/// being built, or the target product receiving threshold bands).
pub trait BandSink {
    /// Register a new band. Every cell starts as no-data.
    fn create_band(&mut self, name: &str) -> PercentileResult<()>;

    /// Write `data` (row-major, `region.len()` values) into a band region.
    fn write_region(&mut self, band: &str, region: &PixelRect, data: &[f32])
        -> PercentileResult<()>;
}

/// Read-only band container. Implementations must be safe to share across
/// tile workers (`&self` reads only).
pub trait BandSource {
    /// Read a band region as a row-major vector of `region.len()` values.
    fn read_region(&self, band: &str, region: &PixelRect) -> PercentileResult<Vec<f32>>;
}

/// The writer role of the intermediate time-series store.
///
/// `finish` is the write/read hand-off: it flushes everything, closes the
/// store for writing and yields the read-only handle the tile loop consumes.
/// Keeping the transition in the type system rules out a concurrent
/// writer+reader on the same store.
pub trait SeriesWriteHandle: BandSink + Sized {
    type Reader: BandSource;

    fn finish(self) -> PercentileResult<Self::Reader>;
}

fn check_region(grid: &RasterGrid, region: &PixelRect, data_len: Option<usize>) -> PercentileResult<()> {
    if !region.fits(grid) {
        return Err(PercentileError::Configuration(format!(
            "region {:?} exceeds the {}x{} store grid",
            region, grid.width, grid.height
        )));
    }
    if let Some(len) = data_len {
        if len != region.len() {
            return Err(PercentileError::Configuration(format!(
                "buffer holds {} values but region {:?} has {} cells",
                len,
                region,
                region.len()
            )));
        }
    }
    Ok(())
}

/// Heap-backed band store, used in tests and for small runs.
///
/// Serves as both sink and source; `finish` is a no-op transition that simply
/// reuses the store as its own reader.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    grid: RasterGrid,
    bands: HashMap<String, Vec<f32>>,
}

impl MemoryStore {
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            grid,
            bands: HashMap::new(),
        }
    }

    pub fn grid(&self) -> RasterGrid {
        self.grid
    }

    pub fn band_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }
}

impl BandSink for MemoryStore {
    fn create_band(&mut self, name: &str) -> PercentileResult<()> {
        if self.bands.contains_key(name) {
            return Err(PercentileError::Configuration(format!(
                "band '{}' already exists",
                name
            )));
        }
        self.bands
            .insert(name.to_string(), vec![NO_DATA; self.grid.len()]);
        Ok(())
    }

    fn write_region(
        &mut self,
        band: &str,
        region: &PixelRect,
        data: &[f32],
    ) -> PercentileResult<()> {
        check_region(&self.grid, region, Some(data.len()))?;
        let width = self.grid.width;
        let cells = self.bands.get_mut(band).ok_or_else(|| {
            PercentileError::Configuration(format!("unknown band '{}'", band))
        })?;
        for row in 0..region.height {
            let dst = (region.y + row) * width + region.x;
            let src = row * region.width;
            cells[dst..dst + region.width].copy_from_slice(&data[src..src + region.width]);
        }
        Ok(())
    }
}

impl BandSource for MemoryStore {
    fn read_region(&self, band: &str, region: &PixelRect) -> PercentileResult<Vec<f32>> {
        check_region(&self.grid, region, None)?;
        let width = self.grid.width;
        let cells = self.bands.get(band).ok_or_else(|| {
            PercentileError::Configuration(format!("unknown band '{}'", band))
        })?;
        let mut out = Vec::with_capacity(region.len());
        for row in 0..region.height {
            let src = (region.y + row) * width + region.x;
            out.extend_from_slice(&cells[src..src + region.width]);
        }
        Ok(out)
    }
}

impl SeriesWriteHandle for MemoryStore {
    type Reader = MemoryStore;

    fn finish(self) -> PercentileResult<MemoryStore> {
        Ok(self)
    }
}

const HEADER_FILE: &str = "header.xml";

/// On-disk description of a file-backed store: grid shape plus one raw data
/// file per band.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "time_series_store")]
struct StoreHeader {
    width: usize,
    height: usize,
    #[serde(rename = "band", default)]
    bands: Vec<BandEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BandEntry {
    name: String,
    file: String,
}

/// File-backed time-series store, write side.
///
/// One directory holds an XML header and one raw little-endian f32 file per
/// band. New bands are pre-filled with NaN so never-written cells read back
/// as no-data. The f32 bit patterns round-trip losslessly, NaN included.
pub struct TimeSeriesWriter {
    dir: PathBuf,
    grid: RasterGrid,
    bands: Vec<(String, String)>,
    files: HashMap<String, File>,
}

impl TimeSeriesWriter {
    /// Create a store under `dir` (the directory is created if absent).
    pub fn create<P: AsRef<Path>>(dir: P, grid: RasterGrid) -> PercentileResult<Self> {
        if grid.is_empty() {
            return Err(PercentileError::Configuration(
                "store grid must not be empty".to_string(),
            ));
        }
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        log::info!(
            "created time-series store at {} ({}x{})",
            dir.display(),
            grid.width,
            grid.height
        );
        Ok(Self {
            dir,
            grid,
            bands: Vec::new(),
            files: HashMap::new(),
        })
    }

    pub fn grid(&self) -> RasterGrid {
        self.grid
    }

    fn band_file_name(&self) -> String {
        format!("band_{}.f32", self.bands.len())
    }
}

impl BandSink for TimeSeriesWriter {
    fn create_band(&mut self, name: &str) -> PercentileResult<()> {
        if self.files.contains_key(name) {
            return Err(PercentileError::Configuration(format!(
                "band '{}' already exists",
                name
            )));
        }
        let file_name = self.band_file_name();
        let path = self.dir.join(&file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        // Pre-fill with the no-data sentinel, one row at a time.
        let row = nan_row_bytes(self.grid.width);
        for y in 0..self.grid.height {
            file.write_all_at(&row, (y * self.grid.width * 4) as u64)?;
        }

        self.bands.push((name.to_string(), file_name));
        self.files.insert(name.to_string(), file);
        Ok(())
    }

    fn write_region(
        &mut self,
        band: &str,
        region: &PixelRect,
        data: &[f32],
    ) -> PercentileResult<()> {
        check_region(&self.grid, region, Some(data.len()))?;
        let width = self.grid.width;
        let file = self.files.get(band).ok_or_else(|| {
            PercentileError::Configuration(format!("unknown band '{}'", band))
        })?;
        let mut buf = Vec::with_capacity(region.width * 4);
        for row in 0..region.height {
            buf.clear();
            for v in &data[row * region.width..(row + 1) * region.width] {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            let offset = (((region.y + row) * width + region.x) * 4) as u64;
            file.write_all_at(&buf, offset)?;
        }
        Ok(())
    }
}

impl SeriesWriteHandle for TimeSeriesWriter {
    type Reader = TimeSeriesReader;

    /// Flush and close the store for writing, then reopen it read-only.
    fn finish(self) -> PercentileResult<TimeSeriesReader> {
        let header = StoreHeader {
            width: self.grid.width,
            height: self.grid.height,
            bands: self
                .bands
                .iter()
                .map(|(name, file)| BandEntry {
                    name: name.clone(),
                    file: file.clone(),
                })
                .collect(),
        };
        let xml = quick_xml::se::to_string(&header)
            .map_err(|e| PercentileError::Metadata(format!("unable to write store header: {}", e)))?;
        std::fs::write(self.dir.join(HEADER_FILE), xml)?;

        for file in self.files.values() {
            file.sync_all()?;
        }
        let dir = self.dir.clone();
        drop(self.files);

        log::info!("time-series store closed for writing, reopening read-only");
        TimeSeriesReader::open(dir)
    }
}

/// File-backed time-series store, read side. Safe to share across tile
/// workers; all reads are positioned and take `&self`.
pub struct TimeSeriesReader {
    grid: RasterGrid,
    files: HashMap<String, File>,
}

impl TimeSeriesReader {
    /// Open an existing store directory read-only.
    pub fn open<P: AsRef<Path>>(dir: P) -> PercentileResult<Self> {
        let dir = dir.as_ref();
        let xml = std::fs::read_to_string(dir.join(HEADER_FILE))?;
        let header: StoreHeader = quick_xml::de::from_str(&xml)
            .map_err(|e| PercentileError::Metadata(format!("unable to read store header: {}", e)))?;
        let grid = RasterGrid::new(header.width, header.height);

        let expected_len = (grid.len() * 4) as u64;
        let mut files = HashMap::new();
        for entry in &header.bands {
            let path = dir.join(&entry.file);
            let file = File::open(&path)?;
            let actual_len = file.metadata()?.len();
            if actual_len != expected_len {
                return Err(PercentileError::Metadata(format!(
                    "band file {} holds {} bytes, expected {}",
                    path.display(),
                    actual_len,
                    expected_len
                )));
            }
            files.insert(entry.name.clone(), file);
        }
        Ok(Self { grid, files })
    }

    pub fn grid(&self) -> RasterGrid {
        self.grid
    }

    pub fn band_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }
}

impl BandSource for TimeSeriesReader {
    fn read_region(&self, band: &str, region: &PixelRect) -> PercentileResult<Vec<f32>> {
        check_region(&self.grid, region, None)?;
        let width = self.grid.width;
        let file = self.files.get(band).ok_or_else(|| {
            PercentileError::Configuration(format!("unknown band '{}'", band))
        })?;
        let mut out = Vec::with_capacity(region.len());
        let mut buf = vec![0u8; region.width * 4];
        for row in 0..region.height {
            let offset = (((region.y + row) * width + region.x) * 4) as u64;
            file.read_exact_at(&mut buf, offset)?;
            out.extend(buf.chunks_exact(4).map(|b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }));
        }
        Ok(out)
    }
}

fn nan_row_bytes(width: usize) -> Vec<u8> {
    let mut row = Vec::with_capacity(width * 4);
    for _ in 0..width {
        row.extend_from_slice(&NO_DATA.to_le_bytes());
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_region_round_trip() {
        let mut store = MemoryStore::new(RasterGrid::new(4, 3));
        store.create_band("b").unwrap();

        let region = PixelRect::new(1, 1, 2, 2);
        store
            .write_region("b", &region, &[1.0, 2.0, 3.0, 4.0])
            .unwrap();

        assert_eq!(
            store.read_region("b", &region).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        // Cells outside the written region stay no-data.
        let corner = store
            .read_region("b", &PixelRect::new(0, 0, 1, 1))
            .unwrap();
        assert!(corner[0].is_nan());
    }

    #[test]
    fn memory_store_rejects_duplicate_band() {
        let mut store = MemoryStore::new(RasterGrid::new(2, 2));
        store.create_band("b").unwrap();
        assert!(store.create_band("b").is_err());
    }

    #[test]
    fn memory_store_rejects_out_of_bounds_region() {
        let mut store = MemoryStore::new(RasterGrid::new(2, 2));
        store.create_band("b").unwrap();
        let err = store
            .write_region("b", &PixelRect::new(1, 1, 2, 2), &[0.0; 4])
            .unwrap_err();
        assert!(matches!(err, PercentileError::Configuration(_)));
    }

    #[test]
    fn memory_store_rejects_mismatched_buffer() {
        let mut store = MemoryStore::new(RasterGrid::new(2, 2));
        store.create_band("b").unwrap();
        let err = store
            .write_region("b", &PixelRect::new(0, 0, 2, 2), &[0.0; 3])
            .unwrap_err();
        assert!(matches!(err, PercentileError::Configuration(_)));
    }
}
