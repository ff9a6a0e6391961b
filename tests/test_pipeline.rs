use chrono::{TimeZone, Utc};
use ndarray::array;
use temporal_percentile::{
    ArrayRaster, BandSource, GapFillMethod, MemoryStore, NearestResampler, PercentileError, PixelRect,
    RasterGrid, SourceRaster, TemporalPercentileParams, TemporalPercentileProcessor,
    TimeSeriesWriter,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params(percentiles: Vec<u8>) -> TemporalPercentileParams {
    TemporalPercentileParams {
        percentiles,
        gap_fill_method: GapFillMethod::Linear,
        start_value_fallback: 0.0,
        end_value_fallback: 0.0,
        source_band_name: Some("ndvi".to_string()),
        tile_size: 2,
        ..TemporalPercentileParams::default()
    }
}

/// Four rasters over three distinct days (two of them on the first day),
/// ranks [50, 90], linear gap filling with 0.0 fallbacks.
#[test]
fn end_to_end_three_day_series() {
    init_logging();
    let grid = RasterGrid::new(2, 2);

    // Day 1 (two acquisitions, averaged to [2, 3, 4, 5]).
    let day1a = ArrayRaster::new(
        array![[1.0, 2.0], [3.0, 4.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 9, 30, 0).unwrap(),
    );
    let day1b = ArrayRaster::new(
        array![[3.0, 4.0], [5.0, 6.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 21, 10, 0).unwrap(),
    );
    // Day 2 has a missing pixel (gap-filled from its neighbours).
    let day2 = ArrayRaster::new(
        array![[4.0, f32::NAN], [8.0, 10.0]],
        Utc.with_ymd_and_hms(2012, 6, 2, 10, 0, 0).unwrap(),
    );
    // Day 3.
    let day3 = ArrayRaster::new(
        array![[6.0, 9.0], [12.0, 15.0]],
        Utc.with_ymd_and_hms(2012, 6, 3, 10, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&day1a, &day1b, &day2, &day3];

    let processor = TemporalPercentileProcessor::new(params(vec![50, 90]), grid).unwrap();
    let mut output = MemoryStore::new(grid);
    let summary = processor
        .run(
            &rasters,
            &NearestResampler::new(),
            MemoryStore::new(grid),
            &mut output,
        )
        .unwrap();

    // Three-slot axis, one daily mean band per day, two output bands.
    assert_eq!(summary.axis.len(), 3);
    assert_eq!(summary.day_band_count, 3);
    assert_eq!(
        summary.output_bands,
        vec!["ndvi_p50_threshold", "ndvi_p90_threshold"]
    );
    assert_eq!(summary.pixels_skipped, 0);
    assert!(output.contains_band("ndvi_p50_threshold"));
    assert!(output.contains_band("ndvi_p90_threshold"));

    // Per-pixel series (row-major):
    //   pixel 0: [2, 4, 6]    pixel 1: [3, 6 (filled), 9]
    //   pixel 2: [4, 8, 12]   pixel 3: [5, 10, 15]
    // Nearest-rank over 3 samples: p50 -> index 1, p90 -> index 2.
    let full = PixelRect::full(&grid);
    let p50 = output.read_region("ndvi_p50_threshold", &full).unwrap();
    let p90 = output.read_region("ndvi_p90_threshold", &full).unwrap();
    assert_eq!(p50, vec![4.0, 6.0, 8.0, 10.0]);
    assert_eq!(p90, vec![6.0, 9.0, 12.0, 15.0]);
}

/// Inputs spanning a single day must fail before any aggregation begins.
#[test]
fn single_day_inputs_are_a_configuration_error() {
    init_logging();
    let grid = RasterGrid::new(2, 2);
    let morning = ArrayRaster::new(
        array![[1.0, 2.0], [3.0, 4.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 8, 0, 0).unwrap(),
    );
    let evening = ArrayRaster::new(
        array![[5.0, 6.0], [7.0, 8.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 20, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&morning, &evening];

    let processor = TemporalPercentileProcessor::new(params(vec![50]), grid).unwrap();
    let mut output = MemoryStore::new(grid);
    let err = processor
        .run(
            &rasters,
            &NearestResampler::new(),
            MemoryStore::new(grid),
            &mut output,
        )
        .unwrap_err();
    assert!(matches!(err, PercentileError::Configuration(_)));
    // Nothing was aggregated or written.
    assert!(output.band_names().is_empty());
}

/// Explicit start/end bounds drive the axis even when they exclude data.
#[test]
fn explicit_bounds_shape_the_axis() {
    init_logging();
    let grid = RasterGrid::new(1, 1);

    let may = ArrayRaster::new(
        array![[100.0]],
        Utc.with_ymd_and_hms(2012, 5, 20, 10, 0, 0).unwrap(),
    );
    let june1 = ArrayRaster::new(
        array![[1.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 10, 0, 0).unwrap(),
    );
    let june2 = ArrayRaster::new(
        array![[2.0]],
        Utc.with_ymd_and_hms(2012, 6, 2, 10, 0, 0).unwrap(),
    );
    let june4 = ArrayRaster::new(
        array![[4.0]],
        Utc.with_ymd_and_hms(2012, 6, 4, 10, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&may, &june1, &june2, &june4];

    let mut p = params(vec![100]);
    p.start_date = Some(Utc.with_ymd_and_hms(2012, 6, 1, 0, 0, 0).unwrap());
    p.end_date = Some(Utc.with_ymd_and_hms(2012, 6, 4, 0, 0, 0).unwrap());

    let processor = TemporalPercentileProcessor::new(p, grid).unwrap();
    let mut output = MemoryStore::new(grid);
    let summary = processor
        .run(
            &rasters,
            &NearestResampler::new(),
            MemoryStore::new(grid),
            &mut output,
        )
        .unwrap();

    // Axis runs June 1..=4; the May acquisition is excluded.
    assert_eq!(summary.axis.len(), 4);
    assert_eq!(summary.day_band_count, 3);

    // Series [1, 2, 3 (filled), 4]; p100 selects the maximum, which would be
    // 100.0 had the May raster leaked into the series.
    let out = output
        .read_region("ndvi_p100_threshold", &PixelRect::full(&grid))
        .unwrap();
    assert_eq!(out[0], 4.0);
}

/// Duplicate ranks collapse onto a single output band.
#[test]
fn duplicate_ranks_yield_one_band() {
    init_logging();
    let grid = RasterGrid::new(1, 1);
    let a = ArrayRaster::new(
        array![[1.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 10, 0, 0).unwrap(),
    );
    let b = ArrayRaster::new(
        array![[3.0]],
        Utc.with_ymd_and_hms(2012, 6, 2, 10, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&a, &b];

    let processor = TemporalPercentileProcessor::new(params(vec![90, 90, 50]), grid).unwrap();
    let mut output = MemoryStore::new(grid);
    let summary = processor
        .run(
            &rasters,
            &NearestResampler::new(),
            MemoryStore::new(grid),
            &mut output,
        )
        .unwrap();
    assert_eq!(
        summary.output_bands,
        vec!["ndvi_p90_threshold", "ndvi_p50_threshold"]
    );
}

/// The same scenario as the in-memory run, but with the intermediate series
/// persisted through the file-backed store and its write/read hand-off.
#[test]
fn end_to_end_with_file_backed_store() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let grid = RasterGrid::new(2, 2);

    let day1 = ArrayRaster::new(
        array![[2.0, 3.0], [4.0, 5.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 9, 30, 0).unwrap(),
    );
    let day2 = ArrayRaster::new(
        array![[4.0, 6.0], [8.0, 10.0]],
        Utc.with_ymd_and_hms(2012, 6, 2, 10, 0, 0).unwrap(),
    );
    let day3 = ArrayRaster::new(
        array![[6.0, 9.0], [12.0, 15.0]],
        Utc.with_ymd_and_hms(2012, 6, 3, 10, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&day1, &day2, &day3];

    let store = TimeSeriesWriter::create(dir.path(), grid).unwrap();
    let processor = TemporalPercentileProcessor::new(params(vec![50]), grid).unwrap();
    let mut output = MemoryStore::new(grid);
    let summary = processor
        .run(&rasters, &NearestResampler::new(), store, &mut output)
        .unwrap();
    assert_eq!(summary.day_band_count, 3);

    let p50 = output
        .read_region("ndvi_p50_threshold", &PixelRect::full(&grid))
        .unwrap();
    assert_eq!(p50, vec![4.0, 6.0, 8.0, 10.0]);

    // The intermediate store remains on disk as a reopenable product.
    let reopened = temporal_percentile::TimeSeriesReader::open(dir.path()).unwrap();
    assert_eq!(reopened.band_names().len(), 3);
}

/// Sources on a coarser grid are collocated onto the target grid.
#[test]
fn coarse_sources_are_resampled_onto_the_target_grid() {
    init_logging();
    let grid = RasterGrid::new(2, 2);
    let coarse_a = ArrayRaster::new(
        array![[2.0]],
        Utc.with_ymd_and_hms(2012, 6, 1, 10, 0, 0).unwrap(),
    );
    let coarse_b = ArrayRaster::new(
        array![[6.0]],
        Utc.with_ymd_and_hms(2012, 6, 2, 10, 0, 0).unwrap(),
    );
    let rasters: Vec<&dyn SourceRaster> = vec![&coarse_a, &coarse_b];

    let processor = TemporalPercentileProcessor::new(params(vec![0]), grid).unwrap();
    let mut output = MemoryStore::new(grid);
    processor
        .run(
            &rasters,
            &NearestResampler::new(),
            MemoryStore::new(grid),
            &mut output,
        )
        .unwrap();

    // Every target pixel sees the series [2, 6]; p0 selects the minimum.
    let out = output
        .read_region("ndvi_p0_threshold", &PixelRect::full(&grid))
        .unwrap();
    assert_eq!(out, vec![2.0, 2.0, 2.0, 2.0]);
}
