use crate::io::source::SourceRaster;
use crate::types::{DayIndex, PercentileError, PercentileResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Rasters of one acquisition day, ordered by arrival.
pub type DailyGroups<'a> = BTreeMap<DayIndex, Vec<&'a dyn SourceRaster>>;

fn mjd_epoch() -> NaiveDate {
    // 1858-11-17, day zero of the Modified Julian Day count.
    NaiveDate::from_ymd_opt(1858, 11, 17).expect("MJD epoch is a valid date")
}

/// Day index (MJD) of a UTC timestamp. The time of day is discarded; all
/// acquisitions of one calendar day share one index.
pub fn day_index(timestamp: &DateTime<Utc>) -> DayIndex {
    (timestamp.date_naive() - mjd_epoch()).num_days()
}

/// Calendar date of a day index, for band naming and logging.
pub fn day_index_date(day: DayIndex) -> NaiveDate {
    mjd_epoch() + Duration::days(day)
}

/// Partition input rasters by acquisition day.
///
/// Arrival order is preserved within each day. Fewer than two distinct days
/// cannot define an interpolated series and is a configuration error.
pub fn group_by_day<'a>(rasters: &[&'a dyn SourceRaster]) -> PercentileResult<DailyGroups<'a>> {
    let mut groups: DailyGroups<'a> = BTreeMap::new();
    for raster in rasters {
        let day = day_index(&raster.timestamp());
        groups.entry(day).or_default().push(*raster);
    }

    if groups.len() < 2 {
        return Err(PercentileError::Configuration(
            "interpolated percentile calculation requires input products from at least two distinct days"
                .to_string(),
        ));
    }

    log::info!(
        "grouped {} input rasters into {} acquisition days",
        rasters.len(),
        groups.len()
    );
    Ok(groups)
}
