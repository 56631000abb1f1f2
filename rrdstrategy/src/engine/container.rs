//! In-memory state of one round-robin container.
//!
//! A container holds one or more data sources and one or more archives.
//! Updates are converted to rates, time-weighted into primary data points
//! (PDPs) of `step` seconds, and each completed PDP is fed to every archive.
//! An archive consolidates `steps` PDPs into one row of a fixed-size ring.
//!
//! # Ring layout
//!
//! Row slots are computed from timestamps:
//! `slot = (row_time / archive_step) % rows`. Rows are written in strict time
//! order without gaps, so the ring always holds the `rows` most recent rows
//! ending at `last_row_time`.

use serde::{Deserialize, Serialize};

use crate::definition::{ArchiveDef, ConsolidationFn, DataSourceDef, DataSourceType};
use crate::fetch::FetchResults;

/// Container format version.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Largest number of rows one fetch may return.
pub(crate) const MAX_FETCH_ROWS: i64 = 10_000_000;

const COUNTER_WRAP_32: f64 = 4_294_967_296.0;
const COUNTER_WRAP_64: f64 = 18_446_744_073_709_551_616.0;

/// Serialized container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Container {
    /// Format version.
    pub(crate) version: u32,
    /// PDP interval in seconds.
    pub(crate) step: u64,
    /// Time of the most recent accepted update.
    pub(crate) last_update: i64,
    sources: Vec<SourceState>,
    archives: Vec<ArchiveState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceState {
    #[serde(flatten)]
    def: DataSourceDef,
    /// Previous raw reading, for counter types.
    last_reading: Option<f64>,
    pdp: PdpPrep,
}

/// Accumulator for the PDP currently being filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PdpPrep {
    weighted_sum: f64,
    known_secs: u64,
    unknown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveState {
    #[serde(flatten)]
    def: ArchiveDef,
    last_row_time: i64,
    /// One accumulator per data source.
    cdp: Vec<CdpPrep>,
    /// Row-major: `rows * sources` values, `None` for unknown.
    ring: Vec<Option<f64>>,
}

/// Accumulator for the archive row currently being filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CdpPrep {
    value: Option<f64>,
    known: u64,
    unknown: u64,
}

impl Container {
    /// Builds an empty container.
    ///
    /// Time between the last PDP boundary before `last_update` and
    /// `last_update` itself counts as unknown.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )] // steps and row counts are small positive values
    pub(crate) fn new(
        step: u64,
        last_update: i64,
        sources: Vec<DataSourceDef>,
        archives: Vec<ArchiveDef>,
    ) -> Self {
        let pdp_offset = last_update.rem_euclid(step as i64) as u64;
        let source_count = sources.len();

        let sources = sources
            .into_iter()
            .map(|def| SourceState {
                def,
                last_reading: None,
                pdp: PdpPrep {
                    unknown_secs: pdp_offset,
                    ..PdpPrep::default()
                },
            })
            .collect();

        let pdp_time = last_update - pdp_offset as i64;
        let archives = archives
            .into_iter()
            .map(|def| {
                let archive_step = (step * def.steps) as i64;
                let last_row_time = last_update - last_update.rem_euclid(archive_step);
                // PDPs of the current row that elapsed before creation
                let elapsed = ((pdp_time - last_row_time) / step as i64) as u64;
                ArchiveState {
                    ring: vec![None; (def.rows as usize) * source_count],
                    cdp: vec![
                        CdpPrep {
                            unknown: elapsed,
                            ..CdpPrep::default()
                        };
                        source_count
                    ],
                    last_row_time,
                    def,
                }
            })
            .collect();

        Self {
            version: FORMAT_VERSION,
            step,
            last_update,
            sources,
            archives,
        }
    }

    /// Names of the data sources, in definition order.
    pub(crate) fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.def.name.as_str())
    }

    /// Position of a data source by name.
    pub(crate) fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.def.name == name)
    }

    /// Number of data sources.
    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Applies one update row: a timestamp and one reading per data source.
    ///
    /// # Errors
    ///
    /// Returns the engine message if the timestamp does not advance.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub(crate) fn update(&mut self, timestamp: i64, readings: &[Option<f64>]) -> Result<(), String> {
        if timestamp <= self.last_update {
            return Err(format!(
                "illegal attempt to update using time {timestamp} when last update time is {} (minimum one second step)",
                self.last_update
            ));
        }
        debug_assert_eq!(readings.len(), self.sources.len());

        let interval = (timestamp - self.last_update) as u64;
        let rates: Vec<Option<f64>> = self
            .sources
            .iter_mut()
            .zip(readings)
            .map(|(source, reading)| source.rate(*reading, interval))
            .collect();

        let step = self.step_i64();
        let first_boundary = (self.last_update.div_euclid(step) + 1) * step;
        if timestamp < first_boundary {
            self.accumulate(&rates, interval);
            self.last_update = timestamp;
            return Ok(());
        }

        self.accumulate(&rates, (first_boundary - self.last_update) as u64);
        self.complete_pdp(first_boundary);

        // Every whole PDP inside the interval carries the same rate
        let whole = ((timestamp - first_boundary) / step) as u64;
        if whole > 0 {
            let pdps: Vec<f64> = rates.iter().map(|r| r.unwrap_or(f64::NAN)).collect();
            let pdp_step = self.step;
            for archive in &mut self.archives {
                archive.push_repeated(first_boundary + step, whole, &pdps, pdp_step);
            }
        }

        let last_boundary = first_boundary + whole as i64 * step;
        self.accumulate(&rates, (timestamp - last_boundary) as u64);

        self.last_update = timestamp;
        Ok(())
    }

    /// Adds `secs` seconds at the given rates to the PDP being filled.
    #[allow(clippy::cast_precision_loss)]
    fn accumulate(&mut self, rates: &[Option<f64>], secs: u64) {
        for (source, rate) in self.sources.iter_mut().zip(rates) {
            match rate {
                Some(r) => {
                    source.pdp.weighted_sum += r * secs as f64;
                    source.pdp.known_secs += secs;
                }
                None => source.pdp.unknown_secs += secs,
            }
        }
    }

    /// Closes the current PDP at `boundary` and feeds it to every archive.
    #[allow(clippy::cast_precision_loss)]
    fn complete_pdp(&mut self, boundary: i64) {
        let pdps: Vec<f64> = self
            .sources
            .iter_mut()
            .map(|source| {
                let prep = std::mem::take(&mut source.pdp);
                if prep.known_secs == 0 || prep.unknown_secs > source.def.heartbeat {
                    f64::NAN
                } else {
                    prep.weighted_sum / prep.known_secs as f64
                }
            })
            .collect();

        let step = self.step;
        for archive in &mut self.archives {
            archive.push_pdp(boundary, &pdps, step);
        }
    }

    /// Reads consolidated rows covering `start..=end`.
    ///
    /// The archive is chosen among those using `cf`: the one with the
    /// resolution nearest `step` that still reaches back to `start`, or the one
    /// reaching back furthest when none does.
    ///
    /// # Errors
    ///
    /// Returns the engine message if the window is inverted, too long or out
    /// of range, or no archive uses `cf`.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub(crate) fn fetch(
        &self,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResults, String> {
        if start > end {
            return Err(format!("start ({start}) should be less than end ({end})"));
        }

        let archive = self
            .select_archive(cf, start, step)
            .ok_or_else(|| "the RRD does not contain an RRA matching the chosen CF".to_string())?;

        let archive_step = self.step * archive.def.steps;
        let archive_step_i = archive_step as i64;
        let overflow = || format!("fetch window {start}..{end} is out of range");
        let aligned_start = start
            .checked_sub(start.rem_euclid(archive_step_i))
            .ok_or_else(overflow)?;
        let aligned_end = end
            .checked_add(archive_step_i - end.rem_euclid(archive_step_i))
            .ok_or_else(overflow)?;
        let rows = aligned_end
            .checked_sub(aligned_start)
            .ok_or_else(overflow)?
            / archive_step_i;
        if rows > MAX_FETCH_ROWS {
            return Err(format!(
                "fetch window {start}..{end} spans {rows} rows of {archive_step}s, more than {MAX_FETCH_ROWS}"
            ));
        }
        let rows = rows as usize;

        let columns = self.source_names().map(str::to_string).collect();
        let values = (0..self.sources.len())
            .map(|source| {
                (1..=rows)
                    .map(|row| {
                        let ts = aligned_start + row as i64 * archive_step_i;
                        archive.read(ts, source, archive_step, self.sources.len())
                    })
                    .collect()
            })
            .collect();

        Ok(FetchResults::new(
            aligned_start + archive_step_i,
            aligned_end,
            archive_step,
            columns,
            values,
        ))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn select_archive(&self, cf: ConsolidationFn, start: i64, step: u64) -> Option<&ArchiveState> {
        let candidates = self.archives.iter().filter(|a| a.def.cf == cf);

        let reach = |a: &ArchiveState| {
            let archive_step = (self.step * a.def.steps) as i64;
            self.last_update - self.last_update.rem_euclid(archive_step) - a.def.rows as i64 * archive_step
        };

        let full = candidates
            .clone()
            .filter(|a| reach(*a) <= start)
            .min_by_key(|a| (self.step * a.def.steps).abs_diff(step));

        full.or_else(|| candidates.min_by_key(|a| (reach(*a), self.step * a.def.steps)))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn step_i64(&self) -> i64 {
        self.step as i64
    }
}

impl SourceState {
    /// Converts a raw reading into a rate over `interval` seconds.
    ///
    /// Always records the reading for the next counter delta.
    #[allow(clippy::cast_precision_loss)]
    fn rate(&mut self, reading: Option<f64>, interval: u64) -> Option<f64> {
        let previous = self.last_reading;
        self.last_reading = reading;

        let value = reading?;
        if interval > self.def.heartbeat {
            return None;
        }

        let secs = interval as f64;
        let rate = match self.def.kind {
            DataSourceType::Gauge => value,
            DataSourceType::Absolute => value / secs,
            DataSourceType::Derive => (value - previous?) / secs,
            DataSourceType::Counter => {
                let mut delta = value - previous?;
                if delta < 0.0 {
                    delta += COUNTER_WRAP_32;
                }
                if delta < 0.0 {
                    delta += COUNTER_WRAP_64 - COUNTER_WRAP_32;
                }
                delta / secs
            }
        };

        if !rate.is_finite() {
            return None;
        }
        if self.def.min.is_some_and(|min| rate < min) || self.def.max.is_some_and(|max| rate > max) {
            return None;
        }
        Some(rate)
    }
}

impl ArchiveState {
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    fn push_pdp(&mut self, boundary: i64, pdps: &[f64], step: u64) {
        let cf = self.def.cf;
        for (prep, pdp) in self.cdp.iter_mut().zip(pdps) {
            prep.add(cf, *pdp);
        }

        let archive_step = step * self.def.steps;
        if boundary.rem_euclid(archive_step as i64) != 0 {
            return;
        }

        let tolerated = self.def.xff * self.def.steps as f64;
        let row: Vec<Option<f64>> = self
            .cdp
            .iter_mut()
            .map(|prep| {
                let prep = std::mem::take(prep);
                let value = prep.value.map(|v| {
                    if cf == ConsolidationFn::Average {
                        v / prep.known as f64
                    } else {
                        v
                    }
                });
                if prep.unknown as f64 > tolerated { None } else { value }
            })
            .collect();

        self.write_row(boundary, &row, archive_step);
    }

    /// Feeds `count` identical PDPs, the first closing at `first`.
    ///
    /// Rows made only of these PDPs are written directly, and only the last
    /// `rows` of them since older ones would be overwritten.
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn push_repeated(&mut self, first: i64, count: u64, pdps: &[f64], step: u64) {
        let step_i = step as i64;
        let archive_step = step * self.def.steps;
        let archive_step_i = archive_step as i64;

        // Finish the row in progress
        let mut boundary = first;
        let mut remaining = count;
        while remaining > 0 {
            let completes_row = boundary.rem_euclid(archive_step_i) == 0;
            self.push_pdp(boundary, pdps, step);
            boundary += step_i;
            remaining -= 1;
            if completes_row {
                break;
            }
        }

        let full_rows = remaining / self.def.steps;
        if full_rows > 0 {
            let row: Vec<Option<f64>> = pdps.iter().map(|p| (!p.is_nan()).then_some(*p)).collect();
            let row_origin = boundary - step_i;
            for k in full_rows.saturating_sub(self.def.rows)..full_rows {
                self.write_row(row_origin + (k as i64 + 1) * archive_step_i, &row, archive_step);
            }
            boundary += full_rows as i64 * archive_step_i;
            remaining -= full_rows * self.def.steps;
        }

        for _ in 0..remaining {
            self.push_pdp(boundary, pdps, step);
            boundary += step_i;
        }
    }

    fn write_row(&mut self, row_time: i64, values: &[Option<f64>], archive_step: u64) {
        let base = self.slot(row_time, archive_step) * values.len();
        self.ring[base..base + values.len()].copy_from_slice(values);
        self.last_row_time = row_time;
    }

    /// Reads one value, NaN when the row is outside the retained window.
    #[allow(clippy::cast_possible_wrap)]
    fn read(&self, row_time: i64, source: usize, archive_step: u64, source_count: usize) -> f64 {
        let archive_step_i = archive_step as i64;
        let oldest = self.last_row_time - (self.def.rows as i64 - 1) * archive_step_i;
        if row_time > self.last_row_time || row_time < oldest {
            return f64::NAN;
        }
        let index = self.slot(row_time, archive_step) * source_count + source;
        self.ring[index].unwrap_or(f64::NAN)
    }

    #[inline]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn slot(&self, row_time: i64, archive_step: u64) -> usize {
        (row_time.div_euclid(archive_step as i64).rem_euclid(self.def.rows as i64)) as usize
    }
}

impl CdpPrep {
    fn add(&mut self, cf: ConsolidationFn, pdp: f64) {
        if pdp.is_nan() {
            self.unknown += 1;
            return;
        }
        self.known += 1;
        self.value = Some(match (self.value, cf) {
            (None, _) => pdp,
            (Some(v), ConsolidationFn::Average) => v + pdp,
            (Some(v), ConsolidationFn::Min) => v.min(pdp),
            (Some(v), ConsolidationFn::Max) => v.max(pdp),
            (Some(_), ConsolidationFn::Last) => pdp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_424_700_000;

    fn gauge_container(step: u64, rras: &[&str]) -> Container {
        Container::new(
            step,
            START,
            vec![
                DataSourceDef::parse("DS:x:GAUGE:900:0:100").unwrap(),
                DataSourceDef::parse("DS:y:GAUGE:900:0:100").unwrap(),
            ],
            rras.iter().map(|r| ArchiveDef::parse(r).unwrap()).collect(),
        )
    }

    #[test]
    fn test_aligned_updates_are_recoverable() {
        let mut c = gauge_container(900, &["RRA:MIN:0.5:1:1000"]);
        for i in 1..=10i64 {
            c.update(START + i * 900, &[Some(i as f64), Some(100.0)]).unwrap();
        }

        let r = c.fetch(ConsolidationFn::Min, START, START + 9000, 1).unwrap();
        assert_eq!(r.step(), 900);
        assert_eq!(r.start(), START + 900);
        assert_eq!(r.columns(), &["x".to_string(), "y".to_string()]);
        for i in 0..10 {
            assert_eq!(r.values()[0][i], (i + 1) as f64);
            assert_eq!(r.values()[1][i], 100.0);
        }
    }

    #[test]
    fn test_update_requires_advancing_time() {
        let mut c = gauge_container(900, &["RRA:AVERAGE:0.5:1:10"]);
        assert!(c.update(START, &[Some(1.0), Some(1.0)]).is_err());
        c.update(START + 900, &[Some(1.0), Some(1.0)]).unwrap();
        let err = c.update(START + 900, &[Some(1.0), Some(1.0)]).unwrap_err();
        assert!(err.contains("minimum one second step"));
    }

    #[test]
    fn test_heartbeat_gap_is_unknown() {
        let mut c = gauge_container(900, &["RRA:AVERAGE:0.5:1:100"]);
        c.update(START + 900, &[Some(5.0), Some(5.0)]).unwrap();
        // 1800s gap exceeds the 900s heartbeat
        c.update(START + 2700, &[Some(7.0), Some(7.0)]).unwrap();

        let r = c.fetch(ConsolidationFn::Average, START, START + 2700, 900).unwrap();
        let x = &r.values()[0];
        assert_eq!(x[0], 5.0);
        assert!(x[1].is_nan());
        assert!(x[2].is_nan());
    }

    #[test]
    fn test_out_of_range_reading_is_unknown() {
        let mut c = gauge_container(900, &["RRA:AVERAGE:0.5:1:100"]);
        c.update(START + 900, &[Some(150.0), Some(50.0)]).unwrap();

        let r = c.fetch(ConsolidationFn::Average, START, START + 900, 900).unwrap();
        assert!(r.values()[0][0].is_nan());
        assert_eq!(r.values()[1][0], 50.0);
    }

    #[test]
    fn test_counter_rate() {
        let mut c = Container::new(
            300,
            START,
            vec![DataSourceDef::parse("DS:octets:COUNTER:600:U:U").unwrap()],
            vec![ArchiveDef::parse("RRA:AVERAGE:0.5:1:100").unwrap()],
        );
        c.update(START + 300, &[Some(1000.0)]).unwrap();
        c.update(START + 600, &[Some(4000.0)]).unwrap();

        let r = c.fetch(ConsolidationFn::Average, START, START + 600, 300).unwrap();
        // First reading has no predecessor
        assert!(r.values()[0][0].is_nan());
        assert_eq!(r.values()[0][1], 10.0);
    }

    #[test]
    fn test_consolidated_archive() {
        let mut c = gauge_container(900, &["RRA:AVERAGE:0.5:1:100", "RRA:MAX:0.5:4:100"]);
        for i in 1..=8i64 {
            c.update(START + i * 900, &[Some(i as f64), Some(0.0)]).unwrap();
        }

        let r = c.fetch(ConsolidationFn::Max, START, START + 7200, 3600).unwrap();
        assert_eq!(r.step(), 3600);
        assert_eq!(r.values()[0][0], 4.0);
        assert_eq!(r.values()[0][1], 8.0);
    }

    #[test]
    fn test_fetch_rejects_unknown_cf_and_inverted_window() {
        let c = gauge_container(900, &["RRA:MIN:0.5:1:100"]);
        assert!(c.fetch(ConsolidationFn::Average, START, START + 900, 1).is_err());
        assert!(c.fetch(ConsolidationFn::Min, START + 900, START, 1).is_err());
    }

    #[test]
    fn test_ring_wraps() {
        let mut c = gauge_container(900, &["RRA:LAST:0.5:1:5"]);
        for i in 1..=12i64 {
            c.update(START + i * 900, &[Some(i as f64), Some(0.0)]).unwrap();
        }

        let r = c.fetch(ConsolidationFn::Last, START, START + 12 * 900, 900).unwrap();
        let x = &r.values()[0];
        // Only the five most recent rows survive
        assert!(x[6].is_nan());
        assert_eq!(&x[7..12], &[8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_fetch_rejects_out_of_range_windows() {
        let mut c = gauge_container(1, &["RRA:AVERAGE:0.5:1:600"]);
        c.update(START + 1, &[Some(1.0), Some(1.0)]).unwrap();

        let err = c.fetch(ConsolidationFn::Average, 0, i64::MAX, 1).unwrap_err();
        assert!(err.contains("out of range"));
        assert!(c.fetch(ConsolidationFn::Average, 0, i64::MAX - 1, 1).is_err());
        assert!(c.fetch(ConsolidationFn::Average, i64::MIN, START, 1).is_err());

        let err = c.fetch(ConsolidationFn::Average, 0, START, 1).unwrap_err();
        assert!(err.contains("rows"));

        let r = c.fetch(ConsolidationFn::Average, START - 86_400, START, 1).unwrap();
        assert_eq!(r.row_count(), 86_401);
    }

    #[test]
    fn test_long_gap_fills_archives_in_bulk() {
        let mut c = Container::new(
            60,
            START,
            vec![DataSourceDef::parse("DS:x:GAUGE:1000000000:U:U").unwrap()],
            vec![
                ArchiveDef::parse("RRA:LAST:0.5:1:5").unwrap(),
                ArchiveDef::parse("RRA:AVERAGE:0.5:10:3").unwrap(),
            ],
        );
        c.update(START + 60, &[Some(1.0)]).unwrap();
        c.update(START + 60_030, &[Some(2.0)]).unwrap();

        let r = c.fetch(ConsolidationFn::Last, START + 59_700, START + 60_000, 60).unwrap();
        assert_eq!(r.values()[0][..5], [2.0; 5]);
        assert!(r.values()[0][5].is_nan());

        let r = c.fetch(ConsolidationFn::Average, START + 58_200, START + 60_000, 600).unwrap();
        assert_eq!(r.values()[0][..3], [2.0; 3]);

        // The trailing half step is still pending
        c.update(START + 60_060, &[Some(4.0)]).unwrap();
        let r = c.fetch(ConsolidationFn::Last, START + 60_000, START + 60_060, 60).unwrap();
        assert_eq!(r.values()[0][0], 3.0);
    }

    #[test]
    fn test_far_future_update_marks_gap_unknown() {
        let mut c = gauge_container(900, &["RRA:AVERAGE:0.5:1:100", "RRA:MAX:0.5:4:10"]);
        c.update(START + 900, &[Some(5.0), Some(5.0)]).unwrap();
        c.update(START + 900 * 1000, &[Some(7.0), Some(7.0)]).unwrap();
        c.update(START + 900 * 1001, &[Some(8.0), Some(8.0)]).unwrap();

        let r = c
            .fetch(ConsolidationFn::Average, START + 900 * 995, START + 900 * 1000, 900)
            .unwrap();
        let x = &r.values()[0];
        assert!(x[..5].iter().all(|v| v.is_nan()));
        assert_eq!(x[5], 8.0);

        // One year ahead at one-second resolution
        let mut c = gauge_container(1, &["RRA:AVERAGE:0.5:1:600", "RRA:MAX:0.5:60:24"]);
        c.update(START + 30_000_000, &[Some(1.0), Some(1.0)]).unwrap();
        c.update(START + 30_000_001, &[Some(9.0), Some(9.0)]).unwrap();
        let r = c
            .fetch(ConsolidationFn::Average, START + 29_999_990, START + 30_000_000, 1)
            .unwrap();
        assert!(r.values()[0][..10].iter().all(|v| v.is_nan()));
        assert_eq!(r.values()[0][10], 9.0);
    }
}
