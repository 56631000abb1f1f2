//! Last-value queries built on top of fetch.
//!
//! Both queries absorb storage failures: the error is logged and the caller
//! gets `None`. Times are passed in milliseconds and converted to the engine's
//! seconds before fetching.

use std::path::Path;

use crate::binding::Rrd;
use crate::definition::ConsolidationFn;
use crate::engine::RrdEngine;
use crate::fetch::FetchResults;

/// Returns the newest value of `ds` in a window centred on `now_millis`.
///
/// The window is `now - interval/1000 .. now + interval/1000` seconds with a
/// step of one second. If `ds` names several columns the last one is used.
///
/// Returns `None` if the fetch fails, `ds` is not a column, or the window
/// holds no rows.
pub fn last_value<E: RrdEngine>(
    rrd: &Rrd<E>,
    target: impl AsRef<Path>,
    ds: &str,
    cf: ConsolidationFn,
    interval_millis: i64,
    now_millis: i64,
) -> Option<f64> {
    let target = target.as_ref();
    let now = now_millis / 1000;
    let half_window = interval_millis / 1000;

    let results = fetch_logged(rrd, target, cf, now - half_window, now + half_window)?;
    let column = resolve_column(&results, target, ds)?;
    column.last().copied()
}

/// Returns the newest non-NaN value of `ds` between the last interval
/// boundary and `range_millis` before it.
///
/// `latest` is `now_millis` rounded down to a multiple of `interval_millis`
/// and `earliest` is `latest - range_millis`. Rows are fetched with
/// [`ConsolidationFn::Average`] and scanned newest first. If every row is NaN
/// the oldest row's value (NaN) is returned.
///
/// Returns `None` if the fetch fails, `ds` is not a column, or the range holds
/// no rows.
pub fn last_value_in_range<E: RrdEngine>(
    rrd: &Rrd<E>,
    target: impl AsRef<Path>,
    ds: &str,
    interval_millis: i64,
    range_millis: i64,
    now_millis: i64,
) -> Option<f64> {
    let target = target.as_ref();
    let latest_millis = if interval_millis > 0 {
        now_millis - now_millis.rem_euclid(interval_millis)
    } else {
        now_millis
    };
    let latest = latest_millis / 1000;
    let earliest = (latest_millis - range_millis) / 1000;

    let results = fetch_logged(rrd, target, ConsolidationFn::Average, earliest, latest)?;
    let column = resolve_column(&results, target, ds)?;

    for value in column.iter().rev() {
        if value.is_nan() {
            tracing::debug!("{ds}: NaN value, continuing back in time");
        } else {
            tracing::debug!("{ds}: last value in range is {value}");
            return Some(*value);
        }
    }
    column.first().copied()
}

fn fetch_logged<E: RrdEngine>(
    rrd: &Rrd<E>,
    target: &Path,
    cf: ConsolidationFn,
    start: i64,
    end: i64,
) -> Option<FetchResults> {
    match rrd.fetch(target, cf, start, end, 1) {
        Ok(results) => Some(results),
        Err(e) => {
            tracing::error!("fetch failed: {e}");
            None
        }
    }
}

fn resolve_column<'a>(results: &'a FetchResults, target: &Path, ds: &str) -> Option<&'a [f64]> {
    let Some(column) = results.column(ds) else {
        tracing::warn!("no column named '{ds}' in {}", target.display());
        return None;
    };
    if column.is_empty() {
        tracing::warn!("fetch of '{ds}' from {} returned no rows", target.display());
        return None;
    }
    Some(column)
}
