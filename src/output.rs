//! Console output for one-shot runs and the route-stop CSV export.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::route_index::RouteStopIndex;
use crate::stats::FeedStats;

/// Logs a one-line summary of what a normalization pass kept.
pub fn print_summary(stats: &FeedStats) {
    info!(
        entities = stats.total_entities,
        vehicles = stats.vehicles,
        accepted = stats.accepted,
        accepted_pct = stats.accepted_pct(),
        missing_id = stats.skipped_missing_id,
        missing_position = stats.skipped_missing_position,
        invalid_coordinates = stats.skipped_invalid_coordinates,
        approximate_timestamps = stats.approximate_timestamps,
        "Feed normalized"
    );
    debug!("{:#?}", stats);
}

/// Writes `value` to `out` as pretty-printed JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Writes every route-stop association as `route_id,stop_code,sequence`.
///
/// Any existing file is truncated, so rerunning with the same index yields
/// the same file. Returns the number of rows written.
pub fn write_route_stops(path: &Path, index: &RouteStopIndex) -> Result<usize> {
    debug!(path = %path.display(), "Writing route stops");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    let mut rows = 0;
    for route_stop in index.route_stops() {
        writer.serialize(&route_stop)?;
        rows += 1;
    }
    writer.flush()?;

    info!(path = %path.display(), rows, "Route stops written");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Route, RouteSchedule, Stop};
    use std::collections::BTreeMap;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn index() -> RouteStopIndex {
        let stops: BTreeMap<String, Stop> = ["1", "2", "3"]
            .into_iter()
            .map(|code| {
                let stop = Stop {
                    code: code.to_string(),
                    description: String::new(),
                    description_el: String::new(),
                    description_en: String::new(),
                    lat: 35.0,
                    lon: 33.0,
                };
                (code.to_string(), stop)
            })
            .collect();
        let routes: BTreeMap<String, Route> = [("A", "3,1"), ("B", "2")]
            .into_iter()
            .map(|(id, list)| {
                let route = Route {
                    route_id: id.to_string(),
                    line_name: None,
                    route_name: None,
                    description: None,
                    direction: None,
                    length_km: None,
                    first_stop: None,
                    last_stop: None,
                    stops_list: Some(list.to_string()),
                    geometry: Vec::new(),
                    color: "#000000".to_string(),
                    schedule: RouteSchedule::default(),
                };
                (id.to_string(), route)
            })
            .collect();
        RouteStopIndex::from_stop_lists(&routes, &stops)
    }

    #[test]
    fn test_print_summary_does_not_panic() {
        print_summary(&FeedStats::default());
    }

    #[test]
    fn test_write_json_appends_newline() {
        let mut buf = Vec::new();
        write_json(&mut buf, &FeedStats::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"accepted\": 0"));
    }

    #[test]
    fn test_write_route_stops_rows() {
        let path = temp_path("gtfs_rt_map_test_route_stops.csv");
        let _ = fs::remove_file(&path);

        let rows = write_route_stops(&path, &index()).unwrap();
        assert_eq!(rows, 3);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines,
            ["route_id,stop_code,sequence", "A,3,1", "A,1,2", "B,2,1"]
        );

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_route_stops_is_idempotent() {
        let path = temp_path("gtfs_rt_map_test_route_stops_rerun.csv");
        let _ = fs::remove_file(&path);

        write_route_stops(&path, &index()).unwrap();
        let first = fs::read_to_string(&path).unwrap();
        write_route_stops(&path, &index()).unwrap();
        let second = fs::read_to_string(&path).unwrap();

        // header appears once and no rows are duplicated
        assert_eq!(first, second);
        assert_eq!(second.lines().count(), 4);

        fs::remove_file(&path).unwrap();
    }
}
