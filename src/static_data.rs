//! Loading of the static stop/route dataset and the catalog built from it.
//!
//! A static directory holds:
//!
//! | file | required | format |
//! |------|----------|--------|
//! | `stops.csv` | yes | `;` separated, decimal commas allowed |
//! | `routes.geojson` | yes | FeatureCollection of route polylines |
//! | `trips.txt` | no | GTFS trips |
//! | `stop_times.txt` | no | GTFS stop times |
//!
//! Any file may instead be present gzip-compressed with a `.gz` suffix.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveTime;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::model::{DaySchedule, Route, RouteSchedule, Stop};
use crate::route_index::{RouteStopIndex, StopTime, TripRoute};

const STOPS_FILE: &str = "stops.csv";
const ROUTES_FILE: &str = "routes.geojson";
const TRIPS_FILE: &str = "trips.txt";
const STOP_TIMES_FILE: &str = "stop_times.txt";

/// Color used when a route has none and none can be derived.
pub const DEFAULT_ROUTE_COLOR: &str = "#666666";

/// Which construction path produced the route-stop index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexSource {
    StopTimes,
    StopLists,
}

/// Stops, routes and the route-stop index, loaded together and replaced
/// together.
#[derive(Debug)]
pub struct StaticCatalog {
    pub stops: BTreeMap<String, Stop>,
    pub routes: BTreeMap<String, Route>,
    pub index: RouteStopIndex,
    pub index_source: IndexSource,
}

impl StaticCatalog {
    /// Loads every file of a static directory and builds the index, from stop
    /// times when both GTFS files exist, otherwise from route stop lists.
    #[tracing::instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self> {
        let stops_path = locate(dir, STOPS_FILE)
            .with_context(|| format!("{STOPS_FILE} not found in {}", dir.display()))?;
        let routes_path = locate(dir, ROUTES_FILE)
            .with_context(|| format!("{ROUTES_FILE} not found in {}", dir.display()))?;

        let stops = load_stops(&stops_path)?;
        let routes = load_routes(&routes_path)?;

        let schedule = match (locate(dir, TRIPS_FILE), locate(dir, STOP_TIMES_FILE)) {
            (Some(trips), Some(stop_times)) => {
                Some((load_trips(&trips)?, load_stop_times(&stop_times)?))
            }
            _ => {
                info!("No trips/stop_times found, using route stop lists");
                None
            }
        };

        Ok(Self::from_parts(stops, routes, schedule))
    }

    pub fn from_parts(
        stops: BTreeMap<String, Stop>,
        routes: BTreeMap<String, Route>,
        schedule: Option<(Vec<TripRoute>, Vec<StopTime>)>,
    ) -> Self {
        let (index, index_source) = match schedule {
            Some((trips, stop_times)) => (
                RouteStopIndex::from_stop_times(&routes, &stops, &trips, &stop_times),
                IndexSource::StopTimes,
            ),
            None => (
                RouteStopIndex::from_stop_lists(&routes, &stops),
                IndexSource::StopLists,
            ),
        };

        Self {
            stops,
            routes,
            index,
            index_source,
        }
    }
}

/// `name` or `name.gz` inside `dir`, whichever exists first.
fn locate(dir: &Path, name: &str) -> Option<PathBuf> {
    let plain = dir.join(name);
    if plain.is_file() {
        return Some(plain);
    }
    let gz = dir.join(format!("{name}.gz"));
    gz.is_file().then_some(gz)
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

#[derive(Debug, Deserialize)]
struct StopRow {
    code: String,
    description: String,
    #[serde(rename = "description[el]")]
    description_el: String,
    #[serde(rename = "description[en]")]
    description_en: String,
    lat: String,
    lon: String,
}

/// Reads `stops.csv`. Rows that fail to parse are logged and skipped; a code
/// seen twice keeps its last row.
pub fn load_stops(path: &Path) -> Result<BTreeMap<String, Stop>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(open(path)?);

    let mut stops = BTreeMap::new();
    let mut errors = 0usize;

    for (line, row) in reader.deserialize::<StopRow>().enumerate() {
        let parsed = row.map_err(anyhow::Error::from).and_then(|row| {
            Ok(Stop {
                lat: parse_decimal(&row.lat).context("bad lat")?,
                lon: parse_decimal(&row.lon).context("bad lon")?,
                code: row.code,
                description: row.description,
                description_el: row.description_el,
                description_en: row.description_en,
            })
        });

        match parsed {
            Ok(stop) if stop.code.is_empty() => {
                errors += 1;
                warn!(row = line + 2, "Skipping stop without code");
            }
            Ok(stop) => {
                if stops.insert(stop.code.clone(), stop).is_some() {
                    debug!(row = line + 2, "Duplicate stop code, keeping last row");
                }
            }
            Err(e) => {
                errors += 1;
                warn!(row = line + 2, error = %e, "Skipping stop row");
            }
        }
    }

    info!(stops = stops.len(), errors, path = %path.display(), "Stops loaded");
    Ok(stops)
}

/// Reads `routes.geojson`. Property names are accepted in lower case or in
/// the upper-case shapefile column spelling.
pub fn load_routes(path: &Path) -> Result<BTreeMap<String, Route>> {
    let collection: FeatureCollection = serde_json::from_reader(open(path)?)
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut routes = BTreeMap::new();
    let mut skipped = 0usize;
    let mut duplicates = 0usize;

    for feature in collection.features {
        match route_from_feature(feature) {
            Some(route) => {
                let route_id = route.route_id.clone();
                if routes.insert(route_id.clone(), route).is_some() {
                    duplicates += 1;
                    warn!(route_id = %route_id, "Duplicate route id, keeping last feature");
                }
            }
            None => {
                skipped += 1;
                warn!("Skipping route feature without an id or line name");
            }
        }
    }

    info!(routes = routes.len(), skipped, duplicates, path = %path.display(), "Routes loaded");
    Ok(routes)
}

pub fn load_trips(path: &Path) -> Result<Vec<TripRoute>> {
    load_gtfs_rows(path)
}

pub fn load_stop_times(path: &Path) -> Result<Vec<StopTime>> {
    load_gtfs_rows(path)
}

fn load_gtfs_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(open(path)?);

    let mut rows = Vec::new();
    let mut errors = 0usize;
    for row in reader.deserialize::<T>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                errors += 1;
                debug!(error = %e, "Skipping GTFS row");
            }
        }
    }

    if errors > 0 {
        warn!(errors, path = %path.display(), "Some GTFS rows could not be read");
    }
    info!(rows = rows.len(), path = %path.display(), "GTFS file loaded");
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    LineString { coordinates: Vec<Vec<f64>> },
    MultiLineString { coordinates: Vec<Vec<Vec<f64>>> },
    #[serde(other)]
    Unsupported,
}

fn route_from_feature(feature: Feature) -> Option<Route> {
    let props = feature.properties.unwrap_or_default();
    let get = |keys: &[&str]| text(&props, keys);

    // shapefile exports leave `ID` empty or zero, so the line name keys routes
    let line_name = get(&["line_name", "LINE_NAME_"]);
    let route_id = get(&["route_id"])
        .or_else(|| line_name.clone())
        .or_else(|| get(&["ID"]))?;

    let geometry = match feature.geometry {
        Some(Geometry::LineString { coordinates }) => polyline(coordinates),
        Some(Geometry::MultiLineString { coordinates }) => {
            let parts = coordinates.len();
            let longest = coordinates
                .into_iter()
                .map(polyline)
                .max_by_key(Vec::len)
                .unwrap_or_default();
            if parts > 1 {
                warn!(route_id = %route_id, parts, "Route has a multi-part line, keeping the longest part");
            }
            longest
        }
        Some(Geometry::Unsupported) | None => {
            warn!(route_id = %route_id, "Route has no line geometry");
            Vec::new()
        }
    };

    let color = get(&["color", "COLOR"])
        .filter(|c| is_hex_color(c))
        .unwrap_or_else(|| generate_color(&route_id));

    let day = |start: &[&str], end: &[&str], frequency: &[&str]| DaySchedule {
        start: get(start).as_deref().and_then(parse_time),
        end: get(end).as_deref().and_then(parse_time),
        frequency: get(frequency).as_deref().and_then(|f| parse_decimal(f).ok()),
    };

    Some(Route {
        line_name,
        route_name: get(&["route_name", "ROUTE_NAME"]),
        description: get(&["description", "DESCRIPTIO"]),
        direction: get(&["direction", "DIRECTION"]),
        length_km: get(&["length", "LINE_LENGT"])
            .as_deref()
            .and_then(|l| parse_decimal(l).ok()),
        first_stop: get(&["first_stop", "FIRST_STOP"]),
        last_stop: get(&["last_stop", "LAST_STOP_"]),
        stops_list: get(&["stops", "STOPS"]),
        geometry,
        color,
        schedule: RouteSchedule {
            weekday: day(
                &["wd_start", "WD_START_H"],
                &["wd_end", "WD_LAST_HO"],
                &["wd_frequency"],
            ),
            saturday: day(
                &["sat_start", "SAT_START_"],
                &["sat_end", "SAT_LAST_H"],
                &["sat_frequency"],
            ),
            holiday: day(
                &["hol_start", "HOL_START_"],
                &["hol_end", "HOL_LAST_H"],
                &["hol_frequency"],
            ),
        },
        route_id,
    })
}

/// First non-empty property among `keys`, numbers rendered as text.
fn text(props: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match props.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn polyline(coordinates: Vec<Vec<f64>>) -> Vec<[f64; 2]> {
    coordinates
        .into_iter()
        .filter_map(|c| match c.as_slice() {
            [lon, lat, ..] => Some([*lon, *lat]),
            _ => None,
        })
        .collect()
}

fn parse_decimal(value: &str) -> Result<f64> {
    Ok(value.trim().replace(',', ".").parse::<f64>()?)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Stable color for a route id (FNV-1a, low 24 bits).
pub fn generate_color(route_id: &str) -> String {
    if route_id.is_empty() {
        return DEFAULT_ROUTE_COLOR.to_string();
    }
    let hash = route_id.bytes().fold(0x811c_9dc5_u32, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    format!("#{:06x}", hash & 0x00ff_ffff)
}
