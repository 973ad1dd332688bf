//! Normalized real-time records and the static entities they are joined with.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

/// Where a vehicle is relative to its current stop.
///
/// Absence is modelled as `Option::None` on [`VehiclePosition`], which is
/// "unknown" and must not be read as [`VehicleStatus::InTransit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    IncomingAt,
    StoppedAt,
    InTransit,
}

/// One vehicle as reported by a single fetch of the real-time feed.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub license_plate: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<f64>,
    /// Meters per second, as reported upstream.
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Set when upstream omitted the timestamp and the fetch time stands in.
    pub timestamp_approximate: bool,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub current_status: Option<VehicleStatus>,
    pub current_stop_sequence: Option<u32>,
}

impl VehiclePosition {
    pub fn speed_kmh(&self) -> Option<f64> {
        self.speed_mps.map(|mps| mps * 3.6)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub code: String,
    pub description: String,
    pub description_el: String,
    pub description_en: String,
    pub lat: f64,
    pub lon: f64,
}

/// Service window for one day type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DaySchedule {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    /// Trips per hour, as published with the route.
    pub frequency: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteSchedule {
    pub weekday: DaySchedule,
    pub saturday: DaySchedule,
    pub holiday: DaySchedule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub route_id: String,
    pub line_name: Option<String>,
    pub route_name: Option<String>,
    pub description: Option<String>,
    pub direction: Option<String>,
    pub length_km: Option<f64>,
    pub first_stop: Option<String>,
    pub last_stop: Option<String>,
    /// Ordered, comma separated stop codes as published with the route.
    pub stops_list: Option<String>,
    /// `[lon, lat]` pairs.
    pub geometry: Vec<[f64; 2]>,
    pub color: String,
    pub schedule: RouteSchedule,
}

/// A stop's position along a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteStop {
    pub route_id: String,
    pub stop_code: String,
    pub sequence: u32,
}
