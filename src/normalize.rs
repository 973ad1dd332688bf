//! Mapping of decoded feed entities onto [`VehiclePosition`] records.
//!
//! Field presence is checked once here; everything downstream works with
//! plain `Option`s.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::gtfs_rt::vehicle_position::VehicleStopStatus;
use crate::gtfs_rt::{FeedEntity, FeedMessage};
use crate::model::{VehiclePosition, VehicleStatus};
use crate::stats::FeedStats;

/// Why an entity produced no position. Not an error: the cycle carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Trip update, alert, or an empty entity.
    NotAVehicle,
    MissingVehicleId,
    MissingPosition,
    /// Non-finite, out of range, or the `(0, 0)` "no fix" placeholder.
    InvalidCoordinates,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Position(VehiclePosition),
    Skip(SkipReason),
}

/// Normalizes one entity. `fetched_at` stands in for a missing timestamp.
pub fn normalize(entity: &FeedEntity, fetched_at: DateTime<Utc>) -> Normalized {
    let Some(vp) = &entity.vehicle else {
        return Normalized::Skip(SkipReason::NotAVehicle);
    };

    let Some(vehicle_id) = vp
        .vehicle
        .as_ref()
        .and_then(|v| v.id.as_deref())
        .and_then(non_empty)
    else {
        return Normalized::Skip(SkipReason::MissingVehicleId);
    };

    let Some(position) = &vp.position else {
        return Normalized::Skip(SkipReason::MissingPosition);
    };
    let latitude = f64::from(position.latitude);
    let longitude = f64::from(position.longitude);
    if !valid_coordinates(latitude, longitude) {
        return Normalized::Skip(SkipReason::InvalidCoordinates);
    }

    let (timestamp, timestamp_approximate) = match vp.timestamp.and_then(epoch_to_utc) {
        Some(ts) => (ts, false),
        None => (fetched_at, true),
    };

    let trip = vp.trip.as_ref();

    Normalized::Position(VehiclePosition {
        vehicle_id,
        license_plate: vp
            .vehicle
            .as_ref()
            .and_then(|v| v.license_plate.as_deref())
            .and_then(non_empty),
        latitude,
        longitude,
        bearing: position
            .bearing
            .map(f64::from)
            .filter(|b| b.is_finite()),
        speed_mps: position
            .speed
            .map(f64::from)
            .filter(|s| s.is_finite() && *s >= 0.0),
        timestamp,
        timestamp_approximate,
        route_id: trip.and_then(|t| t.route_id.as_deref()).and_then(non_empty),
        trip_id: trip.and_then(|t| t.trip_id.as_deref()).and_then(non_empty),
        current_status: vp
            .current_status
            .and_then(|raw| VehicleStopStatus::try_from(raw).ok())
            .map(|status| match status {
                VehicleStopStatus::IncomingAt => VehicleStatus::IncomingAt,
                VehicleStopStatus::StoppedAt => VehicleStatus::StoppedAt,
                VehicleStopStatus::InTransitTo => VehicleStatus::InTransit,
            }),
        current_stop_sequence: vp.current_stop_sequence,
    })
}

/// Normalizes every entity of a feed, returning accepted positions in feed
/// order together with counts of what was kept and skipped.
pub fn normalize_feed(
    feed: &FeedMessage,
    fetched_at: DateTime<Utc>,
) -> (Vec<VehiclePosition>, FeedStats) {
    let mut stats = FeedStats::default();
    let mut positions = Vec::with_capacity(feed.entity.len());

    for entity in &feed.entity {
        let outcome = normalize(entity, fetched_at);
        stats.record(entity, &outcome);

        match outcome {
            Normalized::Position(p) => positions.push(p),
            Normalized::Skip(SkipReason::NotAVehicle) => {}
            Normalized::Skip(reason) => {
                debug!(entity_id = %entity.id, ?reason, "Skipping vehicle entity");
            }
        }
    }

    (positions, stats)
}

/// Upstream epoch seconds to UTC; zero is treated as "not reported".
fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
        && !(lat == 0.0 && lon == 0.0)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
