use serde::Serialize;

use crate::gtfs_rt::FeedEntity;
use crate::normalize::{Normalized, SkipReason};

/// What one pass of the normalizer saw and kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedStats {
    pub total_entities: usize,

    // entity types
    pub vehicles: usize,
    pub trip_updates: usize,
    pub alerts: usize,

    // normalization outcome
    pub accepted: usize,
    pub skipped_missing_id: usize,
    pub skipped_missing_position: usize,
    pub skipped_invalid_coordinates: usize,
    pub approximate_timestamps: usize,

    // optional fields among accepted vehicles
    pub with_trip: usize,
    pub with_bearing: usize,
    pub with_speed: usize,
    pub with_current_status: usize,
    pub with_current_stop_sequence: usize,
}

impl FeedStats {
    pub fn record(&mut self, entity: &FeedEntity, outcome: &Normalized) {
        self.total_entities += 1;

        if entity.vehicle.is_some() {
            self.vehicles += 1;
        }

        if entity.trip_update.is_some() {
            self.trip_updates += 1;
        }

        if entity.alert.is_some() {
            self.alerts += 1;
        }

        match outcome {
            Normalized::Position(p) => {
                self.accepted += 1;

                if p.timestamp_approximate {
                    self.approximate_timestamps += 1;
                }

                if p.route_id.is_some() || p.trip_id.is_some() {
                    self.with_trip += 1;
                }

                if p.bearing.is_some() {
                    self.with_bearing += 1;
                }

                if p.speed_mps.is_some() {
                    self.with_speed += 1;
                }

                if p.current_status.is_some() {
                    self.with_current_status += 1;
                }

                if p.current_stop_sequence.is_some() {
                    self.with_current_stop_sequence += 1;
                }
            }
            Normalized::Skip(SkipReason::NotAVehicle) => {}
            Normalized::Skip(SkipReason::MissingVehicleId) => self.skipped_missing_id += 1,
            Normalized::Skip(SkipReason::MissingPosition) => self.skipped_missing_position += 1,
            Normalized::Skip(SkipReason::InvalidCoordinates) => {
                self.skipped_invalid_coordinates += 1;
            }
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of vehicle entities that became positions.
    pub fn accepted_pct(&self) -> f64 {
        Self::pct(self.accepted, self.vehicles)
    }

    /// A non-empty feed that yielded nothing usable.
    pub fn is_zero_yield(&self) -> bool {
        self.total_entities > 0 && self.accepted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_with_zero_total() {
        assert_eq!(FeedStats::pct(10, 0), 0.0);
    }

    #[test]
    fn test_pct_normal_values() {
        assert_eq!(FeedStats::pct(50, 100), 50.0);
        assert_eq!(FeedStats::pct(1, 4), 25.0);
    }

    #[test]
    fn test_skips_are_counted_by_reason() {
        let mut stats = FeedStats::default();
        let entity = FeedEntity::default();
        stats.record(&entity, &Normalized::Skip(SkipReason::NotAVehicle));
        stats.record(&entity, &Normalized::Skip(SkipReason::MissingPosition));
        stats.record(&entity, &Normalized::Skip(SkipReason::MissingPosition));

        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.skipped_missing_position, 2);
        assert_eq!(stats.accepted, 0);
        assert!(stats.is_zero_yield());
    }

    #[test]
    fn test_empty_feed_is_not_zero_yield() {
        assert!(!FeedStats::default().is_zero_yield());
    }

    #[test]
    fn test_accepted_pct() {
        let stats = FeedStats {
            vehicles: 4,
            accepted: 3,
            ..Default::default()
        };
        assert_eq!(stats.accepted_pct(), 75.0);
    }
}
