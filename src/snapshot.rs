//! The current generation of vehicle positions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::VehiclePosition;
use crate::swap::Published;

/// Every position from one successful fetch. Never mutated once installed.
#[derive(Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    pub positions: Vec<VehiclePosition>,
}

impl Snapshot {
    /// When polling clients should ask again.
    pub fn expires(&self, ttl: Duration) -> DateTime<Utc> {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(self.fetched_at)
    }

    pub fn on_route<'a>(&'a self, route_id: &'a str) -> impl Iterator<Item = &'a VehiclePosition> {
        self.positions
            .iter()
            .filter(move |p| p.route_id.as_deref() == Some(route_id))
    }
}

/// Holds only the latest [`Snapshot`]. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    current: Arc<Published<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new generation, discarding the previous one entirely.
    pub fn replace(
        &self,
        positions: Vec<VehiclePosition>,
        fetched_at: DateTime<Utc>,
    ) -> Arc<Snapshot> {
        self.current.publish_with(|previous| Snapshot {
            generation: previous.map_or(1, |s| s.generation + 1),
            fetched_at,
            positions,
        })
    }

    /// The latest installed snapshot; `None` until the first successful fetch.
    pub fn read(&self) -> Option<Arc<Snapshot>> {
        self.current.load()
    }
}
