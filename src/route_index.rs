//! Ordered stop sequences per route, joined from static data.
//!
//! Only `(route, stop)` is unique in the index. Two different stops can share
//! a sequence number on the same route when the source data disagrees, and
//! both are kept.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::{Route, RouteStop, Stop};

/// A `trips.txt` row, reduced to the trip → route link.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRoute {
    pub trip_id: String,
    pub route_id: String,
}

/// A `stop_times.txt` row, reduced to the columns the join needs.
#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedStop {
    pub sequence: u32,
    pub stop: Stop,
}

/// How a published stop code was matched against the stop table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMatch {
    Literal,
    LeadingZerosStripped,
    Integer,
}

#[derive(Debug, Default)]
pub struct RouteStopIndex {
    routes: BTreeSet<String>,
    by_route: BTreeMap<String, Vec<IndexedStop>>,
}

impl RouteStopIndex {
    /// Joins trips and stop times, keeping the smallest sequence observed for
    /// each `(route, stop)` pair across all trips of the route. Rows naming an
    /// unknown trip, route or stop are dropped.
    pub fn from_stop_times(
        routes: &BTreeMap<String, Route>,
        stops: &BTreeMap<String, Stop>,
        trips: &[TripRoute],
        stop_times: &[StopTime],
    ) -> Self {
        let route_of_trip: HashMap<&str, &str> = trips
            .iter()
            .map(|t| (t.trip_id.as_str(), t.route_id.as_str()))
            .collect();

        let mut min_sequence: HashMap<(&str, &str), u32> = HashMap::new();
        let mut unknown_trips = 0usize;

        for st in stop_times {
            let Some(&route_id) = route_of_trip.get(st.trip_id.as_str()) else {
                unknown_trips += 1;
                continue;
            };
            min_sequence
                .entry((route_id, st.stop_id.as_str()))
                .and_modify(|seq| *seq = (*seq).min(st.stop_sequence))
                .or_insert(st.stop_sequence);
        }

        let mut index = Self::with_routes(routes);
        let mut unresolved = 0usize;

        for ((route_id, stop_id), sequence) in min_sequence {
            match (index.routes.contains(route_id), stops.get(stop_id)) {
                (true, Some(stop)) => index.push(route_id, sequence, stop),
                _ => unresolved += 1,
            }
        }
        index.sort();

        if unknown_trips > 0 || unresolved > 0 {
            warn!(
                unknown_trips,
                unresolved_pairs = unresolved,
                "Dropped stop times that do not join to a known route and stop"
            );
        }
        info!(
            routes = index.by_route.len(),
            associations = index.len(),
            "Built route-stop index from stop times"
        );

        index
    }

    /// Builds the index from each route's published stop-code list. Sequence
    /// is the 1-based position in the list; codes that match no stop keep
    /// their position unused. A stop listed twice keeps its first position.
    pub fn from_stop_lists(routes: &BTreeMap<String, Route>, stops: &BTreeMap<String, Stop>) -> Self {
        let mut index = Self::with_routes(routes);
        let mut unmatched = 0usize;

        for route in routes.values() {
            let Some(list) = route.stops_list.as_deref() else {
                continue;
            };
            let mut seen = HashSet::new();

            for (position, code) in parse_stop_list(list).enumerate() {
                let Ok(sequence) = u32::try_from(position + 1) else {
                    break;
                };
                match resolve_stop_code(code, stops) {
                    Some((stop, matched)) => {
                        if matched != CodeMatch::Literal {
                            info!(
                                route_id = %route.route_id,
                                code,
                                resolved = %stop.code,
                                ?matched,
                                "Stop code matched by fallback"
                            );
                        }
                        if seen.insert(stop.code.as_str()) {
                            index.push(&route.route_id, sequence, stop);
                        } else {
                            debug!(route_id = %route.route_id, code, "Stop repeated in route list");
                        }
                    }
                    None => {
                        unmatched += 1;
                        warn!(route_id = %route.route_id, code, "Stop code not found for route");
                    }
                }
            }
        }
        index.sort();

        info!(
            routes = index.by_route.len(),
            associations = index.len(),
            unmatched,
            "Built route-stop index from route stop lists"
        );

        index
    }

    /// Stops of `route_id` in sequence order; empty for unknown routes.
    pub fn stops_for_route(&self, route_id: &str) -> &[IndexedStop] {
        self.by_route
            .get(route_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn route_exists(&self, route_id: &str) -> bool {
        self.routes.contains(route_id)
    }

    /// All associations, ordered by route then sequence.
    pub fn route_stops(&self) -> impl Iterator<Item = RouteStop> + '_ {
        self.by_route.iter().flat_map(|(route_id, stops)| {
            stops.iter().map(move |s| RouteStop {
                route_id: route_id.clone(),
                stop_code: s.stop.code.clone(),
                sequence: s.sequence,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.by_route.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_routes(routes: &BTreeMap<String, Route>) -> Self {
        Self {
            routes: routes.keys().cloned().collect(),
            by_route: BTreeMap::new(),
        }
    }

    fn push(&mut self, route_id: &str, sequence: u32, stop: &Stop) {
        self.by_route
            .entry(route_id.to_string())
            .or_default()
            .push(IndexedStop {
                sequence,
                stop: stop.clone(),
            });
    }

    fn sort(&mut self) {
        for stops in self.by_route.values_mut() {
            stops.sort_by(|a, b| {
                a.sequence
                    .cmp(&b.sequence)
                    .then_with(|| a.stop.code.cmp(&b.stop.code))
            });
        }
    }
}

/// Splits a comma separated stop list, trimming and dropping empty entries.
pub fn parse_stop_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|code| !code.is_empty())
}

/// Looks a published code up in the stop table, trying the literal code, then
/// the code without leading zeros, then the code re-rendered as an integer.
pub fn resolve_stop_code<'a>(
    code: &str,
    stops: &'a BTreeMap<String, Stop>,
) -> Option<(&'a Stop, CodeMatch)> {
    if let Some(stop) = stops.get(code) {
        return Some((stop, CodeMatch::Literal));
    }

    let stripped = code.trim_start_matches('0');
    if !stripped.is_empty() {
        if let Some(stop) = stops.get(stripped) {
            return Some((stop, CodeMatch::LeadingZerosStripped));
        }
    }

    if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
        let rendered = code.parse::<u64>().ok()?.to_string();
        if let Some(stop) = stops.get(&rendered) {
            return Some((stop, CodeMatch::Integer));
        }
    }

    None
}

#[cfg(test)]
impl RouteStopIndex {
    pub(crate) fn sequence_of(&self, route_id: &str, stop_code: &str) -> Option<u32> {
        self.stops_for_route(route_id)
            .iter()
            .find(|s| s.stop.code == stop_code)
            .map(|s| s.sequence)
    }
}
