pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod route_index;
pub mod scheduler;
pub mod snapshot;
pub mod static_data;
pub mod stats;
pub mod swap;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
