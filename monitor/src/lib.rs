//! Backend for the soil temperature and breaker monitoring dashboard.
//!
//! Talks to two upstreams: a statically keyed temperature sensor API
//! ([`temperature`]) and a signed device-control platform ([`device`]).

pub mod clock;
pub mod config;
pub mod device;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod poll;
pub mod rest;
pub mod signing;
pub mod temperature;
