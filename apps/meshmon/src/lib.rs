//! Registry, exports and time-series delivery for mesh network node telemetry.

pub mod config;
pub mod data;
pub mod export;
pub mod ingest;
pub mod persist;
pub mod registry;
pub mod shutdown;
pub mod sink;
