//! Altitude estimation for a hovering platform: a 5-state extended Kalman
//! filter fusing a global altitude source, a tilted downward rangefinder and
//! attitude, driven by inertial rates.

pub mod config;
pub mod error;
pub mod filter_loop;
pub mod filters;
pub mod health_monitor;
pub mod output;
pub mod sensors;
pub mod types;

pub use config::{AppConfig, EkfConfig, LoopConfig};
pub use error::{EstimatorError, Result};
pub use filter_loop::{FilterLoop, LoopState};
pub use filters::{AltitudeEkf, Channel, ChannelOutcome, CycleReport, GateCounters};
pub use output::{EstimateRecord, JsonLinesSink};
pub use sensors::SensorInputs;
