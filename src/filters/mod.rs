pub mod altitude_ekf;
pub mod measurement;
pub mod process;
pub mod sequential;
pub mod state;

pub use altitude_ekf::{AltitudeEkf, ChannelCounts, CycleReport, GateCounters};
pub use measurement::{Channel, MeasurementPrediction};
pub use sequential::{ChannelOutcome, ChannelReport, ChiSquareGate, SequentialUpdateEngine};
pub use state::{KalmanState, StateSnapshot};
