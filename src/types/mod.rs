pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Global altitude plus orientation from the position source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSample {
    pub timestamp: f64,
    pub altitude: f64,
    /// Orientation quaternion (w, x, y, z)
    pub orientation: (f64, f64, f64, f64),
}

impl Default for PoseSample {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            altitude: 0.0,
            orientation: (1.0, 0.0, 0.0, 0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuSample {
    pub timestamp: f64,
    /// Vertical acceleration [m/s²]
    pub accel_z: f64,
    /// [rad/s]
    pub roll_rate: f64,
    /// [rad/s]
    pub pitch_rate: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSample {
    pub timestamp: f64,
    /// Downward rangefinder distance [m]
    pub distance: f64,
}

/// Latest value of every input channel, frozen for one filter cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub pose: PoseSample,
    pub imu: ImuSample,
    pub range: RangeSample,
}

impl InputSnapshot {
    /// Control input u = [accel_z, roll_rate, pitch_rate]
    pub fn control(&self) -> ControlVec {
        ControlVec::new(self.imu.accel_z, self.imu.roll_rate, self.imu.pitch_rate)
    }
}
