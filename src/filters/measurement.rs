//! Measurement model
//!
//! Channels, in update order:
//! h1 = z + offset                                        (global altitude)
//! h2 = (z + r·sin(roll)·cos(pitch)) / (cos(roll)·cos(pitch))   (range, tilt compensated)
//! h3 = roll
//! h4 = pitch
//!
//! The rangefinder sits between the legs, `r` metres off the roll axis, so
//! tilting the platform stretches its straight-down path.

use nalgebra::{Quaternion, UnitQuaternion};

use crate::filters::state::{IDX_OFFSET, IDX_PITCH, IDX_ROLL, IDX_Z};
use crate::types::{MeasJacobian, MeasVec, StateVec, MEASURE_DIM};

/// Measurement channel, in the order the update engine applies them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Altitude,
    Range,
    Roll,
    Pitch,
}

impl Channel {
    pub const ORDER: [Channel; MEASURE_DIM] =
        [Channel::Altitude, Channel::Range, Channel::Roll, Channel::Pitch];

    pub fn index(self) -> usize {
        match self {
            Channel::Altitude => 0,
            Channel::Range => 1,
            Channel::Roll => 2,
            Channel::Pitch => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Altitude => "altitude",
            Channel::Range => "range",
            Channel::Roll => "roll",
            Channel::Pitch => "pitch",
        }
    }
}

/// Expected measurements and their linearization at one state.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementPrediction {
    pub expected: MeasVec,
    pub jacobian: MeasJacobian,
    /// False for a channel that cannot be evaluated this cycle
    pub valid: [bool; MEASURE_DIM],
}

impl MeasurementPrediction {
    pub fn is_valid(&self, channel: Channel) -> bool {
        self.valid[channel.index()]
    }
}

/// Evaluate h(X) and H = dh/dX.
///
/// When `cos(roll)·cos(pitch)` is below `min_tilt_cosine` the range geometry
/// is singular: the range channel is marked invalid and its row left at zero.
pub fn expected(x: &StateVec, leg_half_span: f64, min_tilt_cosine: f64) -> MeasurementPrediction {
    let z = x[IDX_Z];
    let roll = x[IDX_ROLL];
    let pitch = x[IDX_PITCH];
    let offset = x[IDX_OFFSET];
    let r = leg_half_span;

    let mut expected = MeasVec::zeros();
    let mut h = MeasJacobian::zeros();
    let mut valid = [true; MEASURE_DIM];

    // Altitude
    expected[0] = z + offset;
    h[(0, IDX_Z)] = 1.0;
    h[(0, IDX_OFFSET)] = 1.0;

    // Range
    let (sin_roll, cos_roll) = roll.sin_cos();
    let cos_pitch = pitch.cos();
    let cpct = cos_roll * cos_pitch;
    if cpct.is_finite() && cpct.abs() >= min_tilt_cosine {
        let tan_roll = sin_roll / cos_roll;
        let tan_pitch = pitch.tan();
        let range = (z + r * sin_roll * cos_pitch) / cpct;

        expected[1] = range;
        h[(1, IDX_Z)] = 1.0 / cpct;
        h[(1, IDX_ROLL)] = r + range * tan_roll;
        h[(1, IDX_PITCH)] = z * tan_pitch / cpct;
    } else {
        valid[1] = false;
    }

    // Attitude
    expected[2] = roll;
    h[(2, IDX_ROLL)] = 1.0;
    expected[3] = pitch;
    h[(3, IDX_PITCH)] = 1.0;

    MeasurementPrediction { expected, jacobian: h, valid }
}

/// Roll and pitch (rad) from a (w, x, y, z) quaternion.
///
/// The quaternion is normalized first; a zero or non-finite quaternion reads
/// as level.
pub fn quaternion_to_roll_pitch(q: (f64, f64, f64, f64)) -> (f64, f64) {
    let (w, x, y, z) = q;
    match UnitQuaternion::try_new(Quaternion::new(w, x, y, z), 1e-9) {
        Some(unit) if unit.coords.iter().all(|c| c.is_finite()) => {
            let (roll, pitch, _yaw) = unit.euler_angles();
            (roll, pitch)
        }
        _ => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::FRAC_PI_2;

    const R: f64 = 0.26;
    const MIN_COS: f64 = 0.05;

    fn numeric_row(x: &StateVec, channel: usize) -> [f64; 5] {
        let eps = 1e-6;
        let mut row = [0.0; 5];
        for (j, slot) in row.iter_mut().enumerate() {
            let mut hi = *x;
            let mut lo = *x;
            hi[j] += eps;
            lo[j] -= eps;
            let f_hi = expected(&hi, R, MIN_COS).expected[channel];
            let f_lo = expected(&lo, R, MIN_COS).expected[channel];
            *slot = (f_hi - f_lo) / (2.0 * eps);
        }
        row
    }

    #[test]
    fn test_level_platform() {
        let x = StateVec::from([1.5, 0.3, 0.0, 0.0, 0.2]);
        let pred = expected(&x, R, MIN_COS);

        assert_relative_eq!(pred.expected[0], 1.7);
        assert_relative_eq!(pred.expected[1], 1.5);
        assert_eq!(pred.expected[2], 0.0);
        assert_eq!(pred.expected[3], 0.0);
        assert_eq!(pred.valid, [true; 4]);

        // On the level only z and roll move the range reading
        assert_relative_eq!(pred.jacobian[(1, IDX_Z)], 1.0);
        assert_relative_eq!(pred.jacobian[(1, IDX_ROLL)], R);
        assert_eq!(pred.jacobian[(1, IDX_PITCH)], 0.0);
    }

    #[test]
    fn test_fixed_rows() {
        let x = StateVec::from([0.7, -0.2, 0.15, -0.25, 0.05]);
        let h = expected(&x, R, MIN_COS).jacobian;

        assert_eq!(h.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(h.row(2).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(h.row(3).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(h[(1, 1)], 0.0);
        assert_eq!(h[(1, 4)], 0.0);
    }

    #[test]
    fn test_tilted_range_geometry() {
        let roll: f64 = 0.2;
        let pitch: f64 = -0.1;
        let x = StateVec::from([2.0, 0.0, roll, pitch, 0.0]);
        let pred = expected(&x, R, MIN_COS);

        let expected_range = (2.0 + R * roll.sin() * pitch.cos()) / (roll.cos() * pitch.cos());
        assert_relative_eq!(pred.expected[1], expected_range, epsilon = 1e-12);
        assert!(pred.expected[1] > 2.0);
    }

    #[test]
    fn test_jacobian_matches_numeric() {
        let states = [
            StateVec::from([1.2, 0.4, 0.1, -0.2, 0.3]),
            StateVec::from([0.3, -1.0, -0.35, 0.25, -0.1]),
            StateVec::from([5.0, 0.0, 0.6, 0.5, 0.0]),
        ];

        for x in states.iter() {
            let h = expected(x, R, MIN_COS).jacobian;
            for channel in 0..4 {
                let numeric = numeric_row(x, channel);
                for j in 0..5 {
                    assert_abs_diff_eq!(h[(channel, j)], numeric[j], epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_near_vertical_tilt_skips_range() {
        let x = StateVec::from([1.0, 0.0, FRAC_PI_2 - 1e-4, 0.0, 0.0]);
        let pred = expected(&x, R, MIN_COS);

        assert!(!pred.is_valid(Channel::Range));
        assert!(pred.is_valid(Channel::Altitude));
        assert!(pred.expected.iter().all(|v| v.is_finite()));
        assert!(pred.jacobian.iter().all(|v| v.is_finite()));
        assert_eq!(pred.jacobian.row(1).iter().filter(|v| **v != 0.0).count(), 0);
    }

    #[test]
    fn test_quaternion_identity_is_level() {
        let (roll, pitch) = quaternion_to_roll_pitch((1.0, 0.0, 0.0, 0.0));
        assert_abs_diff_eq!(roll, 0.0);
        assert_abs_diff_eq!(pitch, 0.0);
    }

    #[test]
    fn test_quaternion_roll_and_pitch() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let (roll, pitch) = quaternion_to_roll_pitch((q.w, q.i, q.j, q.k));

        assert_abs_diff_eq!(roll, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(pitch, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_unnormalized_and_zero() {
        let q = UnitQuaternion::from_euler_angles(-0.1, 0.4, 0.0);
        let (roll, pitch) = quaternion_to_roll_pitch((2.0 * q.w, 2.0 * q.i, 2.0 * q.j, 2.0 * q.k));
        assert_abs_diff_eq!(roll, -0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(pitch, 0.4, epsilon = 1e-12);

        assert_eq!(quaternion_to_roll_pitch((0.0, 0.0, 0.0, 0.0)), (0.0, 0.0));
        assert_eq!(quaternion_to_roll_pitch((f64::NAN, 0.0, 0.0, 0.0)), (0.0, 0.0));
    }

    #[test]
    fn test_channel_order() {
        let indices: Vec<usize> = Channel::ORDER.iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
