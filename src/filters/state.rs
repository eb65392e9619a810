//! Altitude filter state
//!
//! State Vector (5D):
//! [0]: z       vertical position (m)
//! [1]: z_dot   vertical velocity (m/s)
//! [2]: roll    phi (rad)
//! [3]: pitch   theta (rad)
//! [4]: offset  static bias between the altitude source and z (m)

use serde::{Deserialize, Serialize};

use crate::config::EkfConfig;
use crate::types::{MeasNoise, MeasVec, StateMat, StateVec, STATE_DIM};

pub const IDX_Z: usize = 0;
pub const IDX_Z_DOT: usize = 1;
pub const IDX_ROLL: usize = 2;
pub const IDX_PITCH: usize = 3;
pub const IDX_OFFSET: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct KalmanState {
    /// State vector [5D]
    pub x: StateVec,

    /// Covariance matrix [5x5]
    pub p: StateMat,

    /// Process noise matrix [5x5], fixed
    pub q: StateMat,

    /// Measurement noise matrix [4x4], fixed
    pub r: MeasNoise,
}

impl KalmanState {
    pub fn new(config: &EkfConfig) -> Self {
        Self {
            x: StateVec::zeros(),
            p: StateMat::from_diagonal(&StateVec::from(config.initial_covariance)),
            q: StateMat::from_diagonal(&StateVec::from(config.process_noise)),
            r: MeasNoise::from_diagonal(&MeasVec::from(config.measurement_noise)),
        }
    }

    pub fn z(&self) -> f64 {
        self.x[IDX_Z]
    }

    pub fn z_dot(&self) -> f64 {
        self.x[IDX_Z_DOT]
    }

    pub fn roll(&self) -> f64 {
        self.x[IDX_ROLL]
    }

    pub fn pitch(&self) -> f64 {
        self.x[IDX_PITCH]
    }

    pub fn offset(&self) -> f64 {
        self.x[IDX_OFFSET]
    }

    pub fn covariance_trace(&self) -> f64 {
        self.p.trace()
    }

    pub fn is_finite(&self) -> bool {
        self.x.iter().all(|v| v.is_finite()) && self.p.iter().all(|v| v.is_finite())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            z: self.z(),
            z_dot: self.z_dot(),
            roll: self.roll(),
            pitch: self.pitch(),
            offset: self.offset(),
            covariance_trace: self.covariance_trace(),
        }
    }
}

/// Plain copy of the state for reporting
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub z: f64,
    pub z_dot: f64,
    pub roll: f64,
    pub pitch: f64,
    pub offset: f64,
    pub covariance_trace: f64,
}

/// Force symmetry: P = (P + P^T) / 2
pub fn symmetrize(p: &StateMat) -> StateMat {
    (p + p.transpose()) * 0.5
}

/// Positive semi-definite check with a small tolerance on the eigenvalues.
pub fn is_psd(p: &StateMat, tolerance: f64) -> bool {
    if (p - p.transpose()).amax() > tolerance {
        return false;
    }
    let eigen = symmetrize(p).symmetric_eigenvalues();
    (0..STATE_DIM).all(|i| eigen[i] >= -tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = KalmanState::new(&EkfConfig::default());

        assert_eq!(state.x, StateVec::zeros());
        assert_eq!(state.p[(IDX_OFFSET, IDX_OFFSET)], 0.1);
        assert_eq!(state.p[(IDX_Z, IDX_Z_DOT)], 0.0);
        assert_eq!(state.q[(IDX_Z_DOT, IDX_Z_DOT)], 0.0488);
        assert_eq!(state.r[(1, 1)], 0.005);
        assert!(is_psd(&state.p, 1e-12));
        assert!(state.is_finite());
    }

    #[test]
    fn test_symmetrize() {
        let mut p = StateMat::identity();
        p[(0, 1)] = 0.4;
        p[(1, 0)] = 0.2;
        let s = symmetrize(&p);

        assert_eq!(s[(0, 1)], s[(1, 0)]);
        assert!((s[(0, 1)] - 0.3).abs() < 1e-15);
    }

    #[test]
    fn test_psd_rejects_negative_eigenvalue() {
        let mut p = StateMat::identity();
        p[(0, 1)] = 2.0;
        p[(1, 0)] = 2.0;

        assert!(!is_psd(&p, 1e-12));
    }

    #[test]
    fn test_non_finite_detected() {
        let mut state = KalmanState::new(&EkfConfig::default());
        state.p[(2, 3)] = f64::NAN;

        assert!(!state.is_finite());
    }
}
