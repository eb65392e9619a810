//! Kinematic process model.
//!
//! The IMU stream drives the state directly: vertical acceleration integrates
//! into velocity, roll/pitch rates integrate into attitude. The offset has no
//! dynamics.

use crate::filters::state::{symmetrize, IDX_OFFSET, IDX_PITCH, IDX_ROLL, IDX_Z, IDX_Z_DOT};
use crate::types::{ControlVec, StateMat, StateVec};

/// State transition Jacobian: identity except dz/dz_dot = dt.
pub fn jacobian(dt: f64) -> StateMat {
    let mut f = StateMat::identity();
    f[(IDX_Z, IDX_Z_DOT)] = dt;
    f
}

/// Propagate the state mean one step.
pub fn propagate(x: &StateVec, u: &ControlVec, dt: f64) -> StateVec {
    let mut next = *x;
    next[IDX_Z] = x[IDX_Z] + x[IDX_Z_DOT] * dt;
    next[IDX_Z_DOT] = x[IDX_Z_DOT] + u[0] * dt;
    next[IDX_ROLL] = x[IDX_ROLL] + u[1] * dt;
    next[IDX_PITCH] = x[IDX_PITCH] + u[2] * dt;
    next[IDX_OFFSET] = x[IDX_OFFSET];
    next
}

/// Predict step. Returns the propagated state and covariance
/// `P' = F * P * F^T + Q`.
///
/// A non-positive or non-finite `dt` returns the inputs unchanged.
pub fn predict(
    x: &StateVec,
    p: &StateMat,
    q: &StateMat,
    u: &ControlVec,
    dt: f64,
) -> (StateVec, StateMat) {
    if !(dt > 0.0 && dt.is_finite()) {
        return (*x, *p);
    }

    let f = jacobian(dt);
    let x_next = propagate(x, u, dt);
    let p_next = symmetrize(&(f * p * f.transpose() + q));

    (x_next, p_next)
}
