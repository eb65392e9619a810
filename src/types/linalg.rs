//! Linear algebra type system for the altitude filter
//!
//! Compile-time dimension checking and type aliases for every matrix the
//! predict/update cycle touches.

use nalgebra::{SMatrix, SVector};

// ===== Dimensions =====
pub const STATE_DIM: usize = 5; // [z, z_dot, roll, pitch, offset]
pub const MEASURE_DIM: usize = 4; // [altitude, range, roll, pitch]
pub const CONTROL_DIM: usize = 3; // [accel_z, roll_rate, pitch_rate]

// ===== State =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

// ===== Measurement =====
pub type MeasVec = SVector<f64, MEASURE_DIM>;
pub type MeasNoise = SMatrix<f64, MEASURE_DIM, MEASURE_DIM>;
pub type MeasJacobian = SMatrix<f64, MEASURE_DIM, STATE_DIM>; // 4×5
pub type JacobianRow = SMatrix<f64, 1, STATE_DIM>; // 1×5

// ===== Control =====
pub type ControlVec = SVector<f64, CONTROL_DIM>;

// Kalman gain for a single scalar channel
pub type ScalarGain = SVector<f64, STATE_DIM>; // 5×1
