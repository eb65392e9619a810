use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EstimatorError, Result};

// ─── Filter constants ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Q diagonal: [z, z_dot, roll, pitch, offset]
    pub process_noise: [f64; 5],
    /// R diagonal: [altitude, range, roll, pitch]
    pub measurement_noise: [f64; 4],
    /// Initial P diagonal, same order as the state
    pub initial_covariance: [f64; 5],
    /// Half the distance between the landing legs [m]
    pub leg_half_span: f64,

    // ── Gating ──
    pub gate_confidence: f64,
    pub gate_degrees_of_freedom: u32,
    /// Altitude readings collected before `z` is seeded
    pub acquisition_samples: usize,

    // ── Numeric guards ──
    /// Range channel is skipped when cos(roll)·cos(pitch) falls below this
    pub min_tilt_cosine: f64,
    /// Channels whose innovation variance falls below this are skipped
    pub min_innovation_variance: f64,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            process_noise: [0.01, 0.0488, 0.0004, 0.000324, 0.00027],
            measurement_noise: [0.00001, 0.005, 0.00005, 0.0002],
            initial_covariance: [0.01, 0.01, 0.01, 0.01, 0.1],
            leg_half_span: 0.26, // legs are 520 mm apart
            gate_confidence: 0.995,
            gate_degrees_of_freedom: 1,
            acquisition_samples: 5,
            min_tilt_cosine: 0.05,
            min_innovation_variance: 1e-12,
        }
    }
}

impl EkfConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("process_noise", &self.process_noise)?;
        check_positive("measurement_noise", &self.measurement_noise)?;
        check_positive("initial_covariance", &self.initial_covariance)?;

        if !self.leg_half_span.is_finite() || self.leg_half_span < 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "leg_half_span must be finite and non-negative, got {}",
                self.leg_half_span
            )));
        }
        if !(self.gate_confidence > 0.0 && self.gate_confidence < 1.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "gate_confidence must lie in (0, 1), got {}",
                self.gate_confidence
            )));
        }
        if self.gate_degrees_of_freedom == 0 {
            return Err(EstimatorError::InvalidConfig(
                "gate_degrees_of_freedom must be at least 1".to_string(),
            ));
        }
        if self.acquisition_samples == 0 {
            return Err(EstimatorError::InvalidConfig(
                "acquisition_samples must be at least 1".to_string(),
            ));
        }
        if !(self.min_tilt_cosine > 0.0 && self.min_tilt_cosine < 1.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "min_tilt_cosine must lie in (0, 1), got {}",
                self.min_tilt_cosine
            )));
        }
        if !self.min_innovation_variance.is_finite() || self.min_innovation_variance < 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "min_innovation_variance must be finite and non-negative, got {}",
                self.min_innovation_variance
            )));
        }
        Ok(())
    }
}

fn check_positive(name: &str, values: &[f64]) -> Result<()> {
    for (idx, value) in values.iter().enumerate() {
        if !value.is_finite() || *value <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "{name}[{idx}] must be finite and positive, got {value}"
            )));
        }
    }
    Ok(())
}

// ─── Loop timing ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub rate_hz: f64,
    /// Larger elapsed times (loop stalls) are clamped to this
    pub max_dt_secs: f64,
    /// A channel with no write for this long is reported stale
    pub stale_after_secs: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: 20.0,
            max_dt_secs: 1.0,
            stale_after_secs: 1.0,
        }
    }
}

impl LoopConfig {
    pub fn period_secs(&self) -> f64 {
        1.0 / self.rate_hz
    }

    pub fn validate(&self) -> Result<()> {
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "rate_hz must be finite and positive, got {}",
                self.rate_hz
            )));
        }
        if !self.max_dt_secs.is_finite() || self.max_dt_secs <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "max_dt_secs must be finite and positive, got {}",
                self.max_dt_secs
            )));
        }
        if !self.stale_after_secs.is_finite() || self.stale_after_secs <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "stale_after_secs must be finite and positive, got {}",
                self.stale_after_secs
            )));
        }
        Ok(())
    }
}

// ─── Application config ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ekf: EkfConfig,
    pub filter_loop: LoopConfig,
}

impl AppConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ekf.validate()?;
        self.filter_loop.validate()
    }
}
