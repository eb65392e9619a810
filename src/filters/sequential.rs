//! Sequential (per-channel) measurement update with chi-square gating.
//!
//! Each channel is a scalar update against the covariance left by the
//! previous channel. Innovations use the expected measurements computed once,
//! before the first channel, so the order of application changes the result.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{EstimatorError, Result};
use crate::filters::measurement::{Channel, MeasurementPrediction};
use crate::filters::state::symmetrize;
use crate::types::{JacobianRow, MeasNoise, MeasVec, ScalarGain, StateMat, StateVec};

/// Normalized-innovation gate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChiSquareGate {
    threshold: f64,
}

impl ChiSquareGate {
    /// Critical value of the chi-square distribution at `confidence` with
    /// `degrees_of_freedom`.
    pub fn new(confidence: f64, degrees_of_freedom: u32) -> Result<Self> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(EstimatorError::InvalidConfig(format!(
                "gate confidence must lie in (0, 1), got {confidence}"
            )));
        }
        let chi = ChiSquared::new(degrees_of_freedom as f64)
            .map_err(|e| EstimatorError::InvalidConfig(format!("chi-square gate: {e}")))?;
        Ok(Self { threshold: chi.inverse_cdf(confidence) })
    }

    /// A gate that accepts every finite innovation.
    pub fn open() -> Self {
        Self { threshold: f64::INFINITY }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn accepts(&self, nis: f64) -> bool {
        nis <= self.threshold
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOutcome {
    Applied,
    /// Rejected as an outlier by the gate
    Gated,
    /// Innovation variance too small or the correction was not finite
    Singular,
    /// No usable expected value or reading this cycle
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub outcome: ChannelOutcome,
    pub innovation: f64,
    /// Normalized innovation squared, nu^2 / S
    pub nis: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SequentialUpdate {
    pub x: StateVec,
    pub p: StateMat,
    pub reports: Vec<ChannelReport>,
}

impl SequentialUpdate {
    pub fn outcome(&self, channel: Channel) -> Option<ChannelOutcome> {
        self.reports
            .iter()
            .find(|report| report.channel == channel)
            .map(|report| report.outcome)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SequentialUpdateEngine {
    pub gate: ChiSquareGate,
    pub min_innovation_variance: f64,
}

impl SequentialUpdateEngine {
    pub fn new(gate: ChiSquareGate, min_innovation_variance: f64) -> Self {
        Self { gate, min_innovation_variance }
    }

    /// Apply all channels in the fixed order [altitude, range, roll, pitch].
    pub fn update(
        &self,
        x: &StateVec,
        p: &StateMat,
        measurements: &MeasVec,
        prediction: &MeasurementPrediction,
        r: &MeasNoise,
    ) -> SequentialUpdate {
        self.update_in_order(x, p, measurements, prediction, r, &Channel::ORDER)
    }

    pub fn update_in_order(
        &self,
        x: &StateVec,
        p: &StateMat,
        measurements: &MeasVec,
        prediction: &MeasurementPrediction,
        r: &MeasNoise,
        order: &[Channel],
    ) -> SequentialUpdate {
        let mut x = *x;
        let mut p = *p;
        let mut reports = Vec::with_capacity(order.len());

        for &channel in order {
            let i = channel.index();
            let innovation = measurements[i] - prediction.expected[i];

            if !prediction.is_valid(channel) || !innovation.is_finite() {
                reports.push(ChannelReport {
                    channel,
                    outcome: ChannelOutcome::Unavailable,
                    innovation,
                    nis: f64::NAN,
                });
                continue;
            }

            let h: JacobianRow = prediction.jacobian.fixed_rows::<1>(i).into_owned();
            let ph_t: ScalarGain = p * h.transpose();
            let s = (h * ph_t)[(0, 0)] + r[(i, i)];

            if !s.is_finite() || s < self.min_innovation_variance {
                reports.push(ChannelReport {
                    channel,
                    outcome: ChannelOutcome::Singular,
                    innovation,
                    nis: f64::NAN,
                });
                continue;
            }

            let nis = innovation * innovation / s;
            if !self.gate.accepts(nis) {
                reports.push(ChannelReport {
                    channel,
                    outcome: ChannelOutcome::Gated,
                    innovation,
                    nis,
                });
                continue;
            }

            let k = ph_t / s;
            let x_next = x + k * innovation;
            let p_next = symmetrize(&((StateMat::identity() - k * h) * p));

            if !(x_next.iter().all(|v| v.is_finite()) && p_next.iter().all(|v| v.is_finite())) {
                reports.push(ChannelReport {
                    channel,
                    outcome: ChannelOutcome::Singular,
                    innovation,
                    nis,
                });
                continue;
            }

            x = x_next;
            p = p_next;
            reports.push(ChannelReport {
                channel,
                outcome: ChannelOutcome::Applied,
                innovation,
                nis,
            });
        }

        SequentialUpdate { x, p, reports }
    }
}
