use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EkfConfig;
use crate::error::Result;
use crate::filters::measurement::{self, quaternion_to_roll_pitch, Channel};
use crate::filters::process;
use crate::filters::sequential::{
    ChannelOutcome, ChannelReport, ChiSquareGate, SequentialUpdateEngine,
};
use crate::filters::state::{KalmanState, StateSnapshot, IDX_Z};
use crate::types::{InputSnapshot, MeasVec};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub applied: u64,
    pub gated: u64,
    pub singular: u64,
    pub unavailable: u64,
}

/// Cumulative per-channel update outcomes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCounters {
    pub altitude: ChannelCounts,
    pub range: ChannelCounts,
    pub roll: ChannelCounts,
    pub pitch: ChannelCounts,
}

impl GateCounters {
    pub fn get(&self, channel: Channel) -> &ChannelCounts {
        match channel {
            Channel::Altitude => &self.altitude,
            Channel::Range => &self.range,
            Channel::Roll => &self.roll,
            Channel::Pitch => &self.pitch,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut ChannelCounts {
        match channel {
            Channel::Altitude => &mut self.altitude,
            Channel::Range => &mut self.range,
            Channel::Roll => &mut self.roll,
            Channel::Pitch => &mut self.pitch,
        }
    }

    fn record(&mut self, report: &ChannelReport) {
        let counts = self.get_mut(report.channel);
        match report.outcome {
            ChannelOutcome::Applied => counts.applied += 1,
            ChannelOutcome::Gated => counts.gated += 1,
            ChannelOutcome::Singular => counts.singular += 1,
            ChannelOutcome::Unavailable => counts.unavailable += 1,
        }
    }

    pub fn total_gated(&self) -> u64 {
        Channel::ORDER.iter().map(|c| self.get(*c).gated).sum()
    }
}

/// Result of one predict/update cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub dt: f64,
    /// False when dt was not positive and predict was skipped
    pub predicted: bool,
    /// True while the altitude and range channels are held for acquisition
    pub acquiring: bool,
    pub channels: Vec<ChannelReport>,
    pub state: StateSnapshot,
}

/// 5-state altitude EKF: predict from the IMU, then sequential updates from
/// altitude, range, roll and pitch.
///
/// The filter starts in acquisition. Until `acquisition_samples` altitude
/// readings have arrived the altitude and range channels are held back, then
/// `z` is seeded from their median against the prior offset. The chi-square
/// gate is enforced on every update from the first cycle.
pub struct AltitudeEkf {
    config: EkfConfig,
    state: KalmanState,
    engine: SequentialUpdateEngine,
    /// Altitude readings collected while acquiring
    acquisition: Vec<f64>,
    acquired: bool,
    cycles: u64,
    counters: GateCounters,
}

impl AltitudeEkf {
    pub fn new(config: EkfConfig) -> Result<Self> {
        config.validate()?;
        let gate = ChiSquareGate::new(config.gate_confidence, config.gate_degrees_of_freedom)?;
        if config.gate_degrees_of_freedom != 1 {
            warn!(
                "Chi-square gate uses {} degrees of freedom for scalar innovations",
                config.gate_degrees_of_freedom
            );
        }

        Ok(Self {
            state: KalmanState::new(&config),
            engine: SequentialUpdateEngine::new(gate, config.min_innovation_variance),
            acquisition: Vec::with_capacity(config.acquisition_samples),
            acquired: false,
            cycles: 0,
            counters: GateCounters::default(),
            config,
        })
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    pub fn counters(&self) -> &GateCounters {
        &self.counters
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    pub fn gate_threshold(&self) -> f64 {
        self.engine.gate.threshold()
    }

    pub fn is_acquiring(&self) -> bool {
        !self.acquired
    }

    /// Collect one altitude reading; once enough have arrived, place `z` at
    /// their median minus the current offset estimate.
    fn acquire(&mut self, inputs: &InputSnapshot) {
        let altitude = inputs.pose.altitude;
        // A zero timestamp is the startup default, not a reading
        if inputs.pose.timestamp <= 0.0 || !altitude.is_finite() {
            return;
        }
        self.acquisition.push(altitude);
        if self.acquisition.len() < self.config.acquisition_samples {
            return;
        }

        let seed = median(&mut self.acquisition) - self.state.offset();
        self.state.x[IDX_Z] = seed;
        self.acquired = true;
        self.acquisition.clear();
        info!("cycle {}: acquired, z seeded at {:.3} m", self.cycles, seed);
    }

    /// Measurement vector y = [altitude, range, roll, pitch] from a snapshot.
    pub fn measurements(inputs: &InputSnapshot) -> MeasVec {
        let (roll, pitch) = quaternion_to_roll_pitch(inputs.pose.orientation);
        MeasVec::new(inputs.pose.altitude, inputs.range.distance, roll, pitch)
    }

    /// Run one cycle: predict over `dt`, then update from the snapshot.
    pub fn step(&mut self, inputs: &InputSnapshot, dt: f64) -> CycleReport {
        let predicted = dt > 0.0 && dt.is_finite();
        let (x, p) = process::predict(&self.state.x, &self.state.p, &self.state.q, &inputs.control(), dt);
        self.state.x = x;
        self.state.p = p;

        let acquiring = self.is_acquiring();
        if acquiring {
            self.acquire(inputs);
        }

        let mut prediction = measurement::expected(
            &self.state.x,
            self.config.leg_half_span,
            self.config.min_tilt_cosine,
        );
        if acquiring {
            // No position fix yet: hold back the channels that observe z
            prediction.valid[Channel::Altitude.index()] = false;
            prediction.valid[Channel::Range.index()] = false;
        }
        let y = Self::measurements(inputs);

        let update = self.engine.update(&self.state.x, &self.state.p, &y, &prediction, &self.state.r);

        self.state.x = update.x;
        self.state.p = update.p;

        for report in update.reports.iter() {
            self.counters.record(report);
            match report.outcome {
                ChannelOutcome::Gated => warn!(
                    "cycle {}: {} gated (nis {:.2} > {:.2})",
                    self.cycles,
                    report.channel.name(),
                    report.nis,
                    self.engine.gate.threshold()
                ),
                ChannelOutcome::Singular => warn!(
                    "cycle {}: {} skipped, innovation variance singular",
                    self.cycles,
                    report.channel.name()
                ),
                ChannelOutcome::Unavailable if report.channel == Channel::Range && !acquiring => debug!(
                    "cycle {}: range skipped at tilt roll={:.3} pitch={:.3}",
                    self.cycles,
                    self.state.roll(),
                    self.state.pitch()
                ),
                _ => {}
            }
        }

        let report = CycleReport {
            cycle: self.cycles,
            dt,
            predicted,
            acquiring,
            channels: update.reports,
            state: self.state.snapshot(),
        };
        self.cycles += 1;
        report
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
