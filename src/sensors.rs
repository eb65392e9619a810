//! Latest-value input buffers and simulated producers.
//!
//! Each channel group is replaced whole under its own short lock, so the
//! filter never sees half of an orientation sample. Channels are independent:
//! there is no cross-channel lock and the filter never waits on a producer.

use log::{debug, info};
use nalgebra::UnitQuaternion;
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::types::{ImuSample, InputSnapshot, PoseSample, RangeSample};

// A poisoned lock still holds the last complete group
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct SensorInputs {
    pose: Mutex<PoseSample>,
    imu: Mutex<ImuSample>,
    range: Mutex<RangeSample>,
    pose_count: AtomicU64,
    imu_count: AtomicU64,
    range_count: AtomicU64,
}

/// Samples written per channel since startup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SampleCounts {
    pub pose: u64,
    pub imu: u64,
    pub range: u64,
}

impl SensorInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_pose(&self, sample: PoseSample) {
        *lock(&self.pose) = sample;
        self.pose_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_imu(&self, sample: ImuSample) {
        *lock(&self.imu) = sample;
        self.imu_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_range(&self, sample: RangeSample) {
        *lock(&self.range) = sample;
        self.range_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the most recent complete write of every channel.
    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            pose: *lock(&self.pose),
            imu: *lock(&self.imu),
            range: *lock(&self.range),
        }
    }

    pub fn counts(&self) -> SampleCounts {
        SampleCounts {
            pose: self.pose_count.load(Ordering::Relaxed),
            imu: self.imu_count.load(Ordering::Relaxed),
            range: self.range_count.load(Ordering::Relaxed),
        }
    }
}

// ─── Simulated hover ─────────────────────────────────────────────────────────

/// Synthetic hover: slow heave, small roll/pitch oscillation, and a constant
/// offset between the global altitude source and the height above the water.
#[derive(Clone, Debug)]
pub struct HoverProfile {
    pub hover_height: f64,
    pub altitude_offset: f64,
    pub heave_amplitude: f64,
    pub heave_hz: f64,
    pub roll_amplitude: f64,
    pub roll_hz: f64,
    pub pitch_amplitude: f64,
    pub pitch_hz: f64,
    pub leg_half_span: f64,
}

impl Default for HoverProfile {
    fn default() -> Self {
        Self {
            hover_height: 1.0,
            altitude_offset: 0.4,
            heave_amplitude: 0.2,
            heave_hz: 0.1,
            roll_amplitude: 0.05,
            roll_hz: 0.25,
            pitch_amplitude: 0.04,
            pitch_hz: 0.2,
            leg_half_span: 0.26,
        }
    }
}

impl HoverProfile {
    fn heave_omega(&self) -> f64 {
        2.0 * PI * self.heave_hz
    }

    pub fn height_at(&self, t: f64) -> f64 {
        self.hover_height + self.heave_amplitude * (self.heave_omega() * t).sin()
    }

    pub fn attitude_at(&self, t: f64) -> (f64, f64) {
        (
            self.roll_amplitude * (2.0 * PI * self.roll_hz * t).sin(),
            self.pitch_amplitude * (2.0 * PI * self.pitch_hz * t).sin(),
        )
    }

    pub fn pose_at(&self, t: f64, timestamp: f64) -> PoseSample {
        let (roll, pitch) = self.attitude_at(t);
        let q = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        // millimetre-level jitter
        let jitter = 0.002 * (37.0 * t).sin();
        PoseSample {
            timestamp,
            altitude: self.height_at(t) + self.altitude_offset + jitter,
            orientation: (q.w, q.i, q.j, q.k),
        }
    }

    pub fn imu_at(&self, t: f64, timestamp: f64) -> ImuSample {
        let w = self.heave_omega();
        let w_roll = 2.0 * PI * self.roll_hz;
        let w_pitch = 2.0 * PI * self.pitch_hz;
        ImuSample {
            timestamp,
            accel_z: -self.heave_amplitude * w * w * (w * t).sin(),
            roll_rate: self.roll_amplitude * w_roll * (w_roll * t).cos(),
            pitch_rate: self.pitch_amplitude * w_pitch * (w_pitch * t).cos(),
        }
    }

    pub fn range_at(&self, t: f64, timestamp: f64) -> RangeSample {
        let (roll, pitch) = self.attitude_at(t);
        let z = self.height_at(t);
        let distance = (z + self.leg_half_span * roll.sin() * pitch.cos()) / (roll.cos() * pitch.cos());
        RangeSample { timestamp, distance }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum SimChannel {
    Pose,
    Imu,
    Range,
}

impl SimChannel {
    fn name(self) -> &'static str {
        match self {
            SimChannel::Pose => "pose",
            SimChannel::Imu => "imu",
            SimChannel::Range => "range",
        }
    }

    /// Producer rate used by the simulation
    pub fn default_period(self) -> Duration {
        match self {
            SimChannel::Pose => Duration::from_millis(100), // 10 Hz
            SimChannel::Imu => Duration::from_millis(20),   // 50 Hz
            SimChannel::Range => Duration::from_millis(66), // ~15 Hz
        }
    }
}

/// Write simulated samples for one channel until shutdown.
pub async fn sim_loop(
    channel: SimChannel,
    inputs: Arc<SensorInputs>,
    profile: HoverProfile,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = current_timestamp();
    let mut sample_count = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let now = current_timestamp();
        let t = now - start;
        match channel {
            SimChannel::Pose => inputs.write_pose(profile.pose_at(t, now)),
            SimChannel::Imu => inputs.write_imu(profile.imu_at(t, now)),
            SimChannel::Range => inputs.write_range(profile.range_at(t, now)),
        }

        sample_count += 1;
        if sample_count % 500 == 0 {
            debug!("[{}] {} samples", channel.name(), sample_count);
        }
    }

    info!("[{}] producer stopped after {} samples", channel.name(), sample_count);
}

pub fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::measurement::quaternion_to_roll_pitch;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_defaults_before_first_write() {
        let inputs = SensorInputs::new();
        let snapshot = inputs.snapshot();

        assert_eq!(snapshot, InputSnapshot::default());
        assert_eq!(snapshot.pose.orientation, (1.0, 0.0, 0.0, 0.0));
        assert_eq!(inputs.counts(), SampleCounts::default());
    }

    #[test]
    fn test_latest_write_wins() {
        let inputs = SensorInputs::new();
        inputs.write_range(RangeSample { timestamp: 1.0, distance: 0.8 });
        inputs.write_range(RangeSample { timestamp: 2.0, distance: 0.9 });
        inputs.write_imu(ImuSample { timestamp: 2.0, accel_z: 0.1, roll_rate: 0.2, pitch_rate: 0.3 });

        let snapshot = inputs.snapshot();
        assert_eq!(snapshot.range.distance, 0.9);
        assert_eq!(snapshot.imu.pitch_rate, 0.3);
        assert_eq!(inputs.counts().range, 2);
        assert_eq!(inputs.counts().pose, 0);
    }

    #[test]
    fn test_groups_never_torn() {
        let inputs = Arc::new(SensorInputs::new());
        let writer = {
            let inputs = inputs.clone();
            std::thread::spawn(move || {
                for i in 1..=5000 {
                    let v = i as f64;
                    inputs.write_pose(PoseSample { timestamp: v, altitude: v, orientation: (v, v, v, v) });
                }
            })
        };

        for _ in 0..5000 {
            let pose = inputs.snapshot().pose;
            if pose.timestamp > 0.0 {
                let (w, x, y, z) = pose.orientation;
                assert_eq!(pose.altitude, pose.timestamp);
                assert!(w == x && x == y && y == z && z == pose.altitude);
            }
        }
        writer.join().unwrap();
        assert_eq!(inputs.counts().pose, 5000);
    }

    #[test]
    fn test_profile_consistency() {
        let profile = HoverProfile::default();
        let t = 1.3;
        let pose = profile.pose_at(t, 10.0);
        let range = profile.range_at(t, 10.0);
        let (roll, pitch) = quaternion_to_roll_pitch(pose.orientation);
        let (true_roll, true_pitch) = profile.attitude_at(t);

        assert_abs_diff_eq!(roll, true_roll, epsilon = 1e-12);
        assert_abs_diff_eq!(pitch, true_pitch, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.altitude - profile.height_at(t), profile.altitude_offset, epsilon = 0.003);
        assert!(range.distance >= profile.height_at(t) * 0.99);
        assert_eq!(range.timestamp, 10.0);
    }

    #[tokio::test]
    async fn test_sim_loop_writes_and_stops() {
        let inputs = Arc::new(SensorInputs::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sim_loop(
            SimChannel::Range,
            inputs.clone(),
            HoverProfile::default(),
            Duration::from_millis(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(inputs.counts().range > 0);
        assert!(inputs.snapshot().range.timestamp > 0.0);
    }
}
