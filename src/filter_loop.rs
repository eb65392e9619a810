//! Periodic driver: one predict/update cycle per tick over a snapshot of the
//! latest inputs.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::config::AppConfig;
use crate::error::Result;
use crate::filters::AltitudeEkf;
use crate::health_monitor::HealthMonitor;
use crate::output::EstimateRecord;
use crate::sensors::{current_timestamp, SensorInputs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

pub struct FilterLoop {
    config: AppConfig,
    ekf: AltitudeEkf,
    health: HealthMonitor,
    inputs: Arc<SensorInputs>,
    state: LoopState,
    last_tick: Option<Instant>,
    dropped: u64,
}

impl FilterLoop {
    pub fn new(config: AppConfig, inputs: Arc<SensorInputs>) -> Result<Self> {
        config.validate()?;
        let ekf = AltitudeEkf::new(config.ekf.clone())?;
        let health = HealthMonitor::new(config.filter_loop.stale_after_secs);
        Ok(FilterLoop {
            config,
            ekf,
            health,
            inputs,
            state: LoopState::Idle,
            last_tick: None,
            dropped: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ekf(&self) -> &AltitudeEkf {
        &self.ekf
    }

    pub fn inputs(&self) -> &SensorInputs {
        &self.inputs
    }

    /// Records lost to a full or closed output channel
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Clamp a stalled tick to the configured maximum.
    fn clamp_dt(&self, dt: f64) -> f64 {
        let max_dt = self.config.filter_loop.max_dt_secs;
        if dt > max_dt {
            warn!("[loop] dt {:.3}s exceeds {:.3}s, clamping", dt, max_dt);
            max_dt
        } else {
            dt
        }
    }

    /// Run one cycle with an explicit dt. `now` (seconds since the Unix epoch)
    /// stamps the record and drives channel staleness; replay passes the
    /// session clock.
    pub fn tick(&mut self, dt: f64, now: f64) -> EstimateRecord {
        let dt = self.clamp_dt(dt);
        let snapshot = self.inputs.snapshot();
        let report = self.ekf.step(&snapshot, dt);
        let health = self.health.check(&snapshot, now);

        debug!(
            "[loop] tick {} dt={:.4} z={:.3} offset={:.3}",
            report.cycle, dt, report.state.z, report.state.offset
        );

        EstimateRecord::from_report(
            &report,
            self.ekf.counters(),
            Some(health),
            EstimateRecord::session_time(now),
        )
    }

    fn elapsed_since_last(&mut self, started: Instant) -> f64 {
        let dt = self
            .last_tick
            .map(|prev| started.duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(started);
        dt
    }

    /// Tick at the configured rate until `shutdown` carries `true` or its
    /// sender is dropped. A tick in progress always completes.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        records: mpsc::Sender<EstimateRecord>,
    ) -> Self {
        let period = Duration::from_secs_f64(self.config.filter_loop.period_secs());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state = LoopState::Running;
        info!(
            "[loop] running at {:.1} Hz, gate threshold {:.3}",
            self.config.filter_loop.rate_hz,
            self.ekf.gate_threshold()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let started = Instant::now();
            let dt = self.elapsed_since_last(started);
            let record = self.tick(dt, current_timestamp());

            if records.try_send(record).is_err() {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % 100 == 0 {
                    warn!("[loop] output channel unavailable, {} records dropped", self.dropped);
                }
            }
        }

        self.state = LoopState::Stopped;
        info!(
            "[loop] stopped after {} cycles ({} gated, {} dropped)",
            self.ekf.cycles(),
            self.ekf.counters().total_gated(),
            self.dropped
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoseSample, RangeSample};
    use approx::assert_abs_diff_eq;

    fn hover_inputs() -> Arc<SensorInputs> {
        let inputs = Arc::new(SensorInputs::new());
        let now = current_timestamp();
        inputs.write_pose(PoseSample { timestamp: now, altitude: 1.0, orientation: (1.0, 0.0, 0.0, 0.0) });
        inputs.write_range(RangeSample { timestamp: now, distance: 1.0 });
        inputs
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.filter_loop.rate_hz = 0.0;
        assert!(FilterLoop::new(config, Arc::new(SensorInputs::new())).is_err());
    }

    #[test]
    fn test_manual_ticks_converge() {
        let mut filter = FilterLoop::new(AppConfig::default(), hover_inputs()).unwrap();
        assert_eq!(filter.state(), LoopState::Idle);

        let first = filter.tick(0.0, current_timestamp());
        assert_eq!(first.tick, 0);
        assert_eq!(first.dt, 0.0);

        let mut last = first;
        for _ in 0..50 {
            last = filter.tick(0.05, current_timestamp());
        }
        assert_abs_diff_eq!(last.position, 1.0, epsilon = 0.01);
        assert_abs_diff_eq!(last.offset, 0.0, epsilon = 0.01);
        assert_eq!(last.tick, 50);
    }

    #[test]
    fn test_stall_is_clamped() {
        let mut filter = FilterLoop::new(AppConfig::default(), hover_inputs()).unwrap();
        let record = filter.tick(30.0, current_timestamp());
        assert_eq!(record.dt, AppConfig::default().filter_loop.max_dt_secs);
    }

    #[test]
    fn test_health_in_record() {
        let mut filter = FilterLoop::new(AppConfig::default(), hover_inputs()).unwrap();
        let record = filter.tick(0.05, current_timestamp());
        let health = record.health.unwrap();
        assert!(health.pose.healthy);
        assert!(health.range.healthy);
        assert!(!health.imu.received);
    }

    #[tokio::test]
    async fn test_run_emits_and_stops() {
        let mut config = AppConfig::default();
        config.filter_loop.rate_hz = 100.0;
        let filter = FilterLoop::new(config, hover_inputs()).unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(256);
        let handle = tokio::spawn(filter.run(stop_rx, tx));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tick, 0);
        assert_eq!(first.dt, 0.0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.tick, 1);
        assert!(second.dt > 0.0);

        stop_tx.send(true).unwrap();
        let filter = handle.await.unwrap();
        assert_eq!(filter.state(), LoopState::Stopped);
        assert!(filter.ekf().cycles() >= 2);
    }

    #[tokio::test]
    async fn test_full_channel_never_blocks() {
        let mut config = AppConfig::default();
        config.filter_loop.rate_hz = 200.0;
        let filter = FilterLoop::new(config, hover_inputs()).unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel(1);
        let handle = tokio::spawn(filter.run(stop_rx, tx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let filter = handle.await.unwrap();

        assert!(filter.ekf().cycles() > 2);
        assert!(filter.dropped() > 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let filter = FilterLoop::new(AppConfig::default(), hover_inputs()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel(16);
        drop(stop_tx);

        let filter = filter.run(stop_rx, tx).await;
        assert_eq!(filter.state(), LoopState::Stopped);
    }
}
