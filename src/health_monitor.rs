use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::types::InputSnapshot;

/// Health of one input channel at a point in time
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelHealth {
    /// False until the first sample arrives
    pub received: bool,
    pub silence_secs: f64,
    pub healthy: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub pose: ChannelHealth,
    pub imu: ChannelHealth,
    pub range: ChannelHealth,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.pose.healthy && self.imu.healthy && self.range.healthy
    }
}

/// Tracks how long each channel has been silent, from the timestamps the
/// producers stamp on their samples. A stale channel is reported, never fatal:
/// the filter keeps using its last value.
#[derive(Clone, Debug)]
pub struct HealthMonitor {
    stale_after_secs: f64,
    // pose, imu, range
    was_healthy: [bool; 3],
}

impl HealthMonitor {
    pub fn new(stale_after_secs: f64) -> Self {
        HealthMonitor {
            stale_after_secs,
            was_healthy: [true; 3],
        }
    }

    fn channel(&self, timestamp: f64, now: f64) -> ChannelHealth {
        // Producers stamp every sample; a zero timestamp is the startup default.
        let received = timestamp > 0.0;
        let silence_secs = if received { (now - timestamp).max(0.0) } else { f64::INFINITY };
        ChannelHealth {
            received,
            silence_secs,
            healthy: received && silence_secs <= self.stale_after_secs,
        }
    }

    /// Check every channel, logging once per healthy/stale transition.
    pub fn check(&mut self, inputs: &InputSnapshot, now: f64) -> HealthReport {
        let report = HealthReport {
            pose: self.channel(inputs.pose.timestamp, now),
            imu: self.channel(inputs.imu.timestamp, now),
            range: self.channel(inputs.range.timestamp, now),
        };

        let channels = [("pose", report.pose), ("imu", report.imu), ("range", report.range)];
        for (idx, (name, health)) in channels.iter().enumerate() {
            if self.was_healthy[idx] && !health.healthy {
                if health.received {
                    warn!("[health] {} silent for {:.1}s, holding last value", name, health.silence_secs);
                } else {
                    warn!("[health] no {} sample received yet, using default", name);
                }
            } else if !self.was_healthy[idx] && health.healthy {
                info!("[health] {} recovered", name);
            }
            self.was_healthy[idx] = health.healthy;
        }

        report
    }

    pub fn format_status(report: &HealthReport) -> String {
        let fmt = |health: &ChannelHealth| {
            if health.healthy {
                "✓".to_string()
            } else if health.received {
                format!("⚠ (silent {:.1}s)", health.silence_secs)
            } else {
                "⚠ (no data)".to_string()
            }
        };
        format!(
            "Pose: {} | IMU: {} | Range: {}",
            fmt(&report.pose),
            fmt(&report.imu),
            fmt(&report.range)
        )
    }
}
