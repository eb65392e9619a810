//! Per-tick estimate records and where they go.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::filters::{CycleReport, GateCounters};
use crate::health_monitor::HealthReport;

/// One emitted estimate. `position` and `dt` are what downstream control
/// consumes; the rest is diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    /// RFC 3339
    pub timestamp: String,
    pub tick: u64,
    pub dt: f64,
    pub position: f64,
    pub velocity: f64,
    pub roll: f64,
    pub pitch: f64,
    pub offset: f64,
    pub covariance_trace: f64,
    pub acquiring: bool,
    pub counters: GateCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

impl EstimateRecord {
    pub fn from_report(
        report: &CycleReport,
        counters: &GateCounters,
        health: Option<HealthReport>,
        at: DateTime<Utc>,
    ) -> Self {
        let state = &report.state;
        EstimateRecord {
            timestamp: at.to_rfc3339(),
            tick: report.cycle,
            dt: report.dt,
            position: state.z,
            velocity: state.z_dot,
            roll: state.roll,
            pitch: state.pitch,
            offset: state.offset,
            covariance_trace: state.covariance_trace,
            acquiring: report.acquiring,
            counters: *counters,
            health,
        }
    }

    /// Session-clock timestamp (seconds since the Unix epoch) as RFC 3339.
    pub fn session_time(secs: f64) -> DateTime<Utc> {
        let secs = secs.max(0.0);
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos).unwrap_or_default()
    }

    pub fn status_line(&self) -> String {
        format!(
            "z={:.3}m vz={:+.3}m/s roll={:+.3} pitch={:+.3} offset={:+.3} trace={:.2e} gated={}",
            self.position,
            self.velocity,
            self.roll,
            self.pitch,
            self.offset,
            self.covariance_trace,
            self.counters.total_gated()
        )
    }
}

/// Writes one JSON record per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: u64,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer, written: 0 }
    }

    pub fn write(&mut self, record: &EstimateRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::filters::AltitudeEkf;
    use crate::types::InputSnapshot;

    fn sample_record() -> EstimateRecord {
        let mut ekf = AltitudeEkf::new(EkfConfig::default()).unwrap();
        let report = ekf.step(&InputSnapshot::default(), 0.05);
        EstimateRecord::from_report(&report, ekf.counters(), None, EstimateRecord::session_time(1_700_000_000.5))
    }

    #[test]
    fn test_record_fields() {
        let record = sample_record();
        assert_eq!(record.tick, 0);
        assert_eq!(record.dt, 0.05);
        assert!(record.acquiring);
        assert_eq!(record.counters.altitude.unavailable, 1);
        assert_eq!(record.counters.roll.applied, 1);
        assert_eq!(record.timestamp, "2023-11-14T22:13:20.500+00:00");
    }

    #[test]
    fn test_json_lines() {
        let record = sample_record();
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write(&record).unwrap();
        sink.write(&record).unwrap();
        assert_eq!(sink.written(), 2);

        let bytes = sink.into_inner();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: EstimateRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record);
        assert!(!lines[0].contains("health"));
    }

    #[test]
    fn test_status_line() {
        let line = sample_record().status_line();
        assert!(line.starts_with("z="));
        assert!(line.contains("gated=0"));
    }
}
