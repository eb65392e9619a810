use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use altitude_ekf::config::AppConfig;
use altitude_ekf::filter_loop::FilterLoop;
use altitude_ekf::output::{EstimateRecord, JsonLinesSink};
use altitude_ekf::sensors::SensorInputs;
use altitude_ekf::types::{ImuSample, PoseSample, RangeSample};
use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use log::info;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded session (.json or .json.gz)
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of sessions to batch replay (*.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the filter rate [Hz]
    #[arg(long)]
    rate: Option<f64>,

    /// Write per-tick records here instead of stdout (single session only)
    #[arg(long)]
    output: Option<PathBuf>,
}

/// One recorded input event; any subset of channels may be present.
#[derive(Deserialize, Debug, Clone)]
struct SessionSample {
    timestamp: f64,
    pose: Option<PoseSample>,
    imu: Option<ImuSample>,
    range: Option<RangeSample>,
}

#[derive(Deserialize, Debug)]
struct Session {
    samples: Vec<SessionSample>,
}

fn parse_session<R: Read>(reader: R) -> anyhow::Result<Session> {
    let mut session: Session = serde_json::from_reader(reader)?;
    session.samples.retain(|s| s.timestamp.is_finite());
    session.samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(session)
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        parse_session(BufReader::new(GzDecoder::new(file)))
    } else {
        parse_session(BufReader::new(file))
    }
}

/// Write one session sample into the channel buffers, stamped with the
/// session clock.
fn feed(inputs: &SensorInputs, sample: &SessionSample) {
    if let Some(pose) = sample.pose {
        inputs.write_pose(PoseSample { timestamp: sample.timestamp, ..pose });
    }
    if let Some(imu) = sample.imu {
        inputs.write_imu(ImuSample { timestamp: sample.timestamp, ..imu });
    }
    if let Some(range) = sample.range {
        inputs.write_range(RangeSample { timestamp: sample.timestamp, ..range });
    }
}

/// Tick the filter over the session clock at the configured rate.
fn replay(
    session: &Session,
    config: &AppConfig,
    mut emit: impl FnMut(&EstimateRecord) -> anyhow::Result<()>,
) -> anyhow::Result<FilterLoop> {
    let inputs = Arc::new(SensorInputs::new());
    let mut filter = FilterLoop::new(config.clone(), inputs.clone())?;

    let (start, end) = match (session.samples.first(), session.samples.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return Ok(filter),
    };
    let period = config.filter_loop.period_secs();

    let mut next = 0;
    let mut tick = 0u64;
    loop {
        let now = start + tick as f64 * period;
        if now > end {
            break;
        }
        while next < session.samples.len() && session.samples[next].timestamp <= now {
            feed(&inputs, &session.samples[next]);
            next += 1;
        }
        let dt = if tick == 0 { 0.0 } else { period };
        let record = filter.tick(dt, now);
        emit(&record)?;
        tick += 1;
    }
    Ok(filter)
}

fn summary(path: &Path, filter: &FilterLoop, last: Option<&EstimateRecord>) -> serde_json::Value {
    let counters = filter.ekf().counters();
    json!({
        "log": path.display().to_string(),
        "cycles": filter.ekf().cycles(),
        "final_position": last.map(|r| r.position),
        "final_offset": last.map(|r| r.offset),
        "final_covariance_trace": last.map(|r| r.covariance_trace),
        "counters": counters,
        "total_gated": counters.total_gated(),
        "gate_threshold": filter.ekf().gate_threshold(),
        "samples": filter.inputs().counts(),
    })
}

fn run_once(path: &Path, args: &Args, config: &AppConfig) -> anyhow::Result<serde_json::Value> {
    let session = load_session(path).with_context(|| format!("loading {}", path.display()))?;
    info!("{}: {} samples", path.display(), session.samples.len());

    let mut last = None;
    let filter = match args.output.as_ref() {
        Some(out) => {
            let mut sink = JsonLinesSink::create(out)?;
            let filter = replay(&session, config, |record| {
                sink.write(record)?;
                last = Some(record.clone());
                Ok(())
            })?;
            sink.flush()?;
            filter
        }
        None if args.golden_dir.is_none() => replay(&session, config, |record| {
            println!("{}", serde_json::to_string(record)?);
            last = Some(record.clone());
            Ok(())
        })?,
        None => replay(&session, config, |record| {
            last = Some(record.clone());
            Ok(())
        })?,
    };
    Ok(summary(path, &filter, last.as_ref()))
}

fn is_session_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.filter_loop.rate_hz = rate;
    }
    config.validate()?;

    let mut results = Vec::new();
    if let Some(dir) = args.golden_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_session_file(&path) {
                continue;
            }
            match run_once(&path, &args, &config) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args, &config)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    let report = serde_json::to_string_pretty(&results)?;
    if args.output.is_some() || args.golden_dir.is_some() {
        println!("{}", report);
    } else {
        eprintln!("{}", report);
    }
    Ok(())
}
