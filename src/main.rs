use std::path::PathBuf;
use std::sync::Arc;

use altitude_ekf::config::AppConfig;
use altitude_ekf::filter_loop::FilterLoop;
use altitude_ekf::health_monitor::HealthMonitor;
use altitude_ekf::output::{EstimateRecord, JsonLinesSink};
use altitude_ekf::sensors::{sim_loop, HoverProfile, SensorInputs, SimChannel};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[command(name = "altitude_ekf")]
#[command(about = "Altitude EKF fusing global altitude, rangefinder and attitude", long_about = None)]
struct Args {
    /// JSON configuration file (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the filter rate [Hz]
    #[arg(long)]
    rate: Option<f64>,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Write one JSON record per tick to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run without simulated producers (all channels stay at defaults)
    #[arg(long)]
    no_sim: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.filter_loop.rate_hz = rate;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    info!("[{}] Altitude EKF starting", ts_now());
    info!("  Rate: {:.1} Hz", config.filter_loop.rate_hz);
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Simulation: {}", if args.no_sim { "off" } else { "on" });

    let inputs = Arc::new(SensorInputs::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (record_tx, mut record_rx) = mpsc::channel::<EstimateRecord>(256);

    let mut producers = Vec::new();
    if !args.no_sim {
        let profile = HoverProfile {
            leg_half_span: config.ekf.leg_half_span,
            ..HoverProfile::default()
        };
        for channel in [SimChannel::Pose, SimChannel::Imu, SimChannel::Range] {
            producers.push(tokio::spawn(sim_loop(
                channel,
                inputs.clone(),
                profile.clone(),
                channel.default_period(),
                shutdown_rx.clone(),
            )));
        }
    }

    let filter = FilterLoop::new(config.clone(), inputs.clone()).context("building filter")?;
    let filter_handle = tokio::spawn(filter.run(shutdown_rx.clone(), record_tx));

    // Stop on Ctrl-C or after the requested duration
    let duration = args.duration;
    tokio::spawn(async move {
        if duration > 0 {
            tokio::select! {
                _ = sleep(Duration::from_secs(duration)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        } else if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {}", e);
        }
        info!("[{}] Shutdown requested", ts_now());
        let _ = shutdown_tx.send(true);
    });

    let mut sink = match args.output.as_ref() {
        Some(path) => Some(
            JsonLinesSink::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => None,
    };

    let status_every = (config.filter_loop.rate_hz.round() as u64).max(1);
    let mut received = 0u64;
    while let Some(record) = record_rx.recv().await {
        received += 1;
        if let Some(sink) = sink.as_mut() {
            sink.write(&record)?;
        }
        if received % status_every == 0 {
            info!("[{}] {}", ts_now(), record.status_line());
            if let Some(health) = record.health.as_ref() {
                info!("  sensors: {}", HealthMonitor::format_status(health));
            }
            let counts = inputs.counts();
            info!("  samples: pose={} imu={} range={}", counts.pose, counts.imu, counts.range);
        }
    }

    let filter = filter_handle.await.context("filter task panicked")?;
    for producer in producers {
        producer.await.context("producer task panicked")?;
    }

    if let Some(mut sink) = sink {
        sink.flush()?;
        info!("[{}] Wrote {} records", ts_now(), sink.written());
    }

    let counters = filter.ekf().counters();
    info!(
        "[{}] Done: {} cycles, gated altitude={} range={} roll={} pitch={}, {} records dropped",
        ts_now(),
        filter.ekf().cycles(),
        counters.altitude.gated,
        counters.range.gated,
        counters.roll.gated,
        counters.pitch.gated,
        filter.dropped()
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
