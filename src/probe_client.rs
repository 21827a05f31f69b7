use anyhow::Context;

use tcpprobe::client::{run_sweep_with, SessionReport};
use tcpprobe::config::{client_command, ClientConfig, OutputMode};
use tcpprobe::logging::setup_logging;
use tcpprobe::params::MeasurementKind;

fn print_report(host: &str, report: &SessionReport) {
    for sample in &report.samples.samples {
        println!(
            "probe_seq={} rtt={:.3} ms",
            sample.sequence,
            sample.round_trip.as_nanos() as f64 / 1_000_000.0
        );
    }

    let stats = &report.statistics;
    println!("--- {} measure statistics ---", host);
    println!(
        "{} message transmitted, {}% message loss, {} message size, rtt = {}, time = {:.3}ms",
        stats.transmitted,
        stats.loss_percent,
        stats.payload_size,
        match stats.mean_rtt_ms {
            Some(mean) => format!("{:.3}ms", mean),
            None => "n/a".to_string(),
        },
        stats.total_ms
    );
    if let (Some(min), Some(max)) = (stats.min_rtt_ms, stats.max_rtt_ms) {
        println!("rtt min/max = {:.3}/{:.3} ms", min, max);
    }
    if stats.retransmitted > 0 {
        println!("{} probes retransmitted", stats.retransmitted);
    }
    if stats.measurement_kind == MeasurementKind::Throughput {
        match stats.throughput_kbps {
            Some(kbps) => println!("Average throughput = {:.4} kbps", kbps),
            None => println!("Average throughput = n/a"),
        }
    }
    println!();
}

fn main() -> anyhow::Result<()> {
    setup_logging();

    let matches = client_command().get_matches();
    let config = ClientConfig::from_matches(&matches)?;
    let sessions = config.sessions()?;

    let reports = run_sweep_with(
        config.server,
        &sessions,
        &config.options,
        config.parallel,
        |report| {
            if config.output_mode == OutputMode::Normal {
                print_report(&config.host, report);
            }
        },
    )
    .context("measurement failed")?;

    if config.output_mode == OutputMode::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}
