//! Latencytest - round-trip audio latency tester
//!
//! Plays a tone burst on the default output device, listens on the default
//! input device and prints how long the tone took to come back.

use anyhow::{Context, Result};
use latencytest::audio::cpal_host::{self, CpalHost};
use latencytest::stats::summary::LatencyReport;
use latencytest::{AudioLatencyHarness, HarnessConfig, StartOutcome};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// How often results are polled while a session runs
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Extra time allowed after the nominal test window
const SETTLE_TIME: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    output_rate: u32,
    buffer_hint: u32,
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("latencytest=info".parse()?)
                .add_directive("latencytest_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices();
                return Ok(());
            }
            "--version" | "-v" => {
                println!(
                    "latencytest {} (built {})",
                    latencytest::VERSION,
                    latencytest::BUILD_DATE
                );
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--json" => options.json = true,
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                };
                options.config_path = Some(PathBuf::from(path));
                i += 1;
            }
            "--output-rate" | "-r" => {
                let Some(rate) = args.get(i + 1).and_then(|v| v.parse().ok()) else {
                    eprintln!("Error: --output-rate requires a rate in Hz");
                    return Ok(());
                };
                options.output_rate = rate;
                i += 1;
            }
            "--buffer-hint" | "-b" => {
                let Some(bytes) = args.get(i + 1).and_then(|v| v.parse().ok()) else {
                    eprintln!("Error: --buffer-hint requires a size in bytes");
                    return Ok(());
                };
                options.buffer_hint = bytes;
                i += 1;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    run(options)
}

fn print_help() {
    println!("Usage: latencytest [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list               List audio devices");
    println!("  -c, --config PATH        Load settings from PATH (default: data dir)");
    println!("  -r, --output-rate HZ     Playback stream rate (0 = clip rate, default)");
    println!("  -b, --buffer-hint BYTES  Playback buffer size hint for the backend");
    println!("      --json               Print the report as JSON");
    println!("  -v, --version            Show version");
    println!("  -h, --help               Show this help");
    println!();
    println!("Place the microphone near the speaker and keep the room quiet.");
}

fn list_devices() {
    match cpal_host::list_devices() {
        Ok(devices) if devices.is_empty() => println!("No audio devices found."),
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let mut markers = String::new();
                if device.is_default_output {
                    markers.push_str(" [DEFAULT OUT]");
                }
                if device.is_default_input {
                    markers.push_str(" [DEFAULT IN]");
                }
                println!("  {}. {}{}", i + 1, device.name, markers);
                println!(
                    "     Channels: {} in, {} out",
                    device.input_channels, device.output_channels
                );
                if let Some(rate) = device.default_sample_rate {
                    println!("     Default rate: {} Hz", rate);
                }
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
}

fn run(options: Options) -> Result<()> {
    let config_path = options
        .config_path
        .unwrap_or_else(HarnessConfig::default_path);
    let config = HarnessConfig::load(&config_path);
    let window = Duration::from_millis(config.test_window_ms()) + SETTLE_TIME;

    let mut harness = AudioLatencyHarness::new(CpalHost::new(), config);
    harness
        .create_engine()
        .context("Failed to create audio engine")?;
    harness
        .create_playback_stream(options.output_rate, options.buffer_hint)
        .context("Failed to open playback stream")?;
    harness
        .create_capture_stream()
        .context("Failed to open capture stream (is microphone access allowed?)")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        error!("Failed to install Ctrl+C handler: {}", e);
    }

    if harness.start()? == StartOutcome::Busy {
        println!("A measurement is already running.");
        return Ok(());
    }
    if !options.json {
        println!("Measuring for {:.1}s. Press Ctrl+C to stop.", window.as_secs_f32());
    }

    let started = Instant::now();
    let mut last_onsets = 0;
    while running.load(Ordering::SeqCst) && started.elapsed() < window {
        std::thread::sleep(POLL_INTERVAL);
        let onsets = harness.onset_count();
        if onsets != last_onsets {
            info!(onsets, results = ?harness.fetch_results(), "Partial results");
            last_onsets = onsets;
        }
    }

    let report = harness.report();
    harness.shutdown();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &LatencyReport) {
    println!();
    println!("Device:  {}", report.device.as_deref().unwrap_or("unknown"));
    println!(
        "Onsets:  {}{}",
        report.onset_count,
        if report.truncated { " (only the first are kept)" } else { "" }
    );

    let Some(summary) = report.summary else {
        println!("No tone was detected. Check volume and microphone placement.");
        return;
    };

    println!(
        "Latency: {:.1} ms (std dev {:.1} ms over {} samples)",
        summary.avg_ms, summary.std_dev_ms, summary.valid_samples
    );
    if let Some(rating) = report.rating {
        println!("Rating:  {}", rating);
    }
    if !report.consistent {
        println!("Results are inconsistent; repeat the test in a quieter room.");
    }
}
