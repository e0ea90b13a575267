//! KPI pipeline entry point — CLI wiring and mode dispatch.

use std::path::Path;
use std::process;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pv_kpi::config::PlantConfig;
use pv_kpi::io::{feed, ingest, publish};
use pv_kpi::pipeline::availability::{AvailabilityEngine, availability_tick};
use pv_kpi::pipeline::counters::CounterLedger;
use pv_kpi::pipeline::performance::{PerformanceRatioEngine, performance_tick};

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    batch_input: Option<String>,
    temps_path: Option<String>,
    availability_out: String,
    performance_out: String,
    stream_input: Option<String>,
    state_path: String,
    #[cfg(feature = "live")]
    feed_url: Option<String>,
    #[cfg(feature = "live")]
    publish_url: Option<String>,
}

fn print_help() {
    eprintln!("pv-kpi — fleet PV availability and performance-ratio pipeline");
    eprintln!();
    eprintln!("Usage: pv-kpi [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>            Load plant configuration from TOML file");
    eprintln!("  --batch-input <path>       Replay a sample table CSV (batch mode)");
    eprintln!("  --temps <path>             Ambient temperature CSV for the thermal model");
    eprintln!("  --availability-out <path>  Availability table output (default: availability.csv)");
    eprintln!("  --performance-out <path>   Performance table output (default: performance.csv)");
    eprintln!("  --stream-input <path>      Run one tick over a feed snapshot JSON (streaming mode)");
    eprintln!("  --state <path>             Counter ledger state file (default: kpi_state.json)");
    #[cfg(feature = "live")]
    {
        eprintln!("  --feed-url <url>           Pull the live window from the upstream API");
        eprintln!("  --publish-url <url>        POST tick payloads to the staging endpoint");
    }
    eprintln!("  --help                     Show this help message");
    eprintln!();
    #[cfg(feature = "live")]
    eprintln!("Exactly one of --batch-input or --stream-input/--feed-url must be given.");
    #[cfg(not(feature = "live"))]
    eprintln!("Exactly one of --batch-input or --stream-input must be given.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        batch_input: None,
        temps_path: None,
        availability_out: "availability.csv".to_string(),
        performance_out: "performance.csv".to_string(),
        stream_input: None,
        state_path: "kpi_state.json".to_string(),
        #[cfg(feature = "live")]
        feed_url: None,
        #[cfg(feature = "live")]
        publish_url: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    process::exit(1);
                }
                cli.config_path = Some(args[i].clone());
            }
            "--batch-input" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --batch-input requires a path argument");
                    process::exit(1);
                }
                cli.batch_input = Some(args[i].clone());
            }
            "--temps" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --temps requires a path argument");
                    process::exit(1);
                }
                cli.temps_path = Some(args[i].clone());
            }
            "--availability-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --availability-out requires a path argument");
                    process::exit(1);
                }
                cli.availability_out = args[i].clone();
            }
            "--performance-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --performance-out requires a path argument");
                    process::exit(1);
                }
                cli.performance_out = args[i].clone();
            }
            "--stream-input" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --stream-input requires a path argument");
                    process::exit(1);
                }
                cli.stream_input = Some(args[i].clone());
            }
            "--state" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --state requires a path argument");
                    process::exit(1);
                }
                cli.state_path = args[i].clone();
            }
            #[cfg(feature = "live")]
            "--feed-url" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --feed-url requires a url argument");
                    process::exit(1);
                }
                cli.feed_url = Some(args[i].clone());
            }
            #[cfg(feature = "live")]
            "--publish-url" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --publish-url requires a url argument");
                    process::exit(1);
                }
                cli.publish_url = Some(args[i].clone());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Whether any streaming source was requested.
fn wants_stream(cli: &CliArgs) -> bool {
    #[cfg(feature = "live")]
    {
        cli.stream_input.is_some() || cli.feed_url.is_some()
    }
    #[cfg(not(feature = "live"))]
    {
        cli.stream_input.is_some()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    let config = if let Some(ref path) = cli.config_path {
        match PlantConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        PlantConfig::site_default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let batch = cli.batch_input.is_some();
    let stream = wants_stream(&cli);
    if batch == stream {
        eprintln!("error: choose exactly one mode (batch or streaming)");
        print_help();
        process::exit(1);
    }

    let code = if batch {
        run_batch(&cli, &config)
    } else {
        run_stream_tick(&cli, &config)
    };
    process::exit(code);
}

/// Full historical replay: recompute both KPI tables and replace the outputs.
fn run_batch(cli: &CliArgs, config: &PlantConfig) -> i32 {
    let input = cli.batch_input.as_deref().unwrap_or_default();
    let samples = match ingest::read_samples_csv(Path::new(input)) {
        Ok(samples) => samples,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    info!(samples = samples.len(), "sample table loaded");

    let temps = match cli.temps_path.as_deref() {
        Some(path) => match ingest::read_temps_csv(Path::new(path)) {
            Ok(temps) => temps,
            Err(e) => {
                eprintln!("{e}");
                return 1;
            }
        },
        None => Vec::new(),
    };

    let availability = AvailabilityEngine::new(config).run(&samples);
    let performance = PerformanceRatioEngine::new(config).run(&samples, &temps);

    if let Err(e) = publish::export_availability_csv(&availability, Path::new(&cli.availability_out))
    {
        eprintln!("error: failed to write availability table: {e}");
        return 1;
    }
    eprintln!(
        "Availability table written to {} ({} rows)",
        cli.availability_out,
        availability.len()
    );

    if let Err(e) = publish::export_performance_csv(&performance, Path::new(&cli.performance_out)) {
        eprintln!("error: failed to write performance table: {e}");
        return 1;
    }
    eprintln!(
        "Performance table written to {} ({} rows)",
        cli.performance_out,
        performance.len()
    );

    0
}

/// One streaming tick: pull the live window, compute both KPIs, publish.
fn run_stream_tick(cli: &CliArgs, config: &PlantConfig) -> i32 {
    let blob = match load_feed(cli) {
        Ok(blob) => blob,
        Err(e) => {
            error!("{e}");
            println!("{}", publish::error_payload(&e.to_string()));
            return 1;
        }
    };

    let state_path = Path::new(&cli.state_path);
    let mut ledger = match CounterLedger::load(state_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("{e}");
            println!("{}", publish::error_payload(&e.to_string()));
            return 1;
        }
    };

    let intervals = feed::tick_intervals(config, &blob, &mut ledger);
    let mean_irr = feed::mean_irradiance(config, &blob);
    let mean_ambient = feed::mean_ambient(config, &blob);

    let mut code = 0;

    match availability_tick(config, mean_irr, &intervals) {
        Ok(tick) => {
            info!("{tick}");
            code = code.max(emit(cli, &publish::availability_payload(&tick)));
        }
        Err(e) => {
            error!("{e}");
            println!("{}", publish::error_payload(&e.to_string()));
            code = 1;
        }
    }

    match performance_tick(config, mean_irr, mean_ambient, &intervals) {
        Ok(tick) => {
            info!("{tick}");
            code = code.max(emit(cli, &publish::performance_payload(&tick)));
        }
        Err(e) => {
            error!("{e}");
            println!("{}", publish::error_payload(&e.to_string()));
            code = 1;
        }
    }

    // the ledger is the only state carried across ticks
    if let Err(e) = ledger.store(state_path) {
        error!("{e}");
        eprintln!("{e}");
        code = 1;
    }

    code
}

/// Loads the live window from the snapshot file or the upstream API.
fn load_feed(cli: &CliArgs) -> pv_kpi::error::Result<feed::FeedBlob> {
    if let Some(ref path) = cli.stream_input {
        return feed::read_feed_file(Path::new(path));
    }
    #[cfg(feature = "live")]
    if let Some(ref url) = cli.feed_url {
        return feed::fetch_feed(url);
    }
    Err(pv_kpi::error::KpiError::Upstream(
        "no streaming source configured".to_string(),
    ))
}

/// Prints a tick payload and optionally POSTs it to the staging endpoint.
fn emit(cli: &CliArgs, payload: &serde_json::Value) -> i32 {
    println!("{payload}");
    #[cfg(feature = "live")]
    if let Some(ref url) = cli.publish_url {
        if let Err(e) = publish::post_json(url, payload) {
            error!("{e}");
            eprintln!("{e}");
            return 1;
        }
    }
    #[cfg(not(feature = "live"))]
    let _ = cli;
    0
}
