#![forbid(unsafe_code)]

use std::env;

use anyhow::Result;
use clap::Parser;
use ticket_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Deterministic convergence simulation for ticket replicas",
    long_about = None
)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 50)]
    seeds: u64,

    /// Replicas per simulation.
    #[arg(long, default_value_t = 3)]
    peers: usize,

    /// Edit rounds per simulation.
    #[arg(long, default_value_t = 20)]
    rounds: u64,

    /// Replay a single seed and print its trace.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TICKET_LOG")
        .unwrap_or_else(|_| EnvFilter::new("ticket_sim=info,ticket_core=warn"));
    let format = env::var("TICKET_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = CampaignConfig {
        seed_range: cli.seed_start..cli.seed_start.saturating_add(cli.seeds),
        peer_count: cli.peers,
        rounds: cli.rounds,
        ..CampaignConfig::default()
    };

    if let Some(seed) = cli.replay {
        let trace = replay_seed(seed, &config)?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&trace.result.trace)?);
        } else {
            for event in &trace.result.trace {
                println!("[{:>3}] {:?}", event.round, event.kind);
            }
            for v in &trace.oracle.violations {
                println!("violation: {v}");
            }
        }
        println!(
            "seed {seed}: ops={} passed={}",
            trace.result.emitted.len(),
            trace.oracle.passed
        );
        if !trace.oracle.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let report = run_campaign(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} interesting={}",
            report.seeds_run, report.seeds_passed, report.interesting_states_reached
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for v in &failure.violations {
                println!("  {v}");
            }
        }
    }
    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
