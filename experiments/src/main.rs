// experiments/src/main.rs
//
// Runs one election scenario against a simulated cluster and prints the
// final state.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use quorum_sim::{Simulation, SimulationConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Epoch election over an unreliable simulated network
#[derive(Parser, Debug)]
#[command(name = "experiments")]
#[command(about = "Force an election, optionally partition and heal, then dump the cluster state", long_about = None)]
struct Args {
    /// Number of processes (overrides the config file)
    #[arg(short, long)]
    processes: Option<usize>,

    /// JSON config file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds before the election is forced
    #[arg(long, default_value = "2")]
    force_after: f64,

    /// Process whose election is forced
    #[arg(long, default_value = "1")]
    force_process: usize,

    /// Partition applied at start, e.g. "0,1:2"
    #[arg(long)]
    split: Option<String>,

    /// Seconds after the start at which a partition is healed
    #[arg(long)]
    heal_after: Option<f64>,

    /// Total run time in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Print the snapshot as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SimulationConfig::from_json(&raw)?
        }
        None => SimulationConfig::default(),
    };
    if let Some(processes) = args.processes {
        config.cluster_size = processes;
    }
    config.validate()?;
    Ok(config)
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("--{} must be a non-negative number of seconds", flag))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    let split = match &args.split {
        Some(spec) => match spec.split_once(':') {
            Some((left, right)) => Some((left.to_string(), right.to_string())),
            None => bail!("--split expects LEFT:RIGHT, got {:?}", spec),
        },
        None => None,
    };
    let force_after = seconds(args.force_after, "force-after")?;
    let duration = seconds(args.duration, "duration")?;
    let heal_after = args.heal_after.map(|s| seconds(s, "heal-after")).transpose()?;

    info!("[Experiments] {} processes, forcing process {} after {:?}, running {:?}",
        config.cluster_size, args.force_process, force_after, duration);
    let sim = Simulation::start(config).await?;
    if let Some((left, right)) = &split {
        sim.split_network(left, right)?;
    }

    // Events in start-relative time order
    let mut schedule: Vec<(Duration, Action)> = vec![(force_after, Action::Force)];
    if let Some(at) = heal_after {
        schedule.push((at, Action::Heal));
    }
    schedule.sort_by_key(|(at, _)| *at);

    let started = tokio::time::Instant::now();
    for (at, action) in schedule {
        if at > duration {
            continue;
        }
        tokio::time::sleep_until(started + at).await;
        match action {
            Action::Force => sim.force_election(args.force_process).await?,
            Action::Heal => {
                info!("[Experiments] Healing network");
                sim.heal_network();
            }
        }
    }
    tokio::time::sleep_until(started + duration).await;

    let snapshot = sim.snapshot().await?;
    if args.json {
        println!("{}", snapshot.to_json()?);
    } else {
        println!("{}", snapshot.summary());
        for election in &snapshot.elections {
            println!(
                "election {}: process {} epoch {} frequency {} sent {} received {} successful {}",
                election.id,
                election.elector_id,
                election.epoch,
                election.requested_frequency,
                election.sent.len(),
                election.received.len(),
                election.successful
            );
        }
        println!("\nlag matrix (ms):\n{}", sim.lag_matrix_csv());
    }
    sim.shutdown().await;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Force,
    Heal,
}
