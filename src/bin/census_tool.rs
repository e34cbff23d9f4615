use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use supply_census::persistence::DEFAULT_MAX_SNAPSHOT_AGE_SECS;
use supply_census::{CensusConfig, PersistedSnapshot};

#[derive(Parser)]
#[command(name = "census-tool")]
#[command(about = "Developer tooling for the supply census snapshot mirror")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the goods and totals stored in a snapshot file
    Inspect {
        snapshot: PathBuf,
        #[arg(long, default_value_t = 0)]
        top: usize,
    },
    /// Report whether a snapshot would be restored at startup
    Check {
        snapshot: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_SNAPSHOT_AGE_SECS)]
        max_age_secs: u64,
    },
    /// Print the default configuration, or validate a config file
    Config {
        #[arg(long)]
        validate: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { snapshot, top } => inspect(&snapshot, top),
        Command::Check {
            snapshot,
            max_age_secs,
        } => check(&snapshot, max_age_secs),
        Command::Config { validate } => config(validate.as_deref()),
    }
}

fn read_snapshot(path: &Path) -> Result<PersistedSnapshot> {
    PersistedSnapshot::read_from(path)
        .with_context(|| format!("Failed to load snapshot '{}'", path.display()))
}

fn inspect(path: &Path, top: usize) -> Result<()> {
    let snapshot = read_snapshot(path)?;

    let completed = DateTime::<Utc>::from_timestamp(snapshot.completed_at, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| format!("invalid ({})", snapshot.completed_at));
    println!("snapshot:  {}", path.display());
    println!("format:    v{}", snapshot.format_version);
    println!("completed: {}", completed);
    println!("goods:     {}", snapshot.totals.len());
    println!(
        "items:     {}",
        snapshot.totals.values().copied().map(u128::from).sum::<u128>()
    );

    let mut rows: Vec<(&String, &u64)> = snapshot.totals.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if top > 0 {
        rows.truncate(top);
    }

    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, quantity) in rows {
        println!("  {:<width$}  {:>12}", name, quantity, width = width);
    }
    Ok(())
}

fn check(path: &Path, max_age_secs: u64) -> Result<()> {
    let snapshot = read_snapshot(path)?;

    snapshot
        .ensure_usable(Utc::now(), max_age_secs)
        .with_context(|| format!("'{}' would be discarded", path.display()))?;

    println!("OK: '{}' would be restored", path.display());
    Ok(())
}

fn config(validate: Option<&Path>) -> Result<()> {
    match validate {
        Some(path) => {
            let config = CensusConfig::from_json_file(path)
                .with_context(|| format!("Invalid config '{}'", path.display()))?;
            println!("OK: '{}' is valid", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        None => println!("{}", serde_json::to_string_pretty(&CensusConfig::default())?),
    }
    Ok(())
}
