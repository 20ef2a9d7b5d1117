mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use exit_codes::{exit_code_for, EXIT_SUCCESS, EXIT_USAGE};
use forecast_consensus::config::{ConfigError, ModelConfig, CONFIG_ENV};
use forecast_consensus::data::store::today;
use forecast_consensus::pipeline::{Pipeline, Target};

#[derive(Parser)]
#[command(name = "forecast-consensus")]
#[command(about = "Weighted consensus of several weather forecast sources")]
#[command(version)]
struct Cli {
    /// Model config (TOML)
    #[arg(long, short = 'c', env = CONFIG_ENV, default_value = "forecast.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn source weights from history and store them
    #[command(alias = "REDUCE")]
    Reduce(RunArgs),

    /// Blend the newest forecasts with stored weights and score the blend
    #[command(alias = "PRODUCE")]
    Produce(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// City to process (repeatable)
    #[arg(long = "city", required_unless_present = "cities_file")]
    cities: Vec<String>,

    /// File with one city per line (`#` starts a comment)
    #[arg(long, conflicts_with = "cities")]
    cities_file: Option<PathBuf>,

    /// Restrict records to this country
    #[arg(long)]
    country: Option<String>,

    /// Largest forecast distance, in days
    #[arg(short = 'm', long = "max", default_value_t = 0)]
    max: usize,

    /// Newest labels considered per alignment (overrides the config)
    #[arg(short = 'l', long)]
    limit: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ModelConfig::load(&cli.config)?;
    let (args, reduce) = match cli.command {
        Commands::Reduce(args) => (args, true),
        Commands::Produce(args) => (args, false),
    };
    let cities = cities(&args)?;
    let limit = args.limit.or(config.limit);
    if limit == Some(0) {
        return Err(ConfigError::Validation("--limit must be at least 1".into()).into());
    }

    let pipeline = Pipeline::open(config)?;
    let updated = today();
    for city in cities {
        let target = Target {
            city,
            country: args.country.clone(),
            max_distance: args.max,
            limit,
        };
        if reduce {
            let table = pipeline.reduce(&target, updated)?;
            info!("{}: learned {} key(s)", target.city, table.keys().count());
        } else {
            let runs = pipeline.produce(&target, updated)?;
            let labels: usize = runs.iter().map(|r| r.labels).sum();
            info!("{}: produced {labels} label(s) over {} distance(s)", target.city, runs.len());
        }
    }
    Ok(())
}

fn cities(args: &RunArgs) -> Result<Vec<String>> {
    let cities = match &args.cities_file {
        Some(path) => read_cities(path)?,
        None => args.cities.clone(),
    };
    if cities.is_empty() {
        return Err(ConfigError::Validation("no cities given".into()).into());
    }
    Ok(cities)
}

fn read_cities(path: &Path) -> Result<Vec<String>> {
    // An unreadable argument file is a usage error.
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
        .context("reading cities file")?;
    Ok(text
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
