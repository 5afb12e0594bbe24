use anyhow::Result;
use clap::{Parser, ValueEnum};
use pathsim::config::{self, RunDefaults, RunOverrides};
use pathsim::data::{self, ReturnKind};
use pathsim::export;
use pathsim::report;
use pathsim::simulator::{self, SimulationParameters};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum ReturnChoice {
    Simple,
    Log,
}

impl From<ReturnChoice> for ReturnKind {
    fn from(choice: ReturnChoice) -> Self {
        match choice {
            ReturnChoice::Simple => ReturnKind::Simple,
            ReturnChoice::Log => ReturnKind::Log,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "pathsim: Monte Carlo price-path simulation with per-step confidence bands",
    after_help = "EXAMPLES:
    # Derive drift/volatility from a Yahoo CSV export and simulate one year
    cargo run --release -- --history AAPL.csv --seed 42

    # Explicit parameters, parallel generation, export bands
    cargo run --release -- --start-price 100 --drift 0.0005 --volatility 0.02 --parallel --bands-csv bands.csv"
)]
struct Args {
    /// Price history file (Yahoo CSV export, or cached chart .json)
    #[arg(long, conflicts_with_all = ["start_price", "drift", "volatility"])]
    history: Option<PathBuf>,

    /// Return series used to derive drift and volatility from --history
    #[arg(long, value_enum, default_value_t = ReturnChoice::Simple)]
    returns: ReturnChoice,

    /// Label for the report (defaults to the history file name)
    #[arg(long)]
    symbol: Option<String>,

    /// Starting price (required without --history)
    #[arg(long, requires_all = ["drift", "volatility"])]
    start_price: Option<f64>,

    /// Mean per-step log-return (required without --history)
    #[arg(long, allow_hyphen_values = true)]
    drift: Option<f64>,

    /// Standard deviation of the per-step log-return (required without --history)
    #[arg(long)]
    volatility: Option<f64>,

    /// Number of steps to simulate (default: 252, or PATHSIM_DAYS)
    #[arg(long, allow_hyphen_values = true)]
    days: Option<i32>,

    /// Number of paths to simulate (default: 1000, or PATHSIM_PATHS)
    #[arg(long, allow_hyphen_values = true)]
    paths: Option<i32>,

    /// Random seed (default: PATHSIM_SEED, otherwise random)
    #[arg(long)]
    seed: Option<u64>,

    /// Generate paths in parallel with one random stream per path
    #[arg(long)]
    parallel: bool,

    /// Write per-step mean/p5/p95 to this CSV file
    #[arg(long)]
    bands_csv: Option<PathBuf>,

    /// Write every simulated path to this CSV file
    #[arg(long)]
    paths_csv: Option<PathBuf>,

    /// Write the full result to this JSON file
    #[arg(long)]
    json: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            days: self.days,
            paths: self.paths,
            seed: self.seed,
        }
    }
}

fn resolve_parameters(
    args: &Args,
    settings: &RunDefaults,
) -> Result<(String, SimulationParameters)> {
    let (days, paths) = (settings.days, settings.paths);

    if let Some(path) = &args.history {
        let history = data::load_history(path, args.symbol.as_deref())?;
        let stats = history.return_stats(args.returns.clone().into())?;
        info!(
            "{}: {} returns, drift={:.6}, volatility={:.6}, last price={:.2}",
            history.symbol, stats.observations, stats.drift, stats.volatility, stats.last_price
        );
        return Ok((history.symbol.clone(), stats.parameters(days, paths)));
    }

    match (args.start_price, args.drift, args.volatility) {
        (Some(start_price), Some(drift), Some(volatility)) => Ok((
            args.symbol.clone().unwrap_or_else(|| "custom".to_string()),
            SimulationParameters {
                start_price,
                step_count: days,
                drift_per_step: drift,
                volatility_per_step: volatility,
                path_count: paths,
            },
        )),
        _ => Err(anyhow::anyhow!(
            "Provide either --history FILE or all of --start-price, --drift and --volatility"
        )),
    }
}

fn run(args: Args) -> Result<()> {
    let settings = RunDefaults::from_env().with_overrides(args.overrides());
    let (label, params) = resolve_parameters(&args, &settings)?;

    let seed = match settings.seed {
        Some(seed) => seed,
        None => {
            let seed = rand::random::<u64>();
            warn!("No seed given; using {} (pass --seed {} to reproduce)", seed, seed);
            seed
        }
    };

    let result = if args.parallel {
        config::init_cpu_parallelism();
        simulator::simulate_parallel(params, seed)?
    } else {
        simulator::simulate_seeded(params, seed)?
    };

    report::print_summary(&label, &result);

    if let Some(path) = &args.bands_csv {
        export::save_bands_csv(&result, path)?;
    }
    if let Some(path) = &args.paths_csv {
        export::save_paths_csv(&result, path)?;
    }
    if let Some(path) = &args.json {
        export::save_json(&result, path)?;
    }
    Ok(())
}

fn main() {
    // .env may carry RUST_LOG, so it is read before the subscriber is built.
    let dotenv = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pathsim=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    config::report_env(dotenv);
    let args = Args::parse();

    match run(args) {
        Ok(_) => info!("Simulation completed."),
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
