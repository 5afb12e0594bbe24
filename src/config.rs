use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

/// Trading days simulated when no horizon is given (one year).
pub const DEFAULT_HORIZON_DAYS: i32 = 252;
/// Number of paths simulated when no count is given.
pub const DEFAULT_PATH_COUNT: i32 = 1000;
/// Lower edge of the confidence band, in percent.
pub const LOWER_PERCENTILE: f64 = 5.0;
/// Upper edge of the confidence band, in percent.
pub const UPPER_PERCENTILE: f64 = 95.0;

pub const ENV_DAYS: &str = "PATHSIM_DAYS";
pub const ENV_PATHS: &str = "PATHSIM_PATHS";
pub const ENV_SEED: &str = "PATHSIM_SEED";
pub const ENV_THREADS: &str = "PATHSIM_THREADS";

/// Logs the outcome of loading `.env` (via `dotenvy::dotenv()`).
pub fn report_env(outcome: Result<PathBuf, dotenvy::Error>) {
    match outcome {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file found, using process environment"),
        Err(e) => warn!("Failed to load .env file ({}). Continuing without it.", e),
    }
}

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = env_value::<usize>(ENV_THREADS)
            .filter(|&n| n > 0)
            .unwrap_or_else(|| num_cpus::get().max(1));
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!("Initialized Rayon thread pool with {} threads", num_threads),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Reads and parses an environment variable, warning when it is set but unusable.
pub fn env_value<T: FromStr>(key: &str) -> Option<T> {
    parse_env_value(key, std::env::var(key).ok().as_deref())
}

fn parse_env_value<T: FromStr>(key: &str, raw: Option<&str>) -> Option<T> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={} (could not parse value)", key, trimmed);
            None
        }
    }
}

/// Simulation defaults after applying environment overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunDefaults {
    pub days: i32,
    pub paths: i32,
    pub seed: Option<u64>,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            days: DEFAULT_HORIZON_DAYS,
            paths: DEFAULT_PATH_COUNT,
            seed: None,
        }
    }
}

impl RunDefaults {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();
        Self {
            days: parse_env_value(ENV_DAYS, lookup(ENV_DAYS).as_deref()).unwrap_or(base.days),
            paths: parse_env_value(ENV_PATHS, lookup(ENV_PATHS).as_deref()).unwrap_or(base.paths),
            seed: parse_env_value(ENV_SEED, lookup(ENV_SEED).as_deref()),
        }
    }

    /// Applies command-line values on top of these defaults; set fields win.
    pub fn with_overrides(self, overrides: RunOverrides) -> Self {
        Self {
            days: overrides.days.unwrap_or(self.days),
            paths: overrides.paths.unwrap_or(self.paths),
            seed: overrides.seed.or(self.seed),
        }
    }
}

/// Values given explicitly on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub days: Option<i32>,
    pub paths: Option<i32>,
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_environment() {
        let defaults = RunDefaults::from_lookup(|_| None);
        assert_eq!(defaults, RunDefaults::default());
        assert_eq!(defaults.days, 252);
        assert_eq!(defaults.paths, 1000);
        assert_eq!(defaults.seed, None);
    }

    #[test]
    fn test_environment_overrides_and_bad_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DAYS, " 21 "),
            (ENV_PATHS, "lots"),
            (ENV_SEED, "42"),
        ]);
        let defaults = RunDefaults::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(defaults.days, 21);
        assert_eq!(defaults.paths, DEFAULT_PATH_COUNT, "unparsable value falls back");
        assert_eq!(defaults.seed, Some(42));
    }

    #[test]
    fn test_command_line_beats_environment_beats_constants() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_DAYS, "21"), (ENV_SEED, "7")]);
        let from_env = RunDefaults::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        let untouched = from_env.with_overrides(RunOverrides::default());
        assert_eq!(untouched.days, 21, "environment beats constant");
        assert_eq!(untouched.paths, DEFAULT_PATH_COUNT, "constant when nothing else is set");
        assert_eq!(untouched.seed, Some(7));

        let resolved = from_env.with_overrides(RunOverrides {
            days: Some(5),
            paths: Some(10),
            seed: Some(99),
        });
        assert_eq!(
            resolved,
            RunDefaults {
                days: 5,
                paths: 10,
                seed: Some(99),
            },
            "command line beats environment and constants"
        );

        let partial = RunDefaults::default().with_overrides(RunOverrides {
            paths: Some(3),
            ..RunOverrides::default()
        });
        assert_eq!(partial.days, DEFAULT_HORIZON_DAYS);
        assert_eq!(partial.paths, 3);
        assert_eq!(partial.seed, None);
    }

    #[test]
    fn test_parse_env_value_blank_is_unset() {
        assert_eq!(parse_env_value::<u64>("X", Some("   ")), None);
        assert_eq!(parse_env_value::<u64>("X", None), None);
        assert_eq!(parse_env_value::<i32>("X", Some("-3")), Some(-3));
    }
}
