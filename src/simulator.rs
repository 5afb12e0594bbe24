use crate::config::{LOWER_PERCENTILE, UPPER_PERCENTILE};
use crate::error::SimulationError;
use crate::stats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Noise allowance, in standard deviations of the summed log-return, used
/// when checking that paths stay within the `f64` range.
const MAX_NOISE_SIGMAS: f64 = 10.0;

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Inputs of a geometric random-walk simulation.
///
/// Drift and volatility are the mean and standard deviation of the per-step
/// log-return. Counts are signed so that non-positive requests can be
/// expressed and rejected.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub start_price: f64,
    pub step_count: i32,
    pub drift_per_step: f64,
    pub volatility_per_step: f64,
    pub path_count: i32,
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.start_price.is_finite() || self.start_price <= 0.0 {
            return Err(SimulationError::invalid(
                "start_price",
                format!("must be positive and finite, got {}", self.start_price),
            ));
        }
        if self.step_count <= 0 {
            return Err(SimulationError::invalid(
                "step_count",
                format!("must be positive, got {}", self.step_count),
            ));
        }
        if self.path_count <= 0 {
            return Err(SimulationError::invalid(
                "path_count",
                format!("must be positive, got {}", self.path_count),
            ));
        }
        if !self.drift_per_step.is_finite() {
            return Err(SimulationError::invalid(
                "drift_per_step",
                format!("must be finite, got {}", self.drift_per_step),
            ));
        }
        if !self.volatility_per_step.is_finite() || self.volatility_per_step < 0.0 {
            return Err(SimulationError::invalid(
                "volatility_per_step",
                format!(
                    "must be non-negative and finite, got {}",
                    self.volatility_per_step
                ),
            ));
        }
        self.check_log_range()
    }

    /// Rejects parameters whose paths could leave the range of `f64`.
    ///
    /// The bound is `|ln start| + |drift| * n + 10 * vol * sqrt(n)`, which must
    /// stay below `ln(f64::MAX)`; beyond it prices overflow to infinity or
    /// underflow to zero.
    fn check_log_range(&self) -> Result<(), SimulationError> {
        let n = self.step_count as f64;
        let drift_reach = self.drift_per_step.abs() * n;
        let noise_reach = MAX_NOISE_SIGMAS * self.volatility_per_step * n.sqrt();
        let reach = self.start_price.ln().abs() + drift_reach + noise_reach;
        if reach < f64::MAX.ln() {
            return Ok(());
        }
        let name = if noise_reach >= drift_reach {
            "volatility_per_step"
        } else {
            "drift_per_step"
        };
        Err(SimulationError::invalid(
            name,
            format!(
                "log-price excursion {:.1} over {} steps exceeds the f64 range ({:.1})",
                reach,
                self.step_count,
                f64::MAX.ln()
            ),
        ))
    }

    fn steps(&self) -> usize {
        self.step_count.max(0) as usize
    }

    fn paths(&self) -> usize {
        self.path_count.max(0) as usize
    }

    fn step_distribution(&self) -> Result<Normal<f64>, SimulationError> {
        Normal::new(self.drift_per_step, self.volatility_per_step)
            .map_err(|e| SimulationError::invalid("volatility_per_step", e.to_string()))
    }
}

/// One simulated trajectory: `step_count + 1` prices starting at the start price.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PricePath(Vec<f64>);

impl PricePath {
    pub fn prices(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn at(&self, step: usize) -> Option<f64> {
        self.0.get(step).copied()
    }

    pub fn end(&self) -> f64 {
        self.0.last().copied().unwrap_or_default()
    }
}

/// Cross-path statistics at a single time step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StepBand {
    pub step: usize,
    pub mean: f64,
    pub p5: f64,
    pub p95: f64,
}

impl StepBand {
    fn from_column(step: usize, column: &mut [f64]) -> Self {
        let mean = stats::mean(column);
        stats::sort_ascending(column);
        Self {
            step,
            mean,
            p5: stats::percentile(column, LOWER_PERCENTILE),
            p95: stats::percentile(column, UPPER_PERCENTILE),
        }
    }
}

/// Statistics of the end prices across all paths.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FinalSummary {
    pub mean: f64,
    pub median: f64,
    pub p5: f64,
    pub p95: f64,
    pub std_dev: f64,
    /// Fraction of paths ending above the start price.
    pub probability_of_gain: f64,
}

impl FinalSummary {
    fn from_end_prices(end_prices: &mut [f64], start_price: f64) -> Self {
        let mean = stats::mean(end_prices);
        let std_dev = stats::std_dev(end_prices);
        let gains = end_prices.iter().filter(|&&p| p > start_price).count();
        let probability_of_gain = if end_prices.is_empty() {
            0.0
        } else {
            gains as f64 / end_prices.len() as f64
        };

        stats::sort_ascending(end_prices);
        Self {
            mean,
            median: stats::median(end_prices),
            p5: stats::percentile(end_prices, LOWER_PERCENTILE),
            p95: stats::percentile(end_prices, UPPER_PERCENTILE),
            std_dev,
            probability_of_gain,
        }
    }
}

/// Output of one simulation run. Read-only once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationResult {
    params: SimulationParameters,
    paths: Vec<PricePath>,
    bands: Vec<StepBand>,
    final_summary: FinalSummary,
}

/// How per-step bands are reduced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reduction {
    Sequential,
    Parallel,
}

fn column_band(paths: &[PricePath], t: usize) -> StepBand {
    let mut column: Vec<f64> = paths.iter().map(|p| p.0[t]).collect();
    StepBand::from_column(t, &mut column)
}

impl SimulationResult {
    fn from_paths(
        params: SimulationParameters,
        paths: Vec<PricePath>,
        reduction: Reduction,
    ) -> Self {
        let steps = params.steps();

        // Each column is reduced sequentially, so both modes give the same numbers.
        let bands: Vec<StepBand> = match reduction {
            Reduction::Sequential => (0..=steps).map(|t| column_band(&paths, t)).collect(),
            Reduction::Parallel => (0..=steps)
                .into_par_iter()
                .map(|t| column_band(&paths, t))
                .collect(),
        };

        let mut end_prices: Vec<f64> = paths.iter().map(PricePath::end).collect();
        let final_summary = FinalSummary::from_end_prices(&mut end_prices, params.start_price);

        Self {
            params,
            paths,
            bands,
            final_summary,
        }
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    pub fn paths(&self) -> &[PricePath] {
        &self.paths
    }

    pub fn bands(&self) -> &[StepBand] {
        &self.bands
    }

    pub fn final_summary(&self) -> &FinalSummary {
        &self.final_summary
    }

    /// Number of simulated steps after the start.
    pub fn horizon(&self) -> usize {
        self.params.steps()
    }

    pub fn end_prices(&self) -> Vec<f64> {
        self.paths.iter().map(PricePath::end).collect()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Core: Path Generation
// ──────────────────────────────────────────────────────────────────────────────

fn generate_path<R: Rng + ?Sized>(
    start_price: f64,
    steps: usize,
    step_dist: &Normal<f64>,
    rng: &mut R,
) -> PricePath {
    let mut prices = Vec::with_capacity(steps + 1);
    let mut price = start_price;
    prices.push(price);
    for _ in 0..steps {
        let z = step_dist.sample(rng);
        price *= z.exp();
        prices.push(price);
    }
    PricePath(prices)
}

/// Runs the simulation drawing from `rng`.
///
/// Draws are consumed path by path, and in step order within a path, so a
/// seeded source reproduces the result exactly. Parameters are validated
/// before the first draw.
pub fn simulate<R: Rng + ?Sized>(
    params: SimulationParameters,
    rng: &mut R,
) -> Result<SimulationResult, SimulationError> {
    params.validate()?;
    let step_dist = params.step_distribution()?;
    debug!(?params, "Starting sequential path simulation");

    let steps = params.steps();
    let paths: Vec<PricePath> = (0..params.paths())
        .map(|_| generate_path(params.start_price, steps, &step_dist, rng))
        .collect();

    let result = SimulationResult::from_paths(params, paths, Reduction::Sequential);
    log_completion(&result);
    Ok(result)
}

pub fn simulate_seeded(
    params: SimulationParameters,
    seed: u64,
) -> Result<SimulationResult, SimulationError> {
    let mut rng = StdRng::seed_from_u64(seed);
    simulate(params, &mut rng)
}

/// Independent random stream for path `index` of a parallel run.
///
/// Both the run seed and the path index go into the 32-byte generator key,
/// so no two `(seed, index)` pairs share a stream.
pub fn path_stream(seed: u64, index: usize) -> StdRng {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&(index as u64).to_le_bytes());
    StdRng::from_seed(key)
}

/// Generates paths in parallel, one [`path_stream`] per path.
///
/// The output depends only on `params` and `seed`, not on the number of
/// worker threads. It differs from [`simulate_seeded`] with the same seed
/// because the draws come from different streams.
pub fn simulate_parallel(
    params: SimulationParameters,
    seed: u64,
) -> Result<SimulationResult, SimulationError> {
    params.validate()?;
    let step_dist = params.step_distribution()?;
    debug!(
        ?params,
        threads = rayon::current_num_threads(),
        "Starting parallel path simulation"
    );

    let steps = params.steps();
    let paths: Vec<PricePath> = (0..params.paths())
        .into_par_iter()
        .map(|i| {
            let mut rng = path_stream(seed, i);
            generate_path(params.start_price, steps, &step_dist, &mut rng)
        })
        .collect();

    let result = SimulationResult::from_paths(params, paths, Reduction::Parallel);
    log_completion(&result);
    Ok(result)
}

fn log_completion(result: &SimulationResult) {
    let summary = result.final_summary();
    info!(
        "Simulated {} paths over {} steps: mean={:.2} median={:.2} p5={:.2} p95={:.2}",
        result.paths().len(),
        result.horizon(),
        summary.mean,
        summary.median,
        summary.p5,
        summary.p95
    );
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
