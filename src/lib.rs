//! Monte Carlo price-path simulation under a geometric random walk.
//!
//! ```no_run
//! use pathsim::simulator::{simulate_seeded, SimulationParameters};
//!
//! let params = SimulationParameters {
//!     start_price: 100.0,
//!     step_count: 252,
//!     drift_per_step: 0.0005,
//!     volatility_per_step: 0.02,
//!     path_count: 1000,
//! };
//! let result = simulate_seeded(params, 42)?;
//! println!("median after one year: {:.2}", result.final_summary().median);
//! # Ok::<(), pathsim::error::SimulationError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod report;
pub mod simulator;
pub mod stats;
