//! Moving-average crossover backtesting and parameter optimization
//!
//! Provides:
//! - Seedable synthetic daily price series
//! - Simple moving averages with explicit warm-up
//! - Long-only single-position crossover simulator
//! - Return, drawdown, Sharpe and benchmark statistics
//! - Parallel grid search over (short, long) window pairs

pub mod engine;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod series;
pub mod types;

// Re-exports for convenience
pub use engine::{run_backtest, BacktestEngine, SimulationOutput};
pub use error::{EngineError, EngineResult};
pub use indicators::{closes, simple_moving_average};
pub use metrics::PerformanceAnalyzer;
pub use optimizer::{
    build_parameter_grid, optimize, optimize_with_progress, run_optimization, OptimizeProgress,
    OptimizeRequest, OptimizeStatus, DEFAULT_LONG_WINDOWS, DEFAULT_SHORT_WINDOWS,
};
pub use series::{
    generate_default_series, generate_seeded_series, generate_series, validate_series,
    SeriesConfig,
};
pub use types::*;
