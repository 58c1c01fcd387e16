//! Grid-search parameter optimization for the crossover strategy
//!
//! Every (short, long) window pair with `short < long` is backtested against
//! the same read-only series. Pairs run in parallel on the rayon pool;
//! results are collected in enumeration order, so the best-Sharpe pick and
//! the final ranking are deterministic: ties go to the pair enumerated first.

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{info, warn};

use crate::engine::BacktestEngine;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    BacktestConfig, OptimizationResult, PriceBar, StrategyParameters, DEFAULT_INITIAL_CAPITAL,
};

// ============================================================================
// Types
// ============================================================================

pub const DEFAULT_SHORT_WINDOWS: &[usize] = &[5, 10, 15, 20, 25, 30];
pub const DEFAULT_LONG_WINDOWS: &[usize] = &[30, 40, 50, 60, 70, 80, 100];

fn default_short_windows() -> Vec<usize> {
    DEFAULT_SHORT_WINDOWS.to_vec()
}

fn default_long_windows() -> Vec<usize> {
    DEFAULT_LONG_WINDOWS.to_vec()
}

fn default_initial_capital() -> Decimal {
    DEFAULT_INITIAL_CAPITAL
}

/// Candidate windows for a grid search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    #[serde(default = "default_short_windows")]
    pub short_windows: Vec<usize>,
    #[serde(default = "default_long_windows")]
    pub long_windows: Vec<usize>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
}

impl Default for OptimizeRequest {
    fn default() -> Self {
        Self {
            short_windows: default_short_windows(),
            long_windows: default_long_windows(),
            initial_capital: DEFAULT_INITIAL_CAPITAL,
        }
    }
}

/// Optimization run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Shared progress tracker between a background search and its pollers
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub cancelled: AtomicBool,
    pub result: RwLock<Option<OptimizationResult>>,
    pub error_message: RwLock<Option<String>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            result: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    /// Claim the tracker for a new run. Returns `false` if a run is already
    /// in progress; the check and the switch to `Running` happen under one lock.
    pub fn try_start(&self) -> bool {
        let mut status = write(&self.status);
        if *status == OptimizeStatus::Running {
            return false;
        }
        self.clear();
        *status = OptimizeStatus::Running;
        true
    }

    fn clear(&self) {
        self.total_combinations.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
        *write(&self.result) = None;
        *write(&self.error_message) = None;
    }

    pub fn status(&self) -> OptimizeStatus {
        *read(&self.status)
    }

    pub fn result(&self) -> Option<OptimizationResult> {
        read(&self.result).clone()
    }

    pub fn error_message(&self) -> Option<String> {
        read(&self.error_message).clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    /// Check if currently running
    pub fn is_running(&self) -> bool {
        matches!(self.status(), OptimizeStatus::Running)
    }

    fn finish(&self, outcome: &EngineResult<OptimizationResult>) {
        match outcome {
            Ok(result) => {
                *write(&self.result) = Some(result.clone());
                *write(&self.status) = OptimizeStatus::Complete;
            }
            Err(EngineError::Cancelled) => {
                *write(&self.status) = OptimizeStatus::Cancelled;
            }
            Err(e) => {
                *write(&self.error_message) = Some(e.to_string());
                *write(&self.status) = OptimizeStatus::Error;
            }
        }
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Grid Generation
// ============================================================================

/// Every `short < long` pair, outer loop over short windows, in caller order.
/// Zero windows and repeated pairs are dropped.
pub fn build_parameter_grid(
    short_windows: &[usize],
    long_windows: &[usize],
) -> Vec<StrategyParameters> {
    let mut seen = HashSet::new();
    let mut grid = Vec::with_capacity(short_windows.len() * long_windows.len());
    for &short in short_windows {
        for &long in long_windows {
            let params = StrategyParameters::new(short, long);
            if params.is_valid() && seen.insert(params) {
                grid.push(params);
            }
        }
    }
    grid
}

// ============================================================================
// Search
// ============================================================================

/// Run the full grid search.
pub fn optimize(bars: &[PriceBar], request: &OptimizeRequest) -> EngineResult<OptimizationResult> {
    optimize_with_progress(bars, request, None)
}

/// Grid search that reports completed pairs to `progress` and honours its cancel flag.
pub fn optimize_with_progress(
    bars: &[PriceBar],
    request: &OptimizeRequest,
    progress: Option<&OptimizeProgress>,
) -> EngineResult<OptimizationResult> {
    let grid = build_parameter_grid(&request.short_windows, &request.long_windows);

    let (Some(shortest_long), Some(longest_long)) = (
        grid.iter().map(|p| p.long_window).min(),
        grid.iter().map(|p| p.long_window).max(),
    ) else {
        return Err(EngineError::EmptySearchSpace {
            reason: format!(
                "no pair with short < long in short={:?} long={:?}",
                request.short_windows, request.long_windows
            ),
        });
    };

    if bars.len() <= shortest_long {
        return Err(EngineError::EmptySearchSpace {
            reason: format!(
                "series of {} bars is too short for every pair (needs more than {})",
                bars.len(),
                shortest_long
            ),
        });
    }
    if bars.len() <= longest_long {
        return Err(EngineError::InsufficientData {
            series_len: bars.len(),
            required: longest_long + 1,
        });
    }

    if let Some(p) = progress {
        p.total_combinations
            .store(grid.len() as u32, Ordering::Relaxed);
    }

    info!(
        combinations = grid.len(),
        bars = bars.len(),
        "Parameter grid generated"
    );

    let mut results = grid
        .par_iter()
        .map(|&parameters| {
            if progress.is_some_and(|p| p.cancelled.load(Ordering::Relaxed)) {
                return Err(EngineError::Cancelled);
            }
            let config = BacktestConfig {
                parameters,
                initial_capital: request.initial_capital,
            };
            let result = BacktestEngine::run(bars, &config)?;
            if let Some(p) = progress {
                p.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(result)
        })
        .collect::<EngineResult<Vec<_>>>()?;

    // Strictly greater keeps the earliest pair on ties
    let mut best_idx = 0;
    for (i, result) in results.iter().enumerate().skip(1) {
        if result.sharpe_ratio > results[best_idx].sharpe_ratio {
            best_idx = i;
        }
    }
    let best_result = results[best_idx].clone();

    // Stable sort: equal ratios stay in enumeration order
    results.sort_by(|a, b| b.sharpe_ratio.cmp(&a.sharpe_ratio));

    info!(
        best = %best_result.parameters,
        sharpe = %best_result.sharpe_ratio.round_dp(3),
        total_return_pct = %best_result.total_return_pct.round_dp(2),
        evaluated = results.len(),
        "Optimization complete"
    );

    Ok(OptimizationResult {
        best_parameters: best_result.parameters,
        best_result,
        all_results: results,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `search` on the calling thread, turning a panic into [`EngineError::WorkerPanic`]
fn catch_search<F>(search: F) -> EngineResult<OptimizationResult>
where
    F: FnOnce() -> EngineResult<OptimizationResult>,
{
    panic::catch_unwind(AssertUnwindSafe(search)).unwrap_or_else(|payload| {
        Err(EngineError::WorkerPanic(panic_message(payload.as_ref())))
    })
}

/// Background entry point: runs the search and publishes the outcome on `progress`.
///
/// The tracker always leaves `Running`, even if a worker panics.
pub fn run_optimization(request: &OptimizeRequest, bars: &[PriceBar], progress: &OptimizeProgress) {
    info!(
        short_windows = ?request.short_windows,
        long_windows = ?request.long_windows,
        bars = bars.len(),
        "Starting parameter optimization"
    );

    let outcome = catch_search(|| optimize_with_progress(bars, request, Some(progress)));
    match &outcome {
        Err(EngineError::Cancelled) => warn!("Optimization cancelled"),
        Err(e) => warn!(error = %e, "Optimization failed"),
        Ok(_) => {}
    }
    progress.finish(&outcome);
}
