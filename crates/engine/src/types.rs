//! Types for the crossover backtesting engine

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A single daily bar (OHLCV)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Moving-average window pair. Only `short_window < long_window` is a valid strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyParameters {
    pub short_window: usize,
    pub long_window: usize,
}

impl StrategyParameters {
    pub fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short_window,
            long_window,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.short_window > 0 && self.short_window < self.long_window
    }
}

impl std::fmt::Display for StrategyParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.short_window, self.long_window)
    }
}

/// Configuration for a single backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub parameters: StrategyParameters,
    pub initial_capital: Decimal,
}

impl BacktestConfig {
    pub fn new(parameters: StrategyParameters) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            parameters: StrategyParameters::new(5, 20),
            initial_capital: DEFAULT_INITIAL_CAPITAL,
        }
    }
}

/// Starting cash when the caller does not supply one
pub const DEFAULT_INITIAL_CAPITAL: Decimal = dec!(100000);

/// Side of a trade. The simulator is long-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
}

/// A completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_date: NaiveDate,
    pub entry_price: Decimal,
    pub exit_date: NaiveDate,
    pub exit_price: Decimal,
    pub side: TradeSide,
    pub shares: Decimal,
    pub profit: Decimal,
    pub profit_pct: Decimal,
}

/// A point on the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    /// Close of the underlying on this bar
    pub benchmark_price: Decimal,
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub parameters: StrategyParameters,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_profit: Decimal,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: Decimal,
    pub profit_factor: Decimal,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub benchmark_return_pct: Decimal,
    pub outperformance_pct: Decimal,
}

/// Result of a grid search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_parameters: StrategyParameters,
    pub best_result: BacktestResult,
    /// Every evaluated pair, sorted by Sharpe ratio descending
    pub all_results: Vec<BacktestResult>,
}

impl OptimizationResult {
    /// The `n` highest-ranked results
    pub fn top(&self, n: usize) -> &[BacktestResult] {
        &self.all_results[..n.min(self.all_results.len())]
    }
}
