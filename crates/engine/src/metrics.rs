//! Performance statistics over a simulated equity curve and trade log
//!
//! Percentages are scaled ×100. Quantities that need `powf`/`sqrt` are
//! computed in `f64` and converted back; a non-finite value becomes zero.
//! Helpers return `None` when a ratio does not fit in a `Decimal`.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::engine::SimulationOutput;
use crate::error::{EngineError, EngineResult};
use crate::types::*;

/// Assumed number of trading days in a year
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Profit factor reported when there are gains and no losses
const PROFIT_FACTOR_CAP: Decimal = dec!(999.99);

fn to_decimal(value: f64) -> Decimal {
    if value.is_finite() {
        Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}

/// `(to - from) / from × 100`
fn percent_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    to.checked_sub(from)?
        .checked_div(from)?
        .checked_mul(dec!(100))
}

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    /// Reduce a simulation into a [`BacktestResult`].
    ///
    /// The benchmark is buy-and-hold from the bar at `parameters.long_window`
    /// to the last bar.
    pub fn analyze(
        parameters: StrategyParameters,
        initial_capital: Decimal,
        bars: &[PriceBar],
        output: SimulationOutput,
    ) -> EngineResult<BacktestResult> {
        let SimulationOutput {
            trades,
            equity_curve,
            final_equity,
        } = output;
        let last_index = bars.len().saturating_sub(1);
        let overflow = |quantity: &str| EngineError::overflow(last_index, quantity);

        let total_trades = trades.len() as u32;
        let winning_trades = trades.iter().filter(|t| t.profit > Decimal::ZERO).count() as u32;
        let losing_trades = trades.iter().filter(|t| t.profit < Decimal::ZERO).count() as u32;
        let win_rate_pct = if total_trades > 0 {
            Decimal::from(winning_trades) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let total_profit = final_equity
            .checked_sub(initial_capital)
            .ok_or_else(|| overflow("total profit"))?;
        let total_return_pct = Self::total_return_pct(initial_capital, final_equity)
            .ok_or_else(|| overflow("total return"))?;
        let annualized_return_pct =
            Self::annualized_return_pct(initial_capital, final_equity, equity_curve.len())
                .ok_or_else(|| overflow("annualized return"))?;
        let max_drawdown_pct = Self::max_drawdown_pct(initial_capital, &equity_curve);
        let sharpe_ratio =
            Self::sharpe_ratio(&equity_curve).ok_or_else(|| overflow("per-bar return"))?;
        let profit_factor =
            Self::profit_factor(&trades).ok_or_else(|| overflow("profit factor"))?;

        let benchmark_return_pct = match (bars.get(parameters.long_window), bars.last()) {
            (Some(start), Some(end)) if start.close > Decimal::ZERO => {
                percent_change(start.close, end.close).ok_or_else(|| overflow("benchmark return"))?
            }
            _ => Decimal::ZERO,
        };
        let outperformance_pct = total_return_pct
            .checked_sub(benchmark_return_pct)
            .ok_or_else(|| overflow("outperformance"))?;

        Ok(BacktestResult {
            parameters,
            initial_capital,
            final_equity,
            total_profit,
            total_return_pct,
            annualized_return_pct,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate_pct,
            max_drawdown_pct,
            sharpe_ratio,
            profit_factor,
            trades,
            equity_curve,
            benchmark_return_pct,
            outperformance_pct,
        })
    }

    pub fn total_return_pct(initial_capital: Decimal, final_equity: Decimal) -> Option<Decimal> {
        if initial_capital <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        percent_change(initial_capital, final_equity)
    }

    /// Compound annual growth over `trading_days` evaluated bars
    pub fn annualized_return_pct(
        initial_capital: Decimal,
        final_equity: Decimal,
        trading_days: usize,
    ) -> Option<Decimal> {
        if trading_days == 0 || initial_capital <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        let growth = final_equity.checked_div(initial_capital)?.to_f64().unwrap_or(0.0);
        if growth <= 0.0 {
            return Some(dec!(-100));
        }
        let cagr = growth.powf(TRADING_DAYS_PER_YEAR / trading_days as f64) - 1.0;
        Some(to_decimal(cagr * 100.0))
    }

    /// Largest peak-to-trough decline, with the peak seeded at the starting capital
    pub fn max_drawdown_pct(initial_capital: Decimal, equity_curve: &[EquityPoint]) -> Decimal {
        let mut peak = initial_capital;
        let mut max_drawdown = Decimal::ZERO;

        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            }
            if peak > Decimal::ZERO {
                // 0 <= equity <= peak keeps the ratio within [0, 1]
                let drawdown = (peak - point.equity) / peak * dec!(100);
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }

        max_drawdown
    }

    /// Annualized Sharpe ratio of per-bar simple returns (population std dev, zero risk-free rate)
    pub fn sharpe_ratio(equity_curve: &[EquityPoint]) -> Option<Decimal> {
        let returns = equity_curve
            .windows(2)
            .filter(|w| w[0].equity > Decimal::ZERO)
            .map(|w| {
                let r = w[1].equity.checked_sub(w[0].equity)?.checked_div(w[0].equity)?;
                Some(r.to_f64().unwrap_or(0.0))
            })
            .collect::<Option<Vec<f64>>>()?;

        if returns.is_empty() {
            return Some(Decimal::ZERO);
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev < 1e-12 {
            return Some(Decimal::ZERO);
        }

        Some(to_decimal(mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()))
    }

    /// Gross profit over gross loss
    pub fn profit_factor(trades: &[Trade]) -> Option<Decimal> {
        let mut gross_profits = Decimal::ZERO;
        let mut gross_losses = Decimal::ZERO;
        for trade in trades {
            if trade.profit > Decimal::ZERO {
                gross_profits = gross_profits.checked_add(trade.profit)?;
            } else if trade.profit < Decimal::ZERO {
                gross_losses = gross_losses.checked_add(trade.profit.abs())?;
            }
        }

        if gross_losses > Decimal::ZERO {
            gross_profits.checked_div(gross_losses)
        } else if gross_profits > Decimal::ZERO {
            Some(PROFIT_FACTOR_CAP)
        } else {
            Some(Decimal::ZERO)
        }
    }
}
