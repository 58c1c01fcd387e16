//! Bar-by-bar moving-average crossover simulation

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::indicators::{closes, simple_moving_average};
use crate::metrics::PerformanceAnalyzer;
use crate::types::*;

/// Position state during simulation
struct OpenPosition {
    entry_date: chrono::NaiveDate,
    entry_price: Decimal,
    shares: Decimal,
}

impl OpenPosition {
    fn close(
        self,
        index: usize,
        exit_date: chrono::NaiveDate,
        exit_price: Decimal,
    ) -> EngineResult<Trade> {
        let change = exit_price - self.entry_price;
        let profit = change
            .checked_mul(self.shares)
            .ok_or_else(|| EngineError::overflow(index, "trade profit"))?;
        let profit_pct = change
            .checked_div(self.entry_price)
            .and_then(|r| r.checked_mul(dec!(100)))
            .ok_or_else(|| EngineError::overflow(index, "trade return"))?;
        Ok(Trade {
            entry_date: self.entry_date,
            entry_price: self.entry_price,
            exit_date,
            exit_price,
            side: TradeSide::Long,
            shares: self.shares,
            profit,
            profit_pct,
        })
    }

    /// Market value of the position at `price`
    fn value(&self, index: usize, price: Decimal) -> EngineResult<Decimal> {
        self.shares
            .checked_mul(price)
            .ok_or_else(|| EngineError::overflow(index, "position value"))
    }
}

/// Raw simulator output, before any statistics are derived
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Cash after the final (possibly forced) exit
    pub final_equity: Decimal,
}

/// Long-only, single-position crossover backtester
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run a full backtest: validate inputs, build both averages, simulate and analyze.
    pub fn run(bars: &[PriceBar], config: &BacktestConfig) -> EngineResult<BacktestResult> {
        let params = config.parameters;

        if !params.is_valid() {
            return Err(EngineError::InvalidParameter {
                short_window: params.short_window,
                long_window: params.long_window,
                reason: "short window must be positive and smaller than long window".to_string(),
            });
        }
        if config.initial_capital <= Decimal::ZERO {
            return Err(EngineError::InvalidParameter {
                short_window: params.short_window,
                long_window: params.long_window,
                reason: format!(
                    "initial capital must be positive, got {}",
                    config.initial_capital
                ),
            });
        }
        // The first evaluated bar is index `long_window`
        if bars.len() <= params.long_window {
            return Err(EngineError::InsufficientData {
                series_len: bars.len(),
                required: params.long_window + 1,
            });
        }

        let prices = closes(bars);
        let short_ma = simple_moving_average(&prices, params.short_window)?;
        let long_ma = simple_moving_average(&prices, params.long_window)?;

        let output = Self::simulate(
            bars,
            &short_ma,
            &long_ma,
            params.long_window,
            config.initial_capital,
        )?;

        let result = PerformanceAnalyzer::analyze(params, config.initial_capital, bars, output)?;

        info!(
            params = %params,
            bars = bars.len(),
            total_trades = result.total_trades,
            total_return_pct = %result.total_return_pct.round_dp(2),
            sharpe = %result.sharpe_ratio.round_dp(3),
            "Backtest complete"
        );

        Ok(result)
    }

    /// Walk bars `start..` with precomputed averages and trade every crossover.
    ///
    /// Bars where either average (current or previous) is undefined produce no
    /// signal but keep the position and still mark equity. An open position is
    /// closed at the last bar's close before returning. Share counts or cash
    /// balances outside the `Decimal` range fail with `InvalidSeries`.
    pub fn simulate(
        bars: &[PriceBar],
        short_ma: &[Option<Decimal>],
        long_ma: &[Option<Decimal>],
        start: usize,
        initial_capital: Decimal,
    ) -> EngineResult<SimulationOutput> {
        if short_ma.len() != bars.len() || long_ma.len() != bars.len() {
            return Err(EngineError::InvalidSeries {
                index: short_ma.len().min(long_ma.len()),
                reason: format!(
                    "moving averages ({} / {}) do not match series length {}",
                    short_ma.len(),
                    long_ma.len(),
                    bars.len()
                ),
            });
        }

        let mut cash = initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());

        // Index 0 has no previous bar to compare against
        for i in start.max(1)..bars.len() {
            let bar = &bars[i];

            if let (Some(short), Some(long), Some(prev_short), Some(prev_long)) =
                (short_ma[i], long_ma[i], short_ma[i - 1], long_ma[i - 1])
            {
                let bullish = prev_short <= prev_long && short > long;
                let bearish = prev_short >= prev_long && short < long;

                if bullish && position.is_none() {
                    let shares = cash
                        .checked_div(bar.close)
                        .ok_or_else(|| EngineError::overflow(i, "share count"))?
                        .floor();
                    if shares > Decimal::ZERO {
                        let pos = OpenPosition {
                            entry_date: bar.date,
                            entry_price: bar.close,
                            shares,
                        };
                        // Cost never exceeds cash
                        cash -= pos.value(i, bar.close)?;
                        position = Some(pos);
                        debug!(
                            date = %bar.date,
                            price = %bar.close,
                            shares = %shares,
                            "Opened LONG position"
                        );
                    }
                } else if bearish {
                    if let Some(pos) = position.take() {
                        cash = cash
                            .checked_add(pos.value(i, bar.close)?)
                            .ok_or_else(|| EngineError::overflow(i, "cash balance"))?;
                        let trade = pos.close(i, bar.date, bar.close)?;
                        debug!(
                            entry = %trade.entry_price,
                            exit = %trade.exit_price,
                            profit = %trade.profit,
                            "Closed position"
                        );
                        trades.push(trade);
                    }
                }
            }

            let held = match &position {
                Some(p) => p.value(i, bar.close)?,
                None => Decimal::ZERO,
            };
            let equity = cash
                .checked_add(held)
                .ok_or_else(|| EngineError::overflow(i, "equity"))?;

            equity_curve.push(EquityPoint {
                date: bar.date,
                equity,
                benchmark_price: bar.close,
            });
        }

        // Force-close at the final bar
        if let Some(pos) = position.take() {
            if let Some(last) = bars.last() {
                let index = bars.len() - 1;
                cash = cash
                    .checked_add(pos.value(index, last.close)?)
                    .ok_or_else(|| EngineError::overflow(index, "cash balance"))?;
                let trade = pos.close(index, last.date, last.close)?;
                debug!(
                    entry = %trade.entry_price,
                    exit = %trade.exit_price,
                    profit = %trade.profit,
                    "Closed position at end of series"
                );
                trades.push(trade);
            }
        }

        Ok(SimulationOutput {
            trades,
            equity_curve,
            final_equity: cash,
        })
    }
}

/// Single-parameter backtest with an explicit starting capital
pub fn run_backtest(
    bars: &[PriceBar],
    parameters: StrategyParameters,
    initial_capital: Decimal,
) -> EngineResult<BacktestResult> {
    BacktestEngine::run(
        bars,
        &BacktestConfig {
            parameters,
            initial_capital,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, NaiveDate, Weekday};
    use rust_decimal_macros::dec;

    fn business_days(count: usize) -> Vec<NaiveDate> {
        let mut date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                out.push(date);
            }
            date += Duration::days(1);
        }
        out
    }

    fn make_bars(closes: &[Decimal]) -> Vec<PriceBar> {
        business_days(closes.len())
            .into_iter()
            .zip(closes)
            .map(|(date, &close)| PriceBar {
                date,
                open: close,
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(1000000),
            })
            .collect()
    }

    fn linear(from: Decimal, step: Decimal, count: usize) -> Vec<Decimal> {
        (0..count).map(|i| from + step * Decimal::from(i)).collect()
    }

    fn config(short: usize, long: usize) -> BacktestConfig {
        BacktestConfig::new(StrategyParameters::new(short, long))
    }

    #[test]
    fn test_invalid_parameters() {
        let bars = make_bars(&linear(dec!(100), dec!(1), 50));
        for (short, long) in [(20, 20), (30, 20), (0, 10)] {
            let err = BacktestEngine::run(&bars, &config(short, long)).unwrap_err();
            assert!(matches!(err, EngineError::InvalidParameter { .. }));
        }
    }

    #[test]
    fn test_run_backtest_defaults_match_config() {
        let bars = make_bars(&linear(dec!(100), dec!(1), 40));
        let a = run_backtest(&bars, StrategyParameters::new(3, 10), DEFAULT_INITIAL_CAPITAL).unwrap();
        let b = BacktestEngine::run(&bars, &config(3, 10)).unwrap();
        assert_eq!(a.initial_capital, dec!(100000));
        assert_eq!(a.equity_curve, b.equity_curve);
    }

    #[test]
    fn test_invalid_capital() {
        let bars = make_bars(&linear(dec!(100), dec!(1), 50));
        let cfg = BacktestConfig {
            initial_capital: Decimal::ZERO,
            ..config(5, 20)
        };
        assert!(matches!(
            BacktestEngine::run(&bars, &cfg),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_insufficient_data() {
        let bars = make_bars(&linear(dec!(100), dec!(1), 15));
        let err = BacktestEngine::run(&bars, &config(5, 20)).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientData {
                series_len: 15,
                required: 21
            }
        );
    }

    #[test]
    fn test_rising_series_without_crossover_has_no_trades() {
        // Short average sits above the long one from the first evaluated bar
        let bars = make_bars(&linear(dec!(100), dec!(1), 120));
        let result = BacktestEngine::run(&bars, &config(5, 20)).unwrap();
        assert_eq!(result.total_trades, 0);
        assert!(result.trades.is_empty());
        assert_eq!(result.equity_curve.len(), 100);
        assert!(result
            .equity_curve
            .iter()
            .all(|p| p.equity == dec!(100000)));
        assert_eq!(result.sharpe_ratio, Decimal::ZERO);
        assert_eq!(result.total_return_pct, Decimal::ZERO);
    }

    #[test]
    fn test_single_crossover_trade_round_trip() {
        // Fall for 50 bars, then rise linearly to 13000 over the remaining 250
        let mut prices = linear(dec!(10000), dec!(-10), 50);
        prices.extend((1..=250).map(|i| dec!(9510) + dec!(13.96) * Decimal::from(i)));
        assert_eq!(prices.len(), 300);
        assert_eq!(prices[299], dec!(13000));

        let bars = make_bars(&prices);
        let result = BacktestEngine::run(&bars, &config(5, 20)).unwrap();

        assert_eq!(result.total_trades, 1);
        assert_eq!(result.winning_trades, 1);
        assert_eq!(result.losing_trades, 0);
        assert_eq!(result.win_rate_pct, dec!(100));

        let trade = &result.trades[0];
        // Entry shortly after the trough, exit forced at the last bar
        assert!(trade.entry_date > bars[49].date);
        assert!(trade.entry_date < bars[70].date);
        assert_eq!(trade.exit_date, bars[299].date);
        assert_eq!(trade.exit_price, bars[299].close);
        assert!(trade.profit > Decimal::ZERO);
        assert_eq!(trade.side, TradeSide::Long);
        assert!(result.total_return_pct > Decimal::ZERO);
    }

    #[test]
    fn test_whole_shares_and_leftover_cash() {
        // Dip then recover so one bullish crossover happens
        let mut prices = linear(dec!(300), dec!(-2), 10);
        prices.extend(linear(dec!(283), dec!(3), 10));
        let bars = make_bars(&prices);

        let short_ma = simple_moving_average(&closes(&bars), 2).unwrap();
        let long_ma = simple_moving_average(&closes(&bars), 4).unwrap();
        let out = BacktestEngine::simulate(&bars, &short_ma, &long_ma, 4, dec!(1000)).unwrap();

        assert_eq!(out.trades.len(), 1);
        let trade = &out.trades[0];
        assert_eq!(trade.shares, (dec!(1000) / trade.entry_price).floor());
        let leftover = dec!(1000) - trade.shares * trade.entry_price;
        assert!(leftover >= Decimal::ZERO && leftover < trade.entry_price);
        assert_eq!(out.final_equity, leftover + trade.shares * trade.exit_price);
        assert_eq!(
            out.equity_curve.last().unwrap().equity,
            out.final_equity
        );
    }

    #[test]
    fn test_bearish_crossover_closes_position() {
        // up, down, up: entry on the first upturn, exit on the downturn
        let mut prices = linear(dec!(100), dec!(-1), 8);
        prices.extend(linear(dec!(94), dec!(2), 8));
        prices.extend(linear(dec!(106), dec!(-3), 8));
        let bars = make_bars(&prices);

        let short_ma = simple_moving_average(&closes(&bars), 2).unwrap();
        let long_ma = simple_moving_average(&closes(&bars), 5).unwrap();
        let out = BacktestEngine::simulate(&bars, &short_ma, &long_ma, 5, dec!(10000)).unwrap();

        assert_eq!(out.trades.len(), 1);
        let trade = &out.trades[0];
        assert!(trade.exit_date < bars[23].date);
        assert_eq!(
            trade.profit,
            (trade.exit_price - trade.entry_price) * trade.shares
        );
        assert_eq!(
            trade.profit_pct,
            (trade.exit_price - trade.entry_price) / trade.entry_price * dec!(100)
        );
        // Flat after the exit: equity equals cash
        let after_exit: Vec<_> = out
            .equity_curve
            .iter()
            .filter(|p| p.date > trade.exit_date)
            .collect();
        assert!(!after_exit.is_empty());
        assert!(after_exit.iter().all(|p| p.equity == out.final_equity));
    }

    #[test]
    fn test_undefined_averages_skip_signals_but_mark_equity() {
        let bars = make_bars(&linear(dec!(50), dec!(1), 10));
        let short_ma = vec![None; 10];
        let long_ma = vec![None; 10];
        let out = BacktestEngine::simulate(&bars, &short_ma, &long_ma, 3, dec!(500)).unwrap();
        assert!(out.trades.is_empty());
        assert_eq!(out.equity_curve.len(), 7);
        assert!(out.equity_curve.iter().all(|p| p.equity == dec!(500)));
    }

    #[test]
    fn test_price_above_cash_stays_flat() {
        let mut prices = linear(dec!(5000), dec!(-10), 10);
        prices.extend(linear(dec!(4920), dec!(30), 10));
        let bars = make_bars(&prices);
        let short_ma = simple_moving_average(&closes(&bars), 2).unwrap();
        let long_ma = simple_moving_average(&closes(&bars), 4).unwrap();
        let out = BacktestEngine::simulate(&bars, &short_ma, &long_ma, 4, dec!(100)).unwrap();
        assert!(out.trades.is_empty());
        assert_eq!(out.final_equity, dec!(100));
    }

    #[test]
    fn test_mismatched_average_lengths() {
        let bars = make_bars(&linear(dec!(50), dec!(1), 10));
        let short_ma = vec![None; 9];
        let long_ma = vec![None; 10];
        assert!(matches!(
            BacktestEngine::simulate(&bars, &short_ma, &long_ma, 3, dec!(500)),
            Err(EngineError::InvalidSeries { .. })
        ));
    }

    fn flat_envelope_bars(closes: &[Decimal]) -> Vec<PriceBar> {
        business_days(closes.len())
            .into_iter()
            .zip(closes)
            .map(|(date, &close)| PriceBar {
                date,
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(1),
            })
            .collect()
    }

    #[test]
    fn test_extreme_prices_fail_without_panicking() {
        let tiny = dec!(0.0000000000000000000000000001);
        let mut prices = vec![tiny * dec!(5); 10];
        prices.extend(vec![tiny; 5]);
        prices.extend(vec![tiny * dec!(9); 10]);
        let bars = flat_envelope_bars(&prices);
        assert!(crate::series::validate_series(&bars).is_ok());

        // Buying at 9e-28 with 100000 cash needs more shares than a Decimal holds
        let err = run_backtest(&bars, StrategyParameters::new(2, 4), DEFAULT_INITIAL_CAPITAL)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSeries { index: 15, .. }));

        let huge = dec!(30000000000000000000000000000);
        let bars = flat_envelope_bars(&[huge; 10]);
        assert!(crate::series::validate_series(&bars).is_ok());
        let err = run_backtest(&bars, StrategyParameters::new(2, 4), DEFAULT_INITIAL_CAPITAL)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSeries { .. }));
    }

    #[test]
    fn test_benchmark_prices_follow_closes() {
        let bars = make_bars(&linear(dec!(100), dec!(1), 40));
        let result = BacktestEngine::run(&bars, &config(3, 10)).unwrap();
        for (point, bar) in result.equity_curve.iter().zip(&bars[10..]) {
            assert_eq!(point.date, bar.date);
            assert_eq!(point.benchmark_price, bar.close);
        }
    }
}
