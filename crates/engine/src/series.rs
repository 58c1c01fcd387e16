//! Synthetic daily price series
//!
//! Produces business-day OHLCV bars from a random walk with a slight upward
//! bias. Randomness is always injected so a seeded source reproduces the
//! same series bar for bar. Any other `PriceBar` source (e.g. real index
//! data loaded from JSON) can be checked with [`validate_series`] and fed to
//! the backtester unchanged.

use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::PriceBar;

/// Parameters of the synthetic random walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub initial_price: Decimal,
    /// Uniform draws below this value produce a down day (0.48 = slight upward drift)
    pub downside_bias: f64,
    /// Scale of the daily return (0.04 = ±4% envelope)
    pub daily_volatility: f64,
    pub min_volume: u64,
    pub volume_span: u64,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            initial_price: dec!(10000),
            downside_bias: 0.48,
            daily_volatility: 0.04,
            min_volume: 500_000,
            volume_span: 1_000_000,
        }
    }
}

impl SeriesConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.start_date > self.end_date {
            return Err(EngineError::InvalidConfig(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.initial_price <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "initial price must be positive, got {}",
                self.initial_price
            )));
        }
        if !(0.0..=1.0).contains(&self.downside_bias) {
            return Err(EngineError::InvalidConfig(format!(
                "downside bias must be within [0, 1], got {}",
                self.downside_bias
            )));
        }
        if !(self.daily_volatility > 0.0 && self.daily_volatility < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "daily volatility must be within (0, 1), got {}",
                self.daily_volatility
            )));
        }
        if self.volume_span == 0 {
            return Err(EngineError::InvalidConfig(
                "volume span must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Smallest price the walk can reach, one cent
const MIN_PRICE: Decimal = dec!(0.01);

/// Round to cents, holding the walk at [`MIN_PRICE`] once it decays to zero
fn to_price(value: f64, index: usize) -> EngineResult<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2).max(MIN_PRICE))
        .ok_or_else(|| EngineError::InvalidSeries {
            index,
            reason: format!("generated price {} is not a finite number", value),
        })
}

/// Generate a series from `config`, drawing every random number from `rng`.
pub fn generate_series(config: &SeriesConfig, rng: &mut impl Rng) -> EngineResult<Vec<PriceBar>> {
    config.validate()?;

    let mut bars = Vec::new();
    let mut previous_close = config.initial_price.round_dp(2).max(MIN_PRICE);
    let mut date = config.start_date;

    while date <= config.end_date {
        if is_business_day(date) {
            let index = bars.len();
            let open = previous_close;
            let open_f = open.to_f64().unwrap_or_default();

            let daily_return = (rng.gen::<f64>() - config.downside_bias) * config.daily_volatility;
            let change = open_f * daily_return;
            let close = to_price(open_f + change, index)?;

            let range = change.abs() * 2.0;
            let close_f = close.to_f64().unwrap_or_default();
            let high_f = open_f.max(close_f) + range * rng.gen::<f64>();
            let low_f = open_f.min(close_f) - range * rng.gen::<f64>();

            let high = to_price(high_f, index)?.max(open).max(close);
            let low = if low_f > 0.0 {
                to_price(low_f, index)?.min(open).min(close)
            } else {
                open.min(close)
            };

            let volume = Decimal::from(config.min_volume + rng.gen_range(0..config.volume_span));

            bars.push(PriceBar {
                date,
                open,
                high,
                low,
                close,
                volume,
            });
            previous_close = close;
        }

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    debug!(
        bars = bars.len(),
        start = %config.start_date,
        end = %config.end_date,
        "Generated synthetic series"
    );

    Ok(bars)
}

/// Reproducible series: the same seed always yields the same bars.
pub fn generate_seeded_series(seed: u64) -> EngineResult<Vec<PriceBar>> {
    let mut rng = StdRng::seed_from_u64(seed);
    generate_series(&SeriesConfig::default(), &mut rng)
}

/// Series from an entropy-seeded source
pub fn generate_default_series() -> EngineResult<Vec<PriceBar>> {
    let mut rng = StdRng::from_entropy();
    generate_series(&SeriesConfig::default(), &mut rng)
}

/// Check the bar invariants: strictly increasing dates, positive prices,
/// and a high/low envelope containing open and close.
pub fn validate_series(bars: &[PriceBar]) -> EngineResult<()> {
    for (index, bar) in bars.iter().enumerate() {
        let invalid = |reason: String| EngineError::InvalidSeries { index, reason };

        if index > 0 && bar.date <= bars[index - 1].date {
            return Err(invalid(format!(
                "date {} does not follow {}",
                bar.date,
                bars[index - 1].date
            )));
        }
        if bar.open <= Decimal::ZERO
            || bar.high <= Decimal::ZERO
            || bar.low <= Decimal::ZERO
            || bar.close <= Decimal::ZERO
        {
            return Err(invalid("prices must be positive".to_string()));
        }
        if bar.high < bar.open.max(bar.close) {
            return Err(invalid(format!(
                "high {} below open/close",
                bar.high
            )));
        }
        if bar.low > bar.open.min(bar.close) {
            return Err(invalid(format!("low {} above open/close", bar.low)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_series_covers_business_days() {
        let bars = generate_seeded_series(7).unwrap();
        // 2020-01-01 .. 2024-01-01 inclusive has 1044 weekdays
        assert_eq!(bars.len(), 1044);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(bars[0].open, dec!(10000));
        assert!(bars.iter().all(|b| is_business_day(b.date)));
    }

    #[test]
    fn test_generated_series_satisfies_invariants() {
        for seed in [1u64, 42, 1234] {
            let bars = generate_seeded_series(seed).unwrap();
            validate_series(&bars).unwrap();
            for pair in bars.windows(2) {
                assert_eq!(pair[1].open, pair[0].close);
            }
            for bar in &bars {
                assert!(bar.volume >= dec!(500000) && bar.volume < dec!(1500000));
            }
        }
    }

    #[test]
    fn test_same_seed_same_series() {
        let a = generate_seeded_series(99).unwrap();
        let b = generate_seeded_series(99).unwrap();
        assert_eq!(a, b);

        let c = generate_seeded_series(100).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_custom_window() {
        let config = SeriesConfig {
            // Saturday through the following Friday
            start_date: NaiveDate::from_ymd_opt(2021, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 1, 8).unwrap(),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let bars = generate_series(&config, &mut rng).unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].date.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_collapsing_walk_stays_at_one_cent() {
        let config = SeriesConfig {
            initial_price: dec!(0.05),
            downside_bias: 1.0,
            daily_volatility: 0.9,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(8);
        let bars = generate_series(&config, &mut rng).unwrap();
        assert_eq!(bars.len(), 1044);
        validate_series(&bars).unwrap();
        assert!(bars.iter().all(|b| b.low >= dec!(0.01)));
        assert_eq!(bars.last().unwrap().close, dec!(0.01));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = SeriesConfig {
            daily_volatility: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            generate_series(&config, &mut rng),
            Err(EngineError::InvalidConfig(_))
        ));

        let config = SeriesConfig {
            start_date: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_dates() {
        let mut bars = generate_seeded_series(5).unwrap();
        bars.truncate(10);
        bars.swap(3, 4);
        let err = validate_series(&bars).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSeries { index: 4, .. }));
    }

    #[test]
    fn test_validate_rejects_broken_envelope() {
        let mut bars = generate_seeded_series(5).unwrap();
        bars.truncate(10);
        bars[2].high = bars[2].close - dec!(1);
        let err = validate_series(&bars).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSeries { index: 2, .. }));
    }
}
