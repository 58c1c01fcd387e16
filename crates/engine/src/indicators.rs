//! Moving averages over closing prices
//!
//! Values are computed in `Decimal` so that crossover comparisons between a
//! short and a long average are exact. Indices without a full window are
//! `None` rather than a partial average.

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::types::PriceBar;

/// Closing prices of a bar series
pub fn closes(bars: &[PriceBar]) -> Vec<Decimal> {
    bars.iter().map(|b| b.close).collect()
}

/// Simple moving average with a rolling sum.
///
/// Output has the same length as `values`; index `i` holds the mean of
/// `values[i + 1 - window ..= i]` once `i + 1 >= window`, `None` before that.
/// A window sum that leaves the `Decimal` range fails with `InvalidSeries`.
pub fn simple_moving_average(
    values: &[Decimal],
    window: usize,
) -> EngineResult<Vec<Option<Decimal>>> {
    let mut out = Vec::with_capacity(values.len());
    if window == 0 {
        out.resize(values.len(), None);
        return Ok(out);
    }

    let divisor = Decimal::from(window);
    let mut sum = Decimal::ZERO;

    for (i, value) in values.iter().enumerate() {
        if i >= window {
            sum = sum
                .checked_sub(values[i - window])
                .ok_or_else(|| EngineError::overflow(i, "moving average window sum"))?;
        }
        sum = sum
            .checked_add(*value)
            .ok_or_else(|| EngineError::overflow(i, "moving average window sum"))?;

        if i + 1 >= window {
            out.push(Some(sum / divisor));
        } else {
            out.push(None);
        }
    }

    Ok(out)
}
