//! Trend analysis over historical series
//!
//! Least-squares fit against the point index, volatility of the detrended
//! series, autocorrelation-based seasonality and a one-step forecast.

use filterkeep_core::{Error, Result};

use crate::types::{
    Prediction, SeasonalPeriod, Seasonality, TrendAnalysis, TrendDirection, TrendMetric,
};

/// Slopes with a smaller magnitude are reported as stable
pub const STABLE_SLOPE: f64 = 0.01;

/// Detrended coefficient of variation above which a series is volatile
pub const VOLATILITY_THRESHOLD: f64 = 0.3;

/// Mean window correlation above which seasonality is reported
pub const SEASONALITY_THRESHOLD: f64 = 0.7;

/// Minimum number of points before seasonality is considered
pub const SEASONALITY_MIN_POINTS: usize = 24;

/// Least-squares line `y = intercept + slope * x` with `x` the point index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fit a line through `values`; a single point yields a flat line
pub fn fit_line(values: &[f64]) -> LinearFit {
    let n = values.len() as f64;
    if values.len() < 2 {
        return LinearFit {
            slope: 0.0,
            intercept: values.first().copied().unwrap_or(0.0),
        };
    }

    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    let slope = if denominator == 0.0 {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denominator
    };
    let intercept = (sum_y - slope * sum_x) / n;

    LinearFit { slope, intercept }
}

/// Residuals of `values` after removing `fit`
pub fn detrend(values: &[f64], fit: &LinearFit) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, y)| y - fit.at(i as f64))
        .collect()
}

/// Standard deviation of the residuals divided by the series mean
///
/// Zero when the mean is zero.
pub fn volatility(values: &[f64], fit: &LinearFit) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let residuals = detrend(values, fit);
    let variance = residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64;
    variance.sqrt() / mean.abs()
}

/// Pearson correlation; zero when either side has no variance
fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }

    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Mean correlation between consecutive windows of `period` points
fn window_autocorrelation(residuals: &[f64], period: usize) -> Option<f64> {
    let windows: Vec<&[f64]> = residuals.chunks_exact(period).collect();
    if windows.len() < 2 {
        return None;
    }
    let total: f64 = windows.windows(2).map(|pair| correlation(pair[0], pair[1])).sum();
    Some(total / (windows.len() - 1) as f64)
}

/// Strongest daily or weekly pattern in the detrended series, if any
pub fn detect_seasonality(values: &[f64], fit: &LinearFit) -> Option<Seasonality> {
    if values.len() < SEASONALITY_MIN_POINTS {
        return None;
    }
    let residuals = detrend(values, fit);

    [SeasonalPeriod::Daily, SeasonalPeriod::Weekly]
        .into_iter()
        .filter_map(|period| {
            window_autocorrelation(&residuals, period.points())
                .map(|strength| Seasonality { period, strength })
        })
        .filter(|s| s.strength > SEASONALITY_THRESHOLD)
        .max_by(|a, b| a.strength.total_cmp(&b.strength))
}

/// Analyze a chronologically ordered series
pub fn analyze(metric: TrendMetric, period_hours: u32, values: &[f64]) -> Result<TrendAnalysis> {
    if values.len() < 2 {
        return Err(Error::InsufficientData {
            required: 2,
            actual: values.len(),
        });
    }

    let fit = fit_line(values);
    let volatility = volatility(values, &fit);

    let direction = if volatility > VOLATILITY_THRESHOLD {
        TrendDirection::Volatile
    } else if fit.slope.abs() < STABLE_SLOPE {
        TrendDirection::Stable
    } else if fit.slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    let prediction = Prediction {
        next_value: fit.at(values.len() as f64),
        confidence: (1.0 - volatility).clamp(0.0, 1.0),
    };

    Ok(TrendAnalysis {
        metric,
        period_hours,
        data_points: values.len(),
        direction,
        slope: fit.slope,
        intercept: fit.intercept,
        volatility,
        seasonality: detect_seasonality(values, &fit),
        prediction,
    })
}
