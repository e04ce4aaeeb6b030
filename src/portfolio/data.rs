//! # Portfolio Data Utilities
//!
//! $$
//! \Sigma_{ij} = \sigma_i \sigma_j \rho_{ij}
//! $$
//!
//! Helpers for return preprocessing and correlation/covariance construction.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

/// Convert close prices to simple-return series.
///
/// Periods with a non-positive previous price are skipped.
pub fn returns_from_prices(closes: &[f64]) -> Vec<f64> {
  closes
    .windows(2)
    .filter(|w| w[0] > 0.0)
    .map(|w| w[1] / w[0] - 1.0)
    .collect()
}

/// Convert close prices to log-return series.
pub fn log_returns_series(closes: &[f64]) -> Vec<f64> {
  closes
    .windows(2)
    .filter(|w| w[0] > 0.0 && w[1] > 0.0)
    .map(|w| (w[1] / w[0]).ln())
    .collect()
}

/// Align multiple return series to common tail length.
pub fn align_return_series(all_returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
  let min_len = all_returns.iter().map(|r| r.len()).min().unwrap_or(0);
  all_returns
    .iter()
    .map(|r| r[r.len().saturating_sub(min_len)..].to_vec())
    .collect()
}

/// Per-asset sample means of an `assets × periods` matrix.
pub(crate) fn row_means(returns: ArrayView2<f64>) -> Array1<f64> {
  returns
    .mean_axis(Axis(1))
    .unwrap_or_else(|| Array1::zeros(returns.nrows()))
}

/// Demeaned observations laid out `periods × assets`.
pub(crate) fn centered_observations(returns: ArrayView2<f64>) -> Array2<f64> {
  let means = row_means(returns);
  let mut x = returns.t().to_owned();
  for mut row in x.rows_mut() {
    row -= &means;
  }
  x
}

/// Unbiased sample covariance (`ddof = 1`) of an `assets × periods` matrix.
pub fn sample_covariance(returns: ArrayView2<f64>) -> Array2<f64> {
  let n = returns.nrows();
  let t = returns.ncols();
  if t < 2 {
    return Array2::zeros((n, n));
  }

  let x = centered_observations(returns);
  let mut cov = x.t().dot(&x) / (t - 1) as f64;
  symmetrize(&mut cov);
  cov
}

/// Pearson correlation matrix from an `assets × periods` matrix.
pub fn correlation_matrix(returns: ArrayView2<f64>) -> Array2<f64> {
  corr_from_cov(sample_covariance(returns).view())
}

/// Build covariance matrix from per-asset volatilities and a correlation matrix.
pub fn covariance_matrix(sigmas: ArrayView1<f64>, corr: ArrayView2<f64>) -> Array2<f64> {
  let n = sigmas.len();
  Array2::from_shape_fn((n, n), |(i, j)| {
    let c_ij = corr
      .get((i, j))
      .copied()
      .unwrap_or(if i == j { 1.0 } else { 0.0 });
    sigmas[i] * sigmas[j] * c_ij
  })
}

/// Correlations implied by a covariance matrix. Zero-variance assets get zero
/// correlation with everything else.
pub fn corr_from_cov(cov: ArrayView2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd: Array1<f64> = cov.diag().mapv(|v| v.max(0.0).sqrt());

  Array2::from_shape_fn((n, n), |(i, j)| {
    let denom = sd[i] * sd[j];
    if i == j {
      1.0
    } else if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

pub(crate) fn symmetrize(m: &mut Array2<f64>) {
  let n = m.nrows();
  for i in 0..n {
    for j in (i + 1)..n {
      let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
      m[[i, j]] = avg;
      m[[j, i]] = avg;
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn covariance_matrix_handles_missing_corr_entries() {
    let sigmas = array![0.2, 0.3];
    let corr = array![[1.0]];
    let cov = covariance_matrix(sigmas.view(), corr.view());

    assert_eq!(cov.dim(), (2, 2));
    assert_abs_diff_eq!(cov[[0, 0]], 0.04, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[1, 1]], 0.09, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[0, 1]], 0.0, epsilon = 1e-12);
  }

  #[test]
  fn sample_covariance_matches_hand_computation() {
    let returns = array![[0.01, 0.02, -0.01], [0.00, 0.01, 0.02]];
    let cov = sample_covariance(returns.view());

    // means: 0.00667, 0.01
    assert_abs_diff_eq!(cov[[0, 0]], 2.333_333_333e-4, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[1, 1]], 1.0e-4, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[0, 1]], -1.0e-4, epsilon = 1e-12);
    assert_eq!(cov[[0, 1]], cov[[1, 0]]);
  }

  #[test]
  fn correlation_of_constant_series_is_zero() {
    let returns = array![[0.01, 0.01, 0.01], [0.0, 0.02, 0.01]];
    let corr = correlation_matrix(returns.view());

    assert_eq!(corr[[0, 0]], 1.0);
    assert_eq!(corr[[0, 1]], 0.0);
  }

  #[test]
  fn price_conversions() {
    let closes = [100.0, 110.0, 99.0];
    let simple = returns_from_prices(&closes);
    assert_abs_diff_eq!(simple[0], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(simple[1], -0.1, epsilon = 1e-12);

    let logs = log_returns_series(&closes);
    assert_abs_diff_eq!(logs[0], 1.1f64.ln(), epsilon = 1e-12);
  }

  #[test]
  fn align_keeps_common_tail() {
    let aligned = align_return_series(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0]]);
    assert_eq!(aligned, vec![vec![2.0, 3.0], vec![4.0, 5.0]]);
  }
}
