//! # Portfolio Performance
//!
//! $$
//! \mathbb E[R_p]=\mathbf w^\top\mu,\qquad
//! \sigma_p=\sqrt{\mathbf w^\top\Sigma\mathbf w},\qquad
//! S=\frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$

use ndarray::ArrayView1;
use ndarray::ArrayView2;

use super::error::PortfolioError;
use super::error::Result;
use super::types::PerformanceSummary;

/// Default floor below which a volatility is treated as zero.
pub const VOLATILITY_FLOOR: f64 = 1e-8;

/// Annualized expected return, volatility and Sharpe ratio of `weights`.
pub fn evaluate(
  weights: ArrayView1<f64>,
  expected_returns: ArrayView1<f64>,
  covariance: ArrayView2<f64>,
  risk_free_rate: f64,
  volatility_floor: f64,
) -> Result<PerformanceSummary> {
  let n = weights.len();
  if expected_returns.len() != n || covariance.dim() != (n, n) {
    return Err(PortfolioError::input_validation(format!(
      "weights ({n}), expected returns ({}) and covariance {:?} disagree",
      expected_returns.len(),
      covariance.dim()
    )));
  }

  let expected_return = weights.dot(&expected_returns);
  // Tiny negative variances come from rounding.
  let variance = weights.dot(&covariance.dot(&weights)).max(0.0);
  let volatility = variance.sqrt();

  if !volatility.is_finite() || volatility < volatility_floor {
    return Err(PortfolioError::degenerate(format!(
      "portfolio volatility {volatility:e} is below {volatility_floor:e}; Sharpe ratio undefined"
    )));
  }

  let sharpe_ratio = (expected_return - risk_free_rate) / volatility;
  Ok(PerformanceSummary::derived(
    expected_return,
    volatility,
    sharpe_ratio,
  ))
}
