//! # Return/Risk Estimator
//!
//! $$
//! \hat\Sigma = \delta^\* F + (1-\delta^\*) S
//! $$
//!
//! Annualized expected returns and Ledoit-Wolf shrinkage covariance from
//! per-period return observations. The shrunk matrix stays positive
//! semi-definite when the sample covariance `S` is singular (fewer periods
//! than assets).

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::data::centered_observations;
use super::data::corr_from_cov;
use super::data::covariance_matrix;
use super::data::row_means;
use super::data::sample_covariance;
use super::data::symmetrize;
use super::error::PortfolioError;
use super::error::Result;
use super::types::AssetUniverse;

/// How per-period returns are turned into an annual expected return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnModel {
  /// `mean(r) * periods_per_year`.
  #[default]
  Arithmetic,
  /// `prod(1 + r)^(periods_per_year / T) - 1`.
  Compounded,
}

/// Structured matrix the sample covariance is shrunk towards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkageTarget {
  /// Sample variances with the average pairwise correlation off the diagonal.
  #[default]
  ConstantCorrelation,
  /// Average variance times the identity.
  ConstantVariance,
}

/// Estimator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
  /// Number of return periods per year (252 for daily data).
  pub periods_per_year: f64,
  pub return_model: ReturnModel,
  pub shrinkage_target: ShrinkageTarget,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      periods_per_year: 252.0,
      return_model: ReturnModel::Arithmetic,
      shrinkage_target: ShrinkageTarget::ConstantCorrelation,
    }
  }
}

/// Annualized estimates consumed by the solver and the evaluator.
#[derive(Clone, Debug)]
pub struct RiskEstimate {
  pub expected_returns: Array1<f64>,
  pub covariance: Array2<f64>,
  /// Shrinkage intensity `δ*` in `[0, 1]`.
  pub shrinkage: f64,
}

/// Converts raw returns into expected returns and a shrunk covariance matrix.
#[derive(Clone, Debug, Default)]
pub struct ReturnRiskEstimator {
  config: EstimatorConfig,
}

impl ReturnRiskEstimator {
  pub fn new(config: EstimatorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EstimatorConfig {
    &self.config
  }

  /// Estimate from an `assets × periods` matrix aligned with `universe`.
  pub fn estimate(
    &self,
    universe: &AssetUniverse,
    returns: ArrayView2<f64>,
  ) -> Result<RiskEstimate> {
    let ppy = self.config.periods_per_year;
    if !ppy.is_finite() || ppy <= 0.0 {
      return Err(PortfolioError::input_validation(format!(
        "periods_per_year must be positive, got {ppy}"
      )));
    }
    if returns.nrows() != universe.len() {
      return Err(PortfolioError::insufficient_data(
        "return series (one per asset)",
        universe.len(),
        returns.nrows(),
      ));
    }
    if returns.ncols() < 2 {
      return Err(PortfolioError::insufficient_data(
        "observations per asset",
        2,
        returns.ncols(),
      ));
    }

    let expected_returns = match self.config.return_model {
      ReturnModel::Arithmetic => row_means(returns) * ppy,
      ReturnModel::Compounded => compounded_returns(universe, returns, ppy)?,
    };

    let (shrunk, shrinkage) = match self.config.shrinkage_target {
      ShrinkageTarget::ConstantCorrelation => ledoit_wolf_constant_correlation(returns),
      ShrinkageTarget::ConstantVariance => ledoit_wolf_constant_variance(returns),
    };
    let mut covariance = shrunk * ppy;
    symmetrize(&mut covariance);

    debug!(
      assets = universe.len(),
      periods = returns.ncols(),
      shrinkage,
      target = ?self.config.shrinkage_target,
      "estimated expected returns and shrinkage covariance"
    );

    Ok(RiskEstimate {
      expected_returns,
      covariance,
      shrinkage,
    })
  }
}

fn compounded_returns(
  universe: &AssetUniverse,
  returns: ArrayView2<f64>,
  ppy: f64,
) -> Result<Array1<f64>> {
  let t = returns.ncols() as f64;
  let mut out = Array1::zeros(returns.nrows());

  for (i, row) in returns.axis_iter(Axis(0)).enumerate() {
    if let Some(r) = row.iter().find(|&&r| r <= -1.0) {
      return Err(PortfolioError::input_validation(format!(
        "compounded return undefined for '{}': period return {r} wipes out the position",
        universe.ids()[i]
      )));
    }
    let log_growth: f64 = row.iter().map(|r| r.ln_1p()).sum();
    out[i] = (log_growth * ppy / t).exp_m1();
  }

  Ok(out)
}

/// Ledoit & Wolf (2003) shrinkage towards the constant-correlation matrix.
///
/// Returns the per-period shrunk covariance and `δ*`.
pub fn ledoit_wolf_constant_correlation(returns: ArrayView2<f64>) -> (Array2<f64>, f64) {
  let n = returns.nrows();
  let t = returns.ncols();
  let tf = t as f64;

  let s = sample_covariance(returns);
  if n < 2 {
    return (s, 0.0);
  }

  let var = s.diag().to_owned();
  let sd = var.mapv(|v| v.max(0.0).sqrt());
  let corr = corr_from_cov(s.view());

  let mut r_sum = 0.0;
  for i in 0..n {
    for j in (i + 1)..n {
      r_sum += corr[[i, j]];
    }
  }
  let r_bar = 2.0 * r_sum / (n * (n - 1)) as f64;

  let target_corr = Array2::from_shape_fn((n, n), |(i, j)| if i == j { 1.0 } else { r_bar });
  let mut f = covariance_matrix(sd.view(), target_corr.view());
  for i in 0..n {
    f[[i, i]] = var[i];
  }

  let x = centered_observations(returns);
  let x2 = x.mapv(|v| v * v);
  let x3 = x.mapv(|v| v * v * v);
  let help = x.t().dot(&x) / tf;
  let fourth = x2.t().dot(&x2) / tf;
  let third_first = x3.t().dot(&x) / tf;

  // Asymptotic variances of the sample covariance entries.
  let pi_mat = Array2::from_shape_fn((n, n), |(i, j)| {
    fourth[[i, j]] - 2.0 * help[[i, j]] * s[[i, j]] + s[[i, j]] * s[[i, j]]
  });
  let pi_hat = pi_mat.sum();

  let mut rho_off = 0.0;
  for i in 0..n {
    if sd[i] <= 1e-15 {
      continue;
    }
    for j in 0..n {
      if i == j {
        continue;
      }
      let theta = third_first[[i, j]] - help[[i, i]] * s[[i, j]] - help[[i, j]] * var[i]
        + var[i] * s[[i, j]];
      rho_off += sd[j] / sd[i] * theta;
    }
  }
  let rho_hat = pi_mat.diag().sum() + r_bar * rho_off;

  let gamma_hat: f64 = (&s - &f).mapv(|v| v * v).sum();
  let delta = if gamma_hat > 1e-300 {
    ((pi_hat - rho_hat) / gamma_hat / tf).clamp(0.0, 1.0)
  } else {
    0.0
  };

  let mut shrunk = &f * delta + &s * (1.0 - delta);
  symmetrize(&mut shrunk);
  (shrunk, delta)
}

/// Ledoit & Wolf (2004) shrinkage towards a scaled identity, on the
/// maximum-likelihood (`1/T`) covariance.
///
/// Returns the per-period shrunk covariance and `δ*`.
pub fn ledoit_wolf_constant_variance(returns: ArrayView2<f64>) -> (Array2<f64>, f64) {
  let n = returns.nrows();
  let tf = returns.ncols() as f64;
  let nf = n as f64;

  let x = centered_observations(returns);
  let x2 = x.mapv(|v| v * v);
  let emp_cov = x.t().dot(&x) / tf;

  let trace_terms = x2.sum_axis(Axis(0)) / tf;
  let mu = trace_terms.sum() / nf;

  let beta_sum = x2.t().dot(&x2).sum();
  let delta_sum = x.t().dot(&x).mapv(|v| v * v).sum() / (tf * tf);

  let beta = (beta_sum / tf - delta_sum) / (nf * tf);
  let delta = (delta_sum - 2.0 * mu * trace_terms.sum() + nf * mu * mu) / nf;
  let beta = beta.min(delta);

  let shrinkage = if beta <= 0.0 || delta <= 0.0 {
    0.0
  } else {
    (beta / delta).clamp(0.0, 1.0)
  };

  let mut shrunk = emp_cov * (1.0 - shrinkage);
  for i in 0..n {
    shrunk[[i, i]] += shrinkage * mu;
  }
  symmetrize(&mut shrunk);
  (shrunk, shrinkage)
}
