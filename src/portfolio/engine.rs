//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* =
//!   \operatorname{Clean}\big(\operatorname{Optimize}(\hat\mu, \hat\Sigma_{LW}, r_f)\big)
//! $$
//!
//! High-level orchestration: validate, estimate, solve, clean, evaluate.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::cleaner::clean_weights;
use super::cleaner::CleanerConfig;
use super::error::PortfolioError;
use super::error::Result;
use super::estimator::EstimatorConfig;
use super::estimator::ReturnRiskEstimator;
use super::frontier::check_budget;
use super::frontier::EfficientFrontier;
use super::performance::evaluate;
use super::performance::VOLATILITY_FLOOR;
use super::request::OptimizeRequest;
use super::request::OptimizeResponse;
use super::solver::InteriorPointSolver;
use super::solver::SolverSettings;
use super::types::AssetUniverse;
use super::types::Objective;
use super::types::PortfolioResult;
use super::types::ReturnSeries;
use super::types::WeightBounds;

/// Risk-free rate applied when a caller does not supply one.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.05;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioEngineConfig {
  /// Expected-return and covariance estimation.
  pub estimator: EstimatorConfig,
  /// Per-asset weight limits; long-only `[0, 1]` by default.
  pub weight_bounds: WeightBounds,
  /// Return floor for [`Objective::MinVolatility`].
  pub min_return: Option<f64>,
  pub solver: SolverSettings,
  pub cleaner: CleanerConfig,
  /// Volatilities below this are rejected as degenerate.
  pub volatility_floor: f64,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      estimator: EstimatorConfig::default(),
      weight_bounds: WeightBounds::default(),
      min_return: None,
      solver: SolverSettings::default(),
      cleaner: CleanerConfig::default(),
      volatility_floor: VOLATILITY_FLOOR,
    }
  }
}

impl PortfolioEngineConfig {
  /// Check every setting for a universe of `n` assets and return the
  /// resolved `(lower, upper)` weight bounds.
  pub fn validate(&self, n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let ppy = self.estimator.periods_per_year;
    if !(ppy.is_finite() && ppy > 0.0) {
      return Err(PortfolioError::input_validation(format!(
        "periods_per_year must be positive, got {ppy}"
      )));
    }
    if let Some(target) = self.min_return {
      if !target.is_finite() {
        return Err(PortfolioError::input_validation(format!(
          "min_return must be finite, got {target}"
        )));
      }
    }
    if !(self.volatility_floor.is_finite() && self.volatility_floor >= 0.0) {
      return Err(PortfolioError::input_validation(format!(
        "volatility floor must be non-negative, got {}",
        self.volatility_floor
      )));
    }
    self.solver.validate()?;
    self.cleaner.validate()?;

    let (lower, upper) = self.weight_bounds.resolve(n)?;
    check_budget(&lower, &upper)?;
    Ok((lower, upper))
  }
}

/// Single entry point for mean-variance optimization.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Optimize an allocation across `assets` from their periodic `returns`.
  ///
  /// `returns[i]` is the series of `assets[i]`. `risk_free_rate` defaults to
  /// [`DEFAULT_RISK_FREE_RATE`].
  pub fn optimize<S: AsRef<str>>(
    &self,
    assets: &[S],
    returns: &[Vec<f64>],
    objective: Objective,
    risk_free_rate: Option<f64>,
  ) -> Result<PortfolioResult> {
    let rf = risk_free_rate.unwrap_or(DEFAULT_RISK_FREE_RATE);
    if !rf.is_finite() {
      return Err(PortfolioError::input_validation(
        "risk-free rate must be finite",
      ));
    }

    let universe = AssetUniverse::new(assets.iter().map(|s| s.as_ref().to_string()))?;
    let (lower, upper) = self.config.validate(universe.len())?;
    let series = ReturnSeries::new(&universe, returns)?;
    debug!(
      assets = universe.len(),
      periods = series.n_periods(),
      %objective,
      risk_free_rate = rf,
      "optimizing portfolio"
    );

    let estimate = ReturnRiskEstimator::new(self.config.estimator.clone())
      .estimate(&universe, series.view())?;
    if series.n_periods() < universe.len() {
      debug!(
        shrinkage = estimate.shrinkage,
        "fewer periods than assets; relying on shrinkage for a usable covariance"
      );
    }

    let frontier = EfficientFrontier::new(
      estimate.expected_returns.view(),
      estimate.covariance.view(),
      &self.config.weight_bounds,
      InteriorPointSolver::new(self.config.solver.clone()),
    )?;
    let min_return = match objective {
      Objective::MinVolatility => self.config.min_return,
      Objective::MaxSharpe => None,
    };
    let raw = frontier.optimize(objective, rf, min_return)?;

    let weights = clean_weights(&raw.weights, &lower, &upper, &self.config.cleaner)?;
    let performance = evaluate(
      weights.view(),
      estimate.expected_returns.view(),
      estimate.covariance.view(),
      rf,
      self.config.volatility_floor,
    )?;

    info!(
      %objective,
      iterations = raw.iterations,
      expected_return = performance.expected_return(),
      volatility = performance.volatility(),
      sharpe_ratio = performance.sharpe_ratio(),
      "portfolio optimized"
    );

    Ok(PortfolioResult {
      universe,
      weights,
      performance,
      shrinkage: estimate.shrinkage,
      iterations: raw.iterations,
    })
  }

  /// Serve one wire-level request.
  pub fn optimize_request(&self, request: &OptimizeRequest) -> Result<OptimizeResponse> {
    let objective: Objective = request.objective.parse()?;
    let result = self.optimize(
      &request.symbols,
      &request.returns,
      objective,
      Some(request.risk_free_rate),
    )?;
    Ok(OptimizeResponse::from(&result))
  }

  /// Serve independent requests in parallel, preserving input order.
  pub fn optimize_batch(&self, requests: &[OptimizeRequest]) -> Vec<Result<OptimizeResponse>> {
    requests
      .par_iter()
      .enumerate()
      .map(|(i, request)| {
        self.optimize_request(request).inspect_err(|e| {
          warn!(request = i, error = %e, "request failed");
        })
      })
      .collect()
  }
}

/// One-shot optimization with the default configuration.
pub fn optimize<S: AsRef<str>>(
  assets: &[S],
  returns: &[Vec<f64>],
  objective: Objective,
  risk_free_rate: Option<f64>,
) -> Result<PortfolioResult> {
  PortfolioEngine::default().optimize(assets, returns, objective, risk_free_rate)
}

impl From<&PortfolioResult> for OptimizeResponse {
  fn from(result: &PortfolioResult) -> Self {
    let weights: BTreeMap<String, f64> = result
      .allocation()
      .into_iter()
      .map(|(id, w)| (id.to_string(), w))
      .collect();
    Self {
      weights,
      expected_return: result.performance.expected_return(),
      volatility: result.performance.volatility(),
      sharpe_ratio: result.performance.sharpe_ratio(),
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use super::*;

  fn sample_returns() -> (Vec<&'static str>, Vec<Vec<f64>>) {
    (
      vec!["AAA", "BBB", "CCC"],
      vec![
        vec![0.010, -0.004, 0.007, 0.012, -0.002, 0.005, 0.009, -0.006],
        vec![0.004, 0.002, -0.001, 0.003, 0.001, 0.002, 0.000, 0.003],
        vec![-0.008, 0.015, 0.011, -0.012, 0.020, -0.005, 0.014, 0.006],
      ],
    )
  }

  #[test]
  #[traced_test]
  fn min_volatility_end_to_end() {
    let (assets, returns) = sample_returns();
    let result = PortfolioEngine::default()
      .optimize(&assets, &returns, Objective::MinVolatility, None)
      .unwrap();

    assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-6);
    assert!(result.weights.as_slice().iter().all(|&w| (0.0..=1.0).contains(&w)));
    assert!(result.performance.volatility() > 0.0);
    assert!(logs_contain("portfolio optimized"));
  }

  #[test]
  fn max_sharpe_request_round_trip() {
    let (assets, returns) = sample_returns();
    let request = OptimizeRequest {
      symbols: assets.iter().map(|s| s.to_string()).collect(),
      returns,
      objective: "max_sharpe".to_string(),
      risk_free_rate: 0.0,
    };
    let response = PortfolioEngine::default().optimize_request(&request).unwrap();

    assert_eq!(response.weights.len(), 3);
    assert_abs_diff_eq!(response.weights.values().sum::<f64>(), 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(
      response.sharpe_ratio,
      response.expected_return / response.volatility,
      epsilon = 1e-9
    );
  }

  #[test]
  fn unknown_objective_is_input_error() {
    let (assets, returns) = sample_returns();
    let request = OptimizeRequest {
      symbols: assets.iter().map(|s| s.to_string()).collect(),
      returns,
      objective: "efficient_return".to_string(),
      risk_free_rate: 0.05,
    };
    let err = PortfolioEngine::default().optimize_request(&request).unwrap_err();

    assert!(matches!(err, PortfolioError::InputValidation { .. }));
  }

  #[test]
  fn single_asset_gets_everything() {
    let result = optimize(
      &["ONLY"],
      &[vec![0.01, 0.02, -0.005, 0.015]],
      Objective::MinVolatility,
      Some(0.0),
    )
    .unwrap();

    assert_eq!(result.weights.as_slice(), &[1.0]);
    assert_eq!(result.allocation(), vec![("ONLY", 1.0)]);
  }

  #[test]
  fn risk_free_above_all_returns_is_infeasible() {
    let (assets, returns) = sample_returns();
    let err = optimize(&assets, &returns, Objective::MaxSharpe, Some(100.0)).unwrap_err();

    assert!(matches!(err, PortfolioError::Infeasible { .. }));
  }

  #[test]
  fn series_count_mismatch_is_input_error() {
    let (assets, returns) = sample_returns();
    let err = optimize(&assets, &returns[..2], Objective::MaxSharpe, None).unwrap_err();

    assert!(matches!(err, PortfolioError::InputValidation { .. }));
  }

  #[test]
  fn batch_preserves_order_and_isolates_failures() {
    let (assets, returns) = sample_returns();
    let good = OptimizeRequest {
      symbols: assets.iter().map(|s| s.to_string()).collect(),
      returns: returns.clone(),
      objective: "min_volatility".to_string(),
      risk_free_rate: 0.0,
    };
    let bad = OptimizeRequest {
      returns: vec![vec![0.01]; 3],
      ..good.clone()
    };

    let out = PortfolioEngine::default().optimize_batch(&[good.clone(), bad, good]);
    assert_eq!(out.len(), 3);
    assert!(out[0].is_ok());
    assert!(matches!(
      out[1],
      Err(PortfolioError::InsufficientData { .. })
    ));
    assert_eq!(out[0], out[2]);
  }

  #[test]
  fn min_return_floor_is_honored() {
    let (assets, returns) = sample_returns();
    let engine = PortfolioEngine::default();
    let free = engine
      .optimize(&assets, &returns, Objective::MinVolatility, Some(0.0))
      .unwrap();

    let target = free.performance.expected_return() + 0.05;
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      min_return: Some(target),
      ..Default::default()
    });
    let constrained = engine
      .optimize(&assets, &returns, Objective::MinVolatility, Some(0.0))
      .unwrap();

    // Rounding to four decimals can shave a hair off the target.
    assert!(constrained.performance.expected_return() >= target - 1e-3);
    assert!(constrained.performance.volatility() >= free.performance.volatility() - 1e-4);
  }

  #[test]
  fn capped_bounds_survive_cleaning() {
    let (mut assets, mut returns) = sample_returns();
    returns.push(vec![0.006, -0.001, 0.004, 0.008, 0.002, -0.003, 0.007, 0.001]);
    assets.push("DDD");

    for (lower, upper) in [(0.0, 0.3), (0.01, 0.35), (0.02, 0.4), (0.0, 0.5)] {
      let engine = PortfolioEngine::new(PortfolioEngineConfig {
        weight_bounds: WeightBounds::Uniform { lower, upper },
        ..Default::default()
      });
      for objective in [Objective::MinVolatility, Objective::MaxSharpe] {
        let result = engine
          .optimize(&assets, &returns, objective, Some(0.0))
          .unwrap();

        assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-9);
        for &w in result.weights.as_slice() {
          assert!(w >= lower - 1e-12 && w <= upper + 1e-12, "{w} outside [{lower}, {upper}]");
        }
      }
    }
  }

  #[test]
  fn bad_settings_fail_before_estimation() {
    // One period would be InsufficientData if estimation ran first.
    let assets = ["A", "B"];
    let returns = vec![vec![0.01], vec![0.02]];
    let configs = [
      PortfolioEngineConfig {
        min_return: Some(f64::NAN),
        ..Default::default()
      },
      PortfolioEngineConfig {
        solver: SolverSettings {
          tol_feas: 0.0,
          ..Default::default()
        },
        ..Default::default()
      },
      PortfolioEngineConfig {
        cleaner: CleanerConfig {
          tolerance: -1.0,
          ..Default::default()
        },
        ..Default::default()
      },
      PortfolioEngineConfig {
        weight_bounds: WeightBounds::Uniform {
          lower: 0.6,
          upper: 0.2,
        },
        ..Default::default()
      },
    ];

    for config in configs {
      let err = PortfolioEngine::new(config)
        .optimize(&assets, &returns, Objective::MinVolatility, None)
        .unwrap_err();
      assert!(matches!(err, PortfolioError::InputValidation { .. }), "{err:?}");
    }

    let capped = PortfolioEngine::new(PortfolioEngineConfig {
      weight_bounds: WeightBounds::Uniform {
        lower: 0.0,
        upper: 0.4,
      },
      ..Default::default()
    });
    let err = capped
      .optimize(&assets, &returns, Objective::MinVolatility, None)
      .unwrap_err();
    assert!(matches!(err, PortfolioError::Infeasible { .. }));
  }
}
