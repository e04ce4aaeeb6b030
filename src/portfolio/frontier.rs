//! # Efficient Frontier
//!
//! $$
//! \min_{\mathbf{w}} \mathbf{w}^\top \Sigma \mathbf{w}
//! \quad\text{s.t.}\quad \mathbf{1}^\top\mathbf{w}=1,\ \ l\le \mathbf{w}\le u,
//! \ \ \mu^\top\mathbf{w}\ge r^\*
//! $$
//!
//! Long-only (or bounded long-short) allocation on the efficient frontier.
//! Maximum Sharpe is solved through the homogenized program
//! `min yᵗΣy` s.t. `(μ - r_f)ᵗy = e`, `1ᵗy = κ`, `lκ ≤ y ≤ uκ`, `κ ≥ 0`,
//! with `w = y / κ` and `e` the best achievable excess return, which keeps
//! `κ ≥ 1` however close `r_f` gets to that best return.

use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array1;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use tracing::debug;

use super::error::PortfolioError;
use super::error::Result;
use super::solver::InteriorPointSolver;
use super::solver::QpSolution;
use super::solver::QpSolver;
use super::solver::QuadraticProgram;
use super::solver::SolveStatus;
use super::types::Objective;
use super::types::WeightBounds;

/// Relative ridge on the weight block; selects the minimal-norm optimum when
/// the covariance is singular.
const TIE_BREAK_RIDGE: f64 = 1e-10;
const SUM_TOLERANCE: f64 = 1e-6;
const MIN_SCALE: f64 = 1e-12;

/// Weights straight out of the solver, before cleaning.
#[derive(Clone, Debug)]
pub struct RawWeights {
  pub weights: Array1<f64>,
  pub iterations: usize,
  /// Final QP objective value.
  pub objective: f64,
}

/// Frontier optimizer over fixed estimates and bounds.
#[derive(Clone, Debug)]
pub struct EfficientFrontier<'a, S: QpSolver = InteriorPointSolver> {
  mu: ArrayView1<'a, f64>,
  cov: ArrayView2<'a, f64>,
  lower: Vec<f64>,
  upper: Vec<f64>,
  solver: S,
}

/// Bounds must admit a fully invested portfolio.
pub(crate) fn check_budget(lower: &[f64], upper: &[f64]) -> Result<()> {
  let lo_sum: f64 = lower.iter().sum();
  let hi_sum: f64 = upper.iter().sum();
  if lo_sum > 1.0 + 1e-12 || hi_sum < 1.0 - 1e-12 {
    return Err(PortfolioError::infeasible(format!(
      "weight bounds admit totals in [{lo_sum}, {hi_sum}], which excludes 1"
    )));
  }
  Ok(())
}

fn dot(a: &[f64], b: ArrayView1<f64>) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl<'a, S: QpSolver> EfficientFrontier<'a, S> {
  pub fn new(
    mu: ArrayView1<'a, f64>,
    cov: ArrayView2<'a, f64>,
    bounds: &WeightBounds,
    solver: S,
  ) -> Result<Self> {
    let n = mu.len();
    if n == 0 {
      return Err(PortfolioError::input_validation("expected returns are empty"));
    }
    if cov.dim() != (n, n) {
      return Err(PortfolioError::input_validation(format!(
        "covariance is {:?} for {n} expected returns",
        cov.dim()
      )));
    }
    if mu.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::input_validation(
        "expected returns and covariance must be finite",
      ));
    }

    let (lower, upper) = bounds.resolve(n)?;
    check_budget(&lower, &upper)?;

    Ok(Self {
      mu,
      cov,
      lower,
      upper,
      solver,
    })
  }

  pub fn n_assets(&self) -> usize {
    self.mu.len()
  }

  /// Highest `w·μ` over the feasible region: fill the best assets first.
  pub fn max_achievable_return(&self) -> f64 {
    let n = self.n_assets();
    let mut w = self.lower.clone();
    let mut remaining = 1.0 - self.lower.iter().sum::<f64>();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| self.mu[j].total_cmp(&self.mu[i]));
    for i in order {
      if remaining <= 0.0 {
        break;
      }
      let add = remaining.min(self.upper[i] - self.lower[i]);
      w[i] += add;
      remaining -= add;
    }

    dot(&w, self.mu)
  }

  /// Dispatch on the objective. `min_return` only applies to
  /// [`Objective::MinVolatility`].
  pub fn optimize(
    &self,
    objective: Objective,
    risk_free_rate: f64,
    min_return: Option<f64>,
  ) -> Result<RawWeights> {
    match objective {
      Objective::MinVolatility => self.min_volatility(min_return),
      Objective::MaxSharpe => self.max_sharpe(risk_free_rate),
    }
  }

  /// Minimum-variance portfolio, optionally with `w·μ ≥ min_return`.
  pub fn min_volatility(&self, min_return: Option<f64>) -> Result<RawWeights> {
    let n = self.n_assets();

    if let Some(target) = min_return {
      if !target.is_finite() {
        return Err(PortfolioError::input_validation("min_return must be finite"));
      }
      let best = self.max_achievable_return();
      if target > best + 1e-12 {
        return Err(PortfolioError::infeasible(format!(
          "minimum return {target} exceeds the best achievable return {best}"
        )));
      }
    }

    if n == 1 {
      return Ok(self.single_asset());
    }

    let m = 1 + n + usize::from(min_return.is_some());
    let mut a = DMatrix::<f64>::zeros(m, n);
    let mut l = DVector::<f64>::zeros(m);
    let mut u = DVector::<f64>::zeros(m);

    for j in 0..n {
      a[(0, j)] = 1.0;
      a[(1 + j, j)] = 1.0;
      l[1 + j] = self.lower[j];
      u[1 + j] = self.upper[j];
    }
    l[0] = 1.0;
    u[0] = 1.0;
    if let Some(target) = min_return {
      for j in 0..n {
        a[(n + 1, j)] = self.mu[j];
      }
      l[n + 1] = target;
      u[n + 1] = f64::INFINITY;
    }

    let qp = QuadraticProgram::new(self.cost_matrix(n), DVector::zeros(n), a, l, u);
    let solution = self.solve(&qp, "min_volatility")?;
    let w = self.clip_to_bounds(solution.x.iter().copied(), &solution)?;

    debug!(
      iterations = solution.iterations,
      variance = solution.objective,
      "min_volatility solved"
    );

    Ok(RawWeights {
      weights: w,
      iterations: solution.iterations,
      objective: solution.objective,
    })
  }

  /// Tangency portfolio maximizing `(w·μ - r_f) / σ_p`.
  pub fn max_sharpe(&self, risk_free_rate: f64) -> Result<RawWeights> {
    if !risk_free_rate.is_finite() {
      return Err(PortfolioError::input_validation("risk-free rate must be finite"));
    }

    let n = self.n_assets();
    let best = self.max_achievable_return();
    if best <= risk_free_rate {
      return Err(PortfolioError::infeasible(format!(
        "no feasible portfolio returns more than the risk-free rate {risk_free_rate} (best {best})"
      )));
    }

    if n == 1 {
      return Ok(self.single_asset());
    }

    // Unit-norm excess row with the best excess as its target keeps y and
    // kappa of order one.
    let row_scale = self
      .mu
      .iter()
      .fold(0.0f64, |acc, &m| acc.max((m - risk_free_rate).abs()));
    let excess = (best - risk_free_rate) / row_scale;

    // Variables: y (n), kappa.
    let dim = n + 1;
    let k = n;
    let m = 2 + 2 * n + 1;
    let mut a = DMatrix::<f64>::zeros(m, dim);
    let mut l = DVector::<f64>::zeros(m);
    let mut u = DVector::<f64>::zeros(m);

    for j in 0..n {
      a[(0, j)] = (self.mu[j] - risk_free_rate) / row_scale;
      a[(1, j)] = 1.0;
      a[(2 + j, j)] = 1.0;
      a[(2 + j, k)] = -self.lower[j];
      a[(2 + n + j, j)] = 1.0;
      a[(2 + n + j, k)] = -self.upper[j];
    }
    a[(1, k)] = -1.0;
    a[(m - 1, k)] = 1.0;

    l[0] = excess;
    u[0] = excess;
    for j in 0..n {
      u[2 + j] = f64::INFINITY;
      l[2 + n + j] = f64::NEG_INFINITY;
    }
    u[m - 1] = f64::INFINITY;

    let mut p = DMatrix::<f64>::zeros(dim, dim);
    p.view_mut((0, 0), (n, n)).copy_from(&self.cost_matrix(n));

    let qp = QuadraticProgram::new(p, DVector::zeros(dim), a, l, u);
    let solution = self.solve(&qp, "max_sharpe")?;

    let kappa = solution.x[k];
    if !kappa.is_finite() || kappa <= MIN_SCALE {
      return Err(PortfolioError::solver(
        solution.iterations,
        solution.objective,
        format!("degenerate scale variable kappa = {kappa:e}"),
      ));
    }

    let w = self.clip_to_bounds(solution.x.iter().take(n).map(|y| y / kappa), &solution)?;

    debug!(
      iterations = solution.iterations,
      kappa,
      objective = solution.objective,
      "max_sharpe solved"
    );

    Ok(RawWeights {
      weights: w,
      iterations: solution.iterations,
      objective: solution.objective,
    })
  }

  /// `2(Σ + εI)` for the `½xᵗPx` form.
  fn cost_matrix(&self, n: usize) -> DMatrix<f64> {
    let mean_var = (0..n).map(|i| self.cov[[i, i]]).sum::<f64>() / n as f64;
    let ridge = TIE_BREAK_RIDGE * mean_var.max(0.0);
    DMatrix::from_fn(n, n, |i, j| {
      let sym = 0.5 * (self.cov[[i, j]] + self.cov[[j, i]]);
      2.0 * (sym + if i == j { ridge } else { 0.0 })
    })
  }

  fn solve(&self, qp: &QuadraticProgram, label: &str) -> Result<QpSolution> {
    let solution = self.solver.solve(qp)?;
    match solution.status {
      SolveStatus::Solved => Ok(solution),
      SolveStatus::PrimalInfeasible => Err(PortfolioError::infeasible(format!(
        "{label}: solver certified that no weight vector satisfies the constraints"
      ))),
      SolveStatus::MaxIterationsReached => Err(PortfolioError::solver(
        solution.iterations,
        solution.objective,
        format!(
          "{label}: no convergence (primal residual {:.3e}, dual residual {:.3e})",
          solution.primal_residual, solution.dual_residual
        ),
      )),
      SolveStatus::Failed => Err(PortfolioError::solver(
        solution.iterations,
        solution.objective,
        format!("{label}: solver stopped without a usable solution"),
      )),
    }
  }

  fn clip_to_bounds(
    &self,
    raw: impl Iterator<Item = f64>,
    solution: &QpSolution,
  ) -> Result<Array1<f64>> {
    let w: Array1<f64> = raw
      .enumerate()
      .map(|(i, v)| v.max(self.lower[i]).min(self.upper[i]))
      .collect();

    let total = w.sum();
    if !total.is_finite() || (total - 1.0).abs() > SUM_TOLERANCE {
      return Err(PortfolioError::solver(
        solution.iterations,
        solution.objective,
        format!("solution weights sum to {total}, expected 1"),
      ));
    }
    Ok(w)
  }

  fn single_asset(&self) -> RawWeights {
    RawWeights {
      weights: Array1::from_elem(1, 1.0),
      iterations: 0,
      objective: self.cov[[0, 0]],
    }
  }
}
