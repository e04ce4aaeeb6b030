//! # Convex QP Solver
//!
//! $$
//! \min_x \tfrac12 x^\top P x + q^\top x \quad \text{s.t.}\quad l \le Ax \le u
//! $$
//!
//! Interval-form QPs solved with the Clarabel interior-point method. Each row
//! of `l ≤ Ax ≤ u` becomes a zero-cone row when `l == u`, otherwise one
//! non-negative-cone row per finite side.

use clarabel::algebra::CscMatrix;
use clarabel::solver::DefaultSettingsBuilder;
use clarabel::solver::DefaultSolver;
use clarabel::solver::IPSolver;
use clarabel::solver::SolverStatus;
use clarabel::solver::SupportedConeT;
use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::error::PortfolioError;
use super::error::Result;

/// Dense convex QP `min ½xᵗPx + qᵗx` subject to `l ≤ Ax ≤ u`.
///
/// Equality rows have `l == u`; one-sided rows use an infinite bound.
#[derive(ImplNew, Clone, Debug)]
pub struct QuadraticProgram {
  /// Symmetric positive semi-definite cost matrix.
  pub p: DMatrix<f64>,
  pub q: DVector<f64>,
  pub a: DMatrix<f64>,
  pub l: DVector<f64>,
  pub u: DVector<f64>,
}

impl QuadraticProgram {
  pub fn n_vars(&self) -> usize {
    self.q.len()
  }

  pub fn n_constraints(&self) -> usize {
    self.l.len()
  }

  pub fn objective(&self, x: &DVector<f64>) -> f64 {
    0.5 * x.dot(&(&self.p * x)) + self.q.dot(x)
  }

  fn validate(&self) -> Result<()> {
    let n = self.n_vars();
    let m = self.n_constraints();
    if self.p.shape() != (n, n) {
      return Err(PortfolioError::input_validation(format!(
        "QP cost matrix is {:?}, expected ({n}, {n})",
        self.p.shape()
      )));
    }
    if self.a.shape() != (m, n) || self.u.len() != m {
      return Err(PortfolioError::input_validation(format!(
        "QP constraint matrix is {:?} with {} lower and {} upper bounds for {n} variables",
        self.a.shape(),
        m,
        self.u.len()
      )));
    }
    if (0..m).any(|i| self.l[i] > self.u[i] || self.l[i].is_nan() || self.u[i].is_nan()) {
      return Err(PortfolioError::input_validation(
        "QP constraint has lower bound above upper bound",
      ));
    }
    Ok(())
  }
}

/// Tolerances and iteration budget of the interior-point method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
  pub max_iter: u32,
  /// Absolute duality-gap tolerance.
  pub tol_gap_abs: f64,
  /// Relative duality-gap tolerance.
  pub tol_gap_rel: f64,
  /// Primal and dual feasibility tolerance.
  pub tol_feas: f64,
}

impl Default for SolverSettings {
  fn default() -> Self {
    Self {
      max_iter: 200,
      tol_gap_abs: 1e-9,
      tol_gap_rel: 1e-9,
      tol_feas: 1e-9,
    }
  }
}

impl SolverSettings {
  pub fn validate(&self) -> Result<()> {
    if self.max_iter == 0 {
      return Err(PortfolioError::input_validation("solver max_iter must be > 0"));
    }
    let tolerances = [self.tol_gap_abs, self.tol_gap_rel, self.tol_feas];
    if tolerances.iter().any(|t| !t.is_finite() || *t <= 0.0) {
      return Err(PortfolioError::input_validation(
        "solver tolerances must be positive and finite",
      ));
    }
    Ok(())
  }
}

/// Termination state of a QP solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
  Solved,
  PrimalInfeasible,
  MaxIterationsReached,
  /// Stalled, numerically broken or unbounded.
  Failed,
}

/// Final iterate of a QP solve with its diagnostics.
#[derive(Clone, Debug)]
pub struct QpSolution {
  pub x: DVector<f64>,
  /// Row multipliers with `Px + q + Aᵗy = 0` at optimality.
  pub y: DVector<f64>,
  pub status: SolveStatus,
  pub iterations: usize,
  pub objective: f64,
  pub primal_residual: f64,
  pub dual_residual: f64,
}

impl QpSolution {
  pub fn converged(&self) -> bool {
    self.status == SolveStatus::Solved
  }
}

/// A convex QP backend.
pub trait QpSolver {
  fn solve(&self, problem: &QuadraticProgram) -> Result<QpSolution>;
}

/// Clarabel-backed solver.
#[derive(Clone, Debug, Default)]
pub struct InteriorPointSolver {
  settings: SolverSettings,
}

impl InteriorPointSolver {
  pub fn new(settings: SolverSettings) -> Self {
    Self { settings }
  }

  pub fn settings(&self) -> &SolverSettings {
    &self.settings
  }
}

/// Which cone rows an interval row was split into.
#[derive(Clone, Copy, Default)]
struct RowMap {
  equality: Option<usize>,
  upper: Option<usize>,
  lower: Option<usize>,
}

/// Cone-form data `Ax + s = b`, `s ∈ K`.
struct ConeForm {
  a: CscMatrix<f64>,
  b: Vec<f64>,
  cones: Vec<SupportedConeT<f64>>,
  rows: Vec<RowMap>,
}

/// Upper triangle of `p` in compressed-column form.
fn upper_triangle_csc(p: &DMatrix<f64>) -> CscMatrix<f64> {
  let n = p.ncols();
  let mut colptr = vec![0];
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();

  for j in 0..n {
    for i in 0..=j {
      let v = 0.5 * (p[(i, j)] + p[(j, i)]);
      if v != 0.0 {
        rowval.push(i);
        nzval.push(v);
      }
    }
    colptr.push(nzval.len());
  }

  CscMatrix::new(n, n, colptr, rowval, nzval)
}

fn dense_to_csc(rows: &[(f64, usize)], a: &DMatrix<f64>) -> CscMatrix<f64> {
  let n = a.ncols();
  let mut colptr = vec![0];
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();

  for j in 0..n {
    for (k, &(sign, i)) in rows.iter().enumerate() {
      let v = sign * a[(i, j)];
      if v != 0.0 {
        rowval.push(k);
        nzval.push(v);
      }
    }
    colptr.push(nzval.len());
  }

  CscMatrix::new(rows.len(), n, colptr, rowval, nzval)
}

/// Equality rows first (zero cone), then every finite inequality side
/// (non-negative cone).
fn to_cone_form(problem: &QuadraticProgram) -> ConeForm {
  let m = problem.n_constraints();
  let mut rows = vec![RowMap::default(); m];
  let mut signed: Vec<(f64, usize)> = Vec::new();
  let mut b = Vec::new();

  for i in 0..m {
    if problem.l[i] == problem.u[i] {
      rows[i].equality = Some(signed.len());
      signed.push((1.0, i));
      b.push(problem.u[i]);
    }
  }
  let n_eq = signed.len();

  for i in 0..m {
    if problem.l[i] == problem.u[i] {
      continue;
    }
    if problem.u[i].is_finite() {
      rows[i].upper = Some(signed.len());
      signed.push((1.0, i));
      b.push(problem.u[i]);
    }
    if problem.l[i].is_finite() {
      rows[i].lower = Some(signed.len());
      signed.push((-1.0, i));
      b.push(-problem.l[i]);
    }
  }
  let n_ineq = signed.len() - n_eq;

  let mut cones = Vec::with_capacity(2);
  if n_eq > 0 {
    cones.push(SupportedConeT::ZeroConeT(n_eq));
  }
  if n_ineq > 0 {
    cones.push(SupportedConeT::NonnegativeConeT(n_ineq));
  }

  ConeForm {
    a: dense_to_csc(&signed, &problem.a),
    b,
    cones,
    rows,
  }
}

fn map_status(status: &SolverStatus) -> SolveStatus {
  match status {
    SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Solved,
    SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
      SolveStatus::PrimalInfeasible
    }
    SolverStatus::MaxIterations | SolverStatus::MaxTime => SolveStatus::MaxIterationsReached,
    _ => SolveStatus::Failed,
  }
}

impl QpSolver for InteriorPointSolver {
  fn solve(&self, problem: &QuadraticProgram) -> Result<QpSolution> {
    let s = &self.settings;
    s.validate()?;
    problem.validate()?;

    let n = problem.n_vars();
    let p = upper_triangle_csc(&problem.p);
    let q: Vec<f64> = problem.q.iter().copied().collect();
    let form = to_cone_form(problem);

    let settings = DefaultSettingsBuilder::default()
      .max_iter(s.max_iter)
      .tol_gap_abs(s.tol_gap_abs)
      .tol_gap_rel(s.tol_gap_rel)
      .tol_feas(s.tol_feas)
      .verbose(false)
      .build()
      .map_err(|e| PortfolioError::input_validation(format!("invalid solver settings: {e}")))?;

    let mut solver = DefaultSolver::new(&p, &q, &form.a, &form.b, &form.cones, settings)
      .map_err(|e| PortfolioError::solver(0, f64::NAN, format!("solver setup failed: {e:?}")))?;
    solver.solve();

    let sol = &solver.solution;
    let x = if sol.x.len() == n {
      DVector::from_column_slice(&sol.x)
    } else {
      DVector::<f64>::zeros(n)
    };
    let z = |k: Option<usize>| k.and_then(|k| sol.z.get(k).copied()).unwrap_or(0.0);
    let y = DVector::from_iterator(
      form.rows.len(),
      form
        .rows
        .iter()
        .map(|r| z(r.equality) + z(r.upper) - z(r.lower)),
    );

    let status = map_status(&sol.status);
    let solution = QpSolution {
      objective: problem.objective(&x),
      x,
      y,
      status,
      iterations: sol.iterations as usize,
      primal_residual: sol.r_prim,
      dual_residual: sol.r_dual,
    };

    debug!(
      iterations = solution.iterations,
      status = ?sol.status,
      objective = solution.objective,
      primal_residual = solution.primal_residual,
      dual_residual = solution.dual_residual,
      "qp solve finished"
    );
    if status == SolveStatus::MaxIterationsReached {
      warn!(max_iter = s.max_iter, "qp iteration budget exhausted");
    }

    Ok(solution)
  }
}
