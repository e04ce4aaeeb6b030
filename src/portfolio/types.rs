//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums, validated inputs and result containers for portfolio optimization.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;

use super::error::PortfolioError;
use super::error::Result;

/// Supported optimization objectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
  /// Maximize `(w·μ - r_f) / σ_p`.
  MaxSharpe,
  /// Minimize `wᵗΣw`.
  MinVolatility,
}

impl Objective {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MaxSharpe => "max_sharpe",
      Self::MinVolatility => "min_volatility",
    }
  }
}

impl FromStr for Objective {
  type Err = PortfolioError;

  /// Unknown selectors are rejected, never mapped to a default objective.
  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "max_sharpe" => Ok(Self::MaxSharpe),
      "min_volatility" => Ok(Self::MinVolatility),
      other => Err(PortfolioError::input_validation(format!(
        "unrecognized objective '{other}', expected one of: max_sharpe, min_volatility"
      ))),
    }
  }
}

impl Display for Objective {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Ordered, unique asset identifiers. Index `i` of every vector and matrix
/// refers to `ids()[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetUniverse {
  ids: Vec<String>,
}

impl AssetUniverse {
  pub fn new<I, S>(ids: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
      return Err(PortfolioError::input_validation("asset universe is empty"));
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for id in &ids {
      if id.trim().is_empty() {
        return Err(PortfolioError::input_validation("asset identifier is blank"));
      }
      if !seen.insert(id.as_str()) {
        return Err(PortfolioError::input_validation(format!(
          "duplicate asset identifier '{id}'"
        )));
      }
    }

    Ok(Self { ids })
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  pub fn ids(&self) -> &[String] {
    &self.ids
  }

  pub fn position(&self, id: &str) -> Option<usize> {
    self.ids.iter().position(|x| x == id)
  }
}

/// Periodic returns, one row per asset and one column per period.
#[derive(Clone, Debug)]
pub struct ReturnSeries {
  data: Array2<f64>,
}

impl ReturnSeries {
  /// Validate row-major per-asset observations against `universe`.
  ///
  /// Shape and finiteness problems are input errors; fewer than two periods is
  /// reported as insufficient data.
  pub fn new(universe: &AssetUniverse, rows: &[Vec<f64>]) -> Result<Self> {
    if rows.len() != universe.len() {
      return Err(PortfolioError::input_validation(format!(
        "return matrix has {} rows for {} assets",
        rows.len(),
        universe.len()
      )));
    }

    let n_periods = rows.first().map(|r| r.len()).unwrap_or(0);
    if n_periods == 0 {
      return Err(PortfolioError::input_validation("return series are empty"));
    }

    for (id, row) in universe.ids().iter().zip(rows) {
      if row.len() != n_periods {
        return Err(PortfolioError::input_validation(format!(
          "series '{id}' has {} observations, expected {n_periods}",
          row.len()
        )));
      }
      if let Some(t) = row.iter().position(|v| !v.is_finite()) {
        return Err(PortfolioError::input_validation(format!(
          "series '{id}' has a non-finite value at period {t}"
        )));
      }
    }

    if n_periods < 2 {
      return Err(PortfolioError::insufficient_data(
        "observations per asset",
        2,
        n_periods,
      ));
    }

    let data = Array2::from_shape_fn((rows.len(), n_periods), |(i, t)| rows[i][t]);
    Ok(Self { data })
  }

  pub fn n_assets(&self) -> usize {
    self.data.nrows()
  }

  pub fn n_periods(&self) -> usize {
    self.data.ncols()
  }

  pub fn view(&self) -> ArrayView2<'_, f64> {
    self.data.view()
  }
}

/// Per-asset weight limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightBounds {
  /// Same `[lower, upper]` interval for every asset.
  Uniform { lower: f64, upper: f64 },
  /// One `(lower, upper)` pair per asset, universe order.
  PerAsset(Vec<(f64, f64)>),
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self::Uniform {
      lower: 0.0,
      upper: 1.0,
    }
  }
}

impl WeightBounds {
  /// Expand to explicit lower and upper vectors for `n` assets.
  pub fn resolve(&self, n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let pairs: Vec<(f64, f64)> = match self {
      Self::Uniform { lower, upper } => vec![(*lower, *upper); n],
      Self::PerAsset(pairs) => {
        if pairs.len() != n {
          return Err(PortfolioError::input_validation(format!(
            "{} weight bounds supplied for {n} assets",
            pairs.len()
          )));
        }
        pairs.clone()
      }
    };

    for (i, &(lo, hi)) in pairs.iter().enumerate() {
      if !lo.is_finite() || !hi.is_finite() {
        return Err(PortfolioError::input_validation(format!(
          "weight bounds for asset {i} must be finite"
        )));
      }
      if lo > hi {
        return Err(PortfolioError::input_validation(format!(
          "lower weight bound {lo} exceeds upper bound {hi} for asset {i}"
        )));
      }
    }

    Ok(pairs.into_iter().unzip())
  }
}

/// Final allocation, one fraction per asset in universe order.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
  weights: Array1<f64>,
}

impl WeightVector {
  pub fn new(weights: Array1<f64>) -> Self {
    Self { weights }
  }

  pub fn view(&self) -> ArrayView1<'_, f64> {
    self.weights.view()
  }

  pub fn as_slice(&self) -> &[f64] {
    self.weights.as_slice().unwrap_or(&[])
  }

  pub fn sum(&self) -> f64 {
    self.weights.sum()
  }

  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  pub fn into_inner(self) -> Array1<f64> {
    self.weights
  }
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
///
/// Only the evaluator constructs it; fields are read-only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PerformanceSummary {
  expected_return: f64,
  volatility: f64,
  sharpe_ratio: f64,
}

impl PerformanceSummary {
  pub(crate) fn derived(expected_return: f64, volatility: f64, sharpe_ratio: f64) -> Self {
    Self {
      expected_return,
      volatility,
      sharpe_ratio,
    }
  }

  pub fn expected_return(&self) -> f64 {
    self.expected_return
  }

  pub fn volatility(&self) -> f64 {
    self.volatility
  }

  pub fn sharpe_ratio(&self) -> f64 {
    self.sharpe_ratio
  }
}

/// Output of a successful optimization run.
#[derive(Clone, Debug)]
pub struct PortfolioResult {
  /// Universe the weights are indexed by.
  pub universe: AssetUniverse,
  /// Cleaned weights.
  pub weights: WeightVector,
  /// Metrics of the cleaned weights.
  pub performance: PerformanceSummary,
  /// Ledoit-Wolf shrinkage intensity used for the covariance.
  pub shrinkage: f64,
  /// Solver iterations spent.
  pub iterations: usize,
}

impl PortfolioResult {
  /// `(identifier, weight)` pairs in universe order.
  pub fn allocation(&self) -> Vec<(&str, f64)> {
    self
      .universe
      .ids()
      .iter()
      .map(String::as_str)
      .zip(self.weights.as_slice().iter().copied())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn objective_parses_known_selectors() {
    assert_eq!("max_sharpe".parse::<Objective>(), Ok(Objective::MaxSharpe));
    assert_eq!(
      " MIN_VOLATILITY ".parse::<Objective>(),
      Ok(Objective::MinVolatility)
    );
  }

  #[test]
  fn objective_rejects_unknown_selector() {
    let err = "efficient_risk".parse::<Objective>().unwrap_err();
    assert!(matches!(err, PortfolioError::InputValidation { .. }));
  }

  #[test]
  fn universe_rejects_duplicates_and_empty() {
    assert!(AssetUniverse::new(Vec::<String>::new()).is_err());
    let err = AssetUniverse::new(["AAPL", "MSFT", "AAPL"]).unwrap_err();
    assert!(err.to_string().contains("duplicate asset identifier 'AAPL'"));
  }

  #[test]
  fn return_series_validation_order() {
    let universe = AssetUniverse::new(["A", "B"]).unwrap();

    let mismatch = ReturnSeries::new(&universe, &[vec![0.01, 0.02]]).unwrap_err();
    assert!(matches!(mismatch, PortfolioError::InputValidation { .. }));

    let ragged = ReturnSeries::new(&universe, &[vec![0.01, 0.02], vec![0.0]]).unwrap_err();
    assert!(matches!(ragged, PortfolioError::InputValidation { .. }));

    let nan = ReturnSeries::new(&universe, &[vec![0.01, f64::NAN], vec![0.0, 0.1]]).unwrap_err();
    assert!(matches!(nan, PortfolioError::InputValidation { .. }));

    let short = ReturnSeries::new(&universe, &[vec![0.01], vec![0.0]]).unwrap_err();
    assert_eq!(
      short,
      PortfolioError::insufficient_data("observations per asset", 2, 1)
    );

    let ok = ReturnSeries::new(&universe, &[vec![0.01, 0.02, 0.0], vec![0.0, 0.1, 0.2]]).unwrap();
    assert_eq!(ok.n_assets(), 2);
    assert_eq!(ok.n_periods(), 3);
  }

  #[test]
  fn bounds_resolve_and_validate() {
    let (lo, hi) = WeightBounds::default().resolve(3).unwrap();
    assert_eq!(lo, vec![0.0; 3]);
    assert_eq!(hi, vec![1.0; 3]);

    assert!(WeightBounds::PerAsset(vec![(0.0, 1.0)]).resolve(2).is_err());
    assert!(WeightBounds::Uniform {
      lower: 0.5,
      upper: 0.1
    }
    .resolve(2)
    .is_err());
  }
}
