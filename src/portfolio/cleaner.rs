//! # Weight Cleaning
//!
//! $$
//! \tilde w_i = \frac{w_i\,\mathbb 1\{|w_i|\ge\tau\}}{\sum_j w_j\,\mathbb 1\{|w_j|\ge\tau\}},
//! \qquad l_i \le \tilde w_i \le u_i
//! $$
//!
//! Drops dust positions, renormalizes and rounds so the published weights
//! still add up to exactly one at the requested precision. Every step stays
//! inside the per-asset bounds the solver was given: dust is only zeroed when
//! zero is an allowed weight, the renormalization deficit is shared out up to
//! each weight's remaining room, and rounding snaps to the nearest grid point
//! inside `[l_i, u_i]`.

use ndarray::Array1;
use serde::Deserialize;
use serde::Serialize;

use super::error::PortfolioError;
use super::error::Result;
use super::types::WeightVector;

/// Slack allowed when comparing a weight against its bounds.
const BOUND_SLACK: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
  /// Weights with magnitude below this are zeroed.
  pub zero_threshold: f64,
  /// Decimal places kept; `None` skips rounding.
  pub precision: Option<u32>,
  /// Allowed drift of the cleaned sum from one.
  pub tolerance: f64,
}

impl Default for CleanerConfig {
  fn default() -> Self {
    Self {
      zero_threshold: 1e-4,
      precision: Some(4),
      tolerance: 1e-6,
    }
  }
}

impl CleanerConfig {
  pub fn validate(&self) -> Result<()> {
    if !(self.zero_threshold.is_finite() && self.zero_threshold >= 0.0) {
      return Err(PortfolioError::input_validation(
        "zero threshold must be non-negative",
      ));
    }
    if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
      return Err(PortfolioError::input_validation(
        "cleaning tolerance must be positive",
      ));
    }
    if self.precision.is_some_and(|p| p > 15) {
      return Err(PortfolioError::input_validation(
        "cleaning precision must be at most 15 decimals",
      ));
    }
    Ok(())
  }
}

fn round_to(x: f64, scale: f64) -> f64 {
  (x * scale).round() / scale
}

/// Room left for moving `w[i]` in the direction of `sign`.
fn room(w: f64, lo: f64, hi: f64, sign: f64) -> f64 {
  if sign > 0.0 {
    (hi - w).max(0.0)
  } else {
    (w - lo).max(0.0)
  }
}

/// Share `deficit` over `candidates` in proportion to `score`, capping each
/// move at the room inside its bounds. Returns what could not be placed.
fn water_fill(
  w: &mut Array1<f64>,
  candidates: &[usize],
  score: impl Fn(usize, f64) -> f64,
  mut deficit: f64,
  lower: &[f64],
  upper: &[f64],
) -> f64 {
  let sign = deficit.signum();
  for _ in 0..=candidates.len() {
    if deficit.abs() <= f64::EPSILON {
      break;
    }
    let open: Vec<(usize, f64)> = candidates
      .iter()
      .filter(|&&i| room(w[i], lower[i], upper[i], sign) > 0.0)
      .map(|&i| (i, score(i, w[i])))
      .filter(|&(_, s)| s > 0.0)
      .collect();
    let total: f64 = open.iter().map(|&(_, s)| s).sum();
    if open.is_empty() || total <= 0.0 {
      break;
    }

    let mut placed = 0.0;
    for &(i, s) in &open {
      let step = (deficit.abs() * s / total).min(room(w[i], lower[i], upper[i], sign));
      w[i] += sign * step;
      placed += step;
    }
    deficit -= sign * placed;
  }
  deficit
}

/// Snap `w` to the `scale` grid without leaving `[lo, hi]`.
fn snap_within(w: f64, lo: f64, hi: f64, scale: f64) -> Option<f64> {
  if w == 0.0 {
    return Some(0.0);
  }
  let mut r = round_to(w, scale);
  if r > hi + BOUND_SLACK {
    r = (w * scale).floor() / scale;
  } else if r < lo - BOUND_SLACK {
    r = (w * scale).ceil() / scale;
  }
  (lo - BOUND_SLACK..=hi + BOUND_SLACK)
    .contains(&r)
    .then_some(r)
}

/// Put the rounding residual on the largest weight with room for it, or
/// spread it one grid step at a time from the largest weight down.
fn place_residual(
  w: &mut Array1<f64>,
  residual: f64,
  scale: f64,
  lower: &[f64],
  upper: &[f64],
) -> Result<()> {
  let sign = residual.signum();
  let mut order: Vec<usize> = (0..w.len()).filter(|&i| w[i] != 0.0).collect();
  order.sort_by(|&a, &b| w[b].abs().total_cmp(&w[a].abs()));

  if let Some(&i) = order
    .iter()
    .find(|&&i| room(w[i], lower[i], upper[i], sign) + BOUND_SLACK >= residual.abs())
  {
    w[i] = round_to(w[i] + residual, scale);
    return Ok(());
  }

  let grid_step = 1.0 / scale;
  let mut steps = (residual.abs() * scale).round() as usize;
  for &i in &order {
    while steps > 0 && room(w[i], lower[i], upper[i], sign) + BOUND_SLACK >= grid_step {
      w[i] = round_to(w[i] + sign * grid_step, scale);
      steps -= 1;
    }
  }
  if steps > 0 {
    return Err(PortfolioError::degenerate(format!(
      "rounding residual {residual:e} does not fit inside the weight bounds"
    )));
  }
  Ok(())
}

/// Clean raw solver weights inside the per-asset `lower` and `upper` bounds.
///
/// Cleaning an already clean vector returns it unchanged.
pub fn clean_weights(
  raw: &Array1<f64>,
  lower: &[f64],
  upper: &[f64],
  config: &CleanerConfig,
) -> Result<WeightVector> {
  let n = raw.len();
  if n == 0 {
    return Err(PortfolioError::input_validation("no weights to clean"));
  }
  if lower.len() != n || upper.len() != n {
    return Err(PortfolioError::input_validation(format!(
      "{n} weights but {} lower and {} upper bounds",
      lower.len(),
      upper.len()
    )));
  }
  if raw.iter().any(|w| !w.is_finite()) {
    return Err(PortfolioError::input_validation("raw weights must be finite"));
  }
  config.validate()?;

  let mut w = Array1::from_shape_fn(n, |i| raw[i].clamp(lower[i], upper[i]));
  for i in 0..n {
    if w[i].abs() < config.zero_threshold && lower[i] <= 0.0 && upper[i] >= 0.0 {
      w[i] = 0.0;
    }
  }

  let total = w.sum();
  if w.iter().all(|&v| v == 0.0) || total.abs() <= config.tolerance {
    return Err(PortfolioError::degenerate(format!(
      "surviving weights sum to {total:e} after zeroing below {}",
      config.zero_threshold
    )));
  }

  let deficit = 1.0 - total;
  if deficit.abs() > f64::EPSILON * n as f64 {
    let held: Vec<usize> = (0..n).filter(|&i| w[i] != 0.0).collect();
    let mut left = water_fill(&mut w, &held, |_, v| v.abs(), deficit, lower, upper);
    if left.abs() > config.tolerance {
      // Survivors are saturated; fall back on the zeroed positions.
      let sign = left.signum();
      let all: Vec<usize> = (0..n).collect();
      left = water_fill(
        &mut w,
        &all,
        |i, v| room(v, lower[i], upper[i], sign),
        left,
        lower,
        upper,
      );
    }
    if left.abs() > config.tolerance {
      return Err(PortfolioError::degenerate(format!(
        "weights cannot be renormalized inside their bounds, {left:e} left over"
      )));
    }
  }

  if let Some(p) = config.precision {
    let scale = 10f64.powi(p as i32);
    for i in 0..n {
      w[i] = snap_within(w[i], lower[i], upper[i], scale).ok_or_else(|| {
        PortfolioError::degenerate(format!(
          "no {p}-decimal weight lies inside [{}, {}]",
          lower[i], upper[i]
        ))
      })?;
    }

    let residual = round_to(1.0 - w.sum(), scale);
    if residual != 0.0 {
      place_residual(&mut w, residual, scale, lower, upper)?;
    }
  }

  let sum = w.sum();
  if (sum - 1.0).abs() > config.tolerance.max(1e-9) {
    return Err(PortfolioError::degenerate(format!(
      "cleaned weights sum to {sum}, outside tolerance {}",
      config.tolerance
    )));
  }
  if let Some(i) =
    (0..n).find(|&i| w[i] < lower[i] - BOUND_SLACK || w[i] > upper[i] + BOUND_SLACK)
  {
    return Err(PortfolioError::degenerate(format!(
      "cleaned weight {} left [{}, {}]",
      w[i], lower[i], upper[i]
    )));
  }

  Ok(WeightVector::new(w))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn long_only(n: usize) -> (Vec<f64>, Vec<f64>) {
    (vec![0.0; n], vec![1.0; n])
  }

  fn clean(raw: &Array1<f64>) -> Result<WeightVector> {
    let (lo, hi) = long_only(raw.len());
    clean_weights(raw, &lo, &hi, &CleanerConfig::default())
  }

  #[test]
  fn dust_is_zeroed_and_rest_renormalized() {
    let clean = clean(&array![0.60004, 0.39991, 0.00005]).unwrap();
    let w = clean.as_slice();

    assert_eq!(w[2], 0.0);
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[0], 0.6001, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 0.3999, epsilon = 1e-12);
  }

  #[test]
  fn rounding_residual_goes_to_largest_weight() {
    let raw = array![1.0 / 3.0, 1.0 / 3.0 + 1e-3, 1.0 / 3.0 - 1e-3];
    let clean = clean(&raw).unwrap();
    let w = clean.as_slice();

    assert_eq!(w[0], 0.3333);
    assert_eq!(w[2], 0.3323);
    assert_abs_diff_eq!(w[1], 0.3344, epsilon = 1e-12);
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn residual_skips_a_weight_sitting_on_its_cap() {
    let raw = array![0.4, 0.20004, 0.20004, 0.19992];
    let (lo, hi) = (vec![0.0; 4], vec![0.4; 4]);
    let clean = clean_weights(&raw, &lo, &hi, &CleanerConfig::default()).unwrap();
    let w = clean.as_slice();

    assert_eq!(w[0], 0.4);
    assert_abs_diff_eq!(w[1], 0.2001, epsilon = 1e-12);
    assert!(w.iter().all(|&v| v <= 0.4 + 1e-12));
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn weight_with_positive_floor_is_never_zeroed() {
    let raw = array![0.6, 0.39994, 0.00006];
    let lo = vec![0.0, 0.0, 5e-5];
    let hi = vec![1.0; 3];
    let clean = clean_weights(&raw, &lo, &hi, &CleanerConfig::default()).unwrap();
    let w = clean.as_slice();

    assert!(w[2] >= 5e-5);
    assert_abs_diff_eq!(w[2], 0.0001, epsilon = 1e-12);
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn rounding_below_a_floor_rounds_up_instead() {
    let raw = array![0.5, 0.48496, 0.01504];
    let lo = vec![0.0, 0.0, 0.01504];
    let hi = vec![1.0; 3];
    let clean = clean_weights(&raw, &lo, &hi, &CleanerConfig::default()).unwrap();
    let w = clean.as_slice();

    assert!(w[2] >= 0.01504);
    assert_abs_diff_eq!(w[2], 0.0151, epsilon = 1e-12);
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn renormalization_respects_caps() {
    // Dust on the last asset leaves a deficit the capped first asset cannot take.
    let raw = array![0.5, 0.30004, 0.19991, 0.00005];
    let (lo, hi) = (vec![0.0; 4], vec![0.5; 4]);
    let clean = clean_weights(&raw, &lo, &hi, &CleanerConfig::default()).unwrap();
    let w = clean.as_slice();

    assert_eq!(w[0], 0.5);
    assert_eq!(w[3], 0.0);
    assert!(w.iter().all(|&v| (0.0..=0.5 + 1e-12).contains(&v)));
    assert_abs_diff_eq!(clean.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn no_grid_rounding_inside_caps_is_degenerate() {
    let raw = array![0.33334, 0.33334, 0.33332];
    let (lo, hi) = (vec![0.0; 3], vec![0.33334; 3]);
    let err = clean_weights(&raw, &lo, &hi, &CleanerConfig::default()).unwrap_err();

    assert!(matches!(err, PortfolioError::DegenerateResult { .. }));
  }

  #[test]
  fn cleaning_is_idempotent() {
    let raw = array![0.123456, 0.5, 0.376544, 0.00002];
    let (lo, hi) = long_only(4);
    let config = CleanerConfig::default();
    let once = clean_weights(&raw, &lo, &hi, &config).unwrap();
    let twice = clean_weights(&once.clone().into_inner(), &lo, &hi, &config).unwrap();

    assert_eq!(once, twice);
  }

  #[test]
  fn no_rounding_without_precision() {
    let (lo, hi) = long_only(2);
    let config = CleanerConfig {
      precision: None,
      ..Default::default()
    };
    let clean = clean_weights(&array![0.25, 0.75], &lo, &hi, &config).unwrap();

    assert_eq!(clean.as_slice(), &[0.25, 0.75]);
  }

  #[test]
  fn all_dust_is_degenerate() {
    let lo = vec![-1.0; 2];
    let hi = vec![1.0; 2];
    let err =
      clean_weights(&array![1e-5, -1e-5], &lo, &hi, &CleanerConfig::default()).unwrap_err();

    assert!(matches!(err, PortfolioError::DegenerateResult { .. }));
  }

  #[test]
  fn negative_threshold_is_rejected() {
    let config = CleanerConfig {
      zero_threshold: -1.0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(PortfolioError::InputValidation { .. })
    ));
  }
}
