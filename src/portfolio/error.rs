//! # Portfolio Errors
//!
//! Typed failure taxonomy shared by every optimization stage. A failed call
//! never carries a partial weight vector.

use thiserror::Error;

/// Result alias for portfolio optimization.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Errors raised by estimation, solving, cleaning and evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  /// Shape mismatch, duplicate identifiers, malformed data or unknown objective.
  #[error("invalid input: {message}")]
  InputValidation { message: String },

  /// Too few observations (or series) to estimate returns and risk.
  #[error("insufficient data: need at least {required} {what}, got {actual}")]
  InsufficientData {
    what: &'static str,
    required: usize,
    actual: usize,
  },

  /// No weight vector satisfies the constraints.
  #[error("infeasible problem: {reason}")]
  Infeasible { reason: String },

  /// The numerical solve did not reach a usable solution.
  #[error("solver failed after {iterations} iterations (last objective {objective:.6e}): {reason}")]
  Solver {
    iterations: usize,
    objective: f64,
    reason: String,
  },

  /// A metric is undefined for the final portfolio (e.g. zero volatility).
  #[error("degenerate result: {condition}")]
  DegenerateResult { condition: String },
}

impl PortfolioError {
  pub fn input_validation(message: impl Into<String>) -> Self {
    Self::InputValidation {
      message: message.into(),
    }
  }

  pub fn insufficient_data(what: &'static str, required: usize, actual: usize) -> Self {
    Self::InsufficientData {
      what,
      required,
      actual,
    }
  }

  pub fn infeasible(reason: impl Into<String>) -> Self {
    Self::Infeasible {
      reason: reason.into(),
    }
  }

  pub fn solver(iterations: usize, objective: f64, reason: impl Into<String>) -> Self {
    Self::Solver {
      iterations,
      objective,
      reason: reason.into(),
    }
  }

  pub fn degenerate(condition: impl Into<String>) -> Self {
    Self::DegenerateResult {
      condition: condition.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn solver_error_reports_diagnostics() {
    let err = PortfolioError::solver(20_000, 0.0125, "iteration budget exhausted");
    let msg = err.to_string();

    assert!(msg.contains("20000 iterations"));
    assert!(msg.contains("1.250000e-2"));
  }

  #[test]
  fn insufficient_data_message() {
    let err = PortfolioError::insufficient_data("observations per asset", 2, 1);
    assert_eq!(
      err.to_string(),
      "insufficient data: need at least 2 observations per asset, got 1"
    );
  }
}
