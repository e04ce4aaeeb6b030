//! Wire-level request and response shapes for the optimize operation.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::engine::DEFAULT_RISK_FREE_RATE;

fn default_objective() -> String {
  "max_sharpe".to_string()
}

fn default_risk_free_rate() -> f64 {
  DEFAULT_RISK_FREE_RATE
}

/// One optimization request.
///
/// `returns[i]` holds the periodic returns of `symbols[i]`. The objective is
/// kept as text so unknown selectors surface as input errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
  pub symbols: Vec<String>,
  pub returns: Vec<Vec<f64>>,
  #[serde(default = "default_objective")]
  pub objective: String,
  #[serde(default = "default_risk_free_rate")]
  pub risk_free_rate: f64,
}

/// Cleaned allocation keyed by symbol plus its performance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResponse {
  pub weights: BTreeMap<String, f64>,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_defaults_apply() {
    let request: OptimizeRequest =
      serde_json::from_str(r#"{"symbols": ["A", "B"], "returns": [[0.01, 0.02], [0.0, 0.01]]}"#)
        .unwrap();

    assert_eq!(request.objective, "max_sharpe");
    assert_eq!(request.risk_free_rate, 0.05);
  }

  #[test]
  fn response_serializes_weights_by_symbol() {
    let response = OptimizeResponse {
      weights: BTreeMap::from([("B".to_string(), 0.4), ("A".to_string(), 0.6)]),
      expected_return: 0.1,
      volatility: 0.2,
      sharpe_ratio: 0.25,
    };
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["weights"]["A"], 0.6);
    assert_eq!(json["sharpe_ratio"], 0.25);
  }
}
