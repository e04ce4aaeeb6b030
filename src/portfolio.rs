//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance portfolio optimization: historical return and Ledoit-Wolf
//! risk estimation, efficient-frontier solves, weight cleaning and
//! performance evaluation.

pub mod cleaner;
pub mod data;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod frontier;
pub mod performance;
pub mod request;
pub mod solver;
pub mod types;

pub use cleaner::CleanerConfig;
pub use cleaner::clean_weights;
pub use data::align_return_series;
pub use data::correlation_matrix;
pub use data::log_returns_series;
pub use data::returns_from_prices;
pub use data::sample_covariance;
pub use engine::DEFAULT_RISK_FREE_RATE;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use engine::optimize;
pub use error::PortfolioError;
pub use error::Result;
pub use estimator::EstimatorConfig;
pub use estimator::ReturnModel;
pub use estimator::ReturnRiskEstimator;
pub use estimator::RiskEstimate;
pub use estimator::ShrinkageTarget;
pub use frontier::EfficientFrontier;
pub use frontier::RawWeights;
pub use performance::evaluate;
pub use request::OptimizeRequest;
pub use request::OptimizeResponse;
pub use solver::InteriorPointSolver;
pub use solver::QpSolver;
pub use solver::QuadraticProgram;
pub use solver::SolverSettings;
pub use types::AssetUniverse;
pub use types::Objective;
pub use types::PerformanceSummary;
pub use types::PortfolioResult;
pub use types::ReturnSeries;
pub use types::WeightBounds;
pub use types::WeightVector;
