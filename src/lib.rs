//! # Frontier Alpha
//!
//! $$
//! \max_{\mathbf w}\ \frac{\mathbf w^\top\mu - r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w = 1,\ l \le \mathbf w \le u
//! $$
//!
//! Mean-variance portfolio optimization over historical asset returns.

pub mod logging;
pub mod portfolio;

pub use portfolio::Objective;
pub use portfolio::PortfolioEngine;
pub use portfolio::PortfolioError;
pub use portfolio::optimize;
