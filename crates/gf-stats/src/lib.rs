//! Counts statistics for gammafit.
//!
//! This crate hosts the fit statistic used by every binned dataset:
//! - the Cash statistic (`2 (mu - n ln mu)`) with its documented floor on `mu`
//! - summary statistics for a counts/background pair (excess, TS, significance)
//! - small numeric helpers (clamped exp, log-space grids, Simpson integration)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cash;
pub mod counts;
pub mod math;

pub use cash::{CASH_TRUNCATION, cash, cash_generic, cash_sum};
pub use counts::CashCountsStatistic;
