//! Dispatch core: calls, responding units and the assignments between them.

pub mod assignment;
pub mod calls;
pub mod callsign;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod notifier;
pub mod relation_diff;
pub mod state;
pub mod units;
pub mod util;

pub use error::{AppError, AppResult};
