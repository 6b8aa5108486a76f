//! SQLite persistence for instruments, price bars, news, predictions and
//! scenario batches.

pub mod db;
pub mod market;
pub mod models;
pub mod predictions;
pub mod scenarios;

pub use db::PredictionDb;
pub use market::PREVIOUS_CLOSE_TOLERANCE;
pub use models::*;
