//! Service layer: the embedded store and its repositories, plus metrics.

pub mod database;
pub mod metrics;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
