pub mod health;
pub mod rating;

pub use health::{health_check, metrics_handler, readiness_check};
pub use rating::{list_cdrs, rate_usage};
