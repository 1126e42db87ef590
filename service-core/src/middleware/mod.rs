pub mod auth_token;
pub mod metrics;
pub mod tracing;

pub use auth_token::AuthToken;
