pub mod logging;

pub use logging::{init_tracing, init_test_tracing};
