pub mod logger;
pub mod secret_scrubbing;

pub use logger::{init, LoggerGuard};
