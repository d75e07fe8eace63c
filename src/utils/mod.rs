pub mod graceful_shutdown;
pub mod path;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use path::clean_path;
