pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod supervisor;

pub use config::Config;
pub use error::{Error, Result};

/// Current version of jobforge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::validation("Test validation error");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }
}
