use std::fmt;

/// Main error type for jobforge.
///
/// Variants map directly onto the error kinds recognized by the core:
/// `Validation`/`NotFound` are producer-facing (HTTP 400/404); `Transient`
/// is logged and swallowed inside the worker loop; `AdapterFailure` moves a
/// job to `failed`; `ResourceExhaustion` fails a script-runner task; `Fatal`
/// exits a worker process non-zero. The remaining variants are plumbing
/// conversions from the libraries each component sits on top of.
#[derive(Debug)]
pub enum Error {
    /// Bad input from a producer. Reported with 400.
    Validation(String),

    /// Missing Job or Worker. Reported with 404.
    NotFound(String),

    /// KV store or HTTP hiccup inside the worker loop. Logged; polling
    /// continues; job state is not changed.
    Transient(String),

    /// Terminal send error from an adapter after primary and backup are
    /// both exhausted. The job moves to `failed`.
    AdapterFailure(String),

    /// Script runner could not acquire CPU/memory headroom within its
    /// retry budget.
    ResourceExhaustion(String),

    /// Worker init failure. The process should exit non-zero so the
    /// supervisor restarts it.
    Fatal(String),

    /// Configuration errors.
    Config(String),

    /// Database errors (SQLx wrapped).
    Database(sqlx::Error),

    /// Redis / cache errors.
    Cache(String),

    /// HTTP client errors.
    Network(String),

    /// Serialization errors.
    Serialization(serde_json::Error),

    /// IO errors.
    Io(std::io::Error),

    /// Generic errors with description.
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Transient(msg) => write!(f, "Transient error: {}", msg),
            Error::AdapterFailure(msg) => write!(f, "Adapter failure: {}", msg),
            Error::ResourceExhaustion(msg) => write!(f, "Resource exhaustion: {}", msg),
            Error::Fatal(msg) => write!(f, "Fatal error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Cache(msg) => write!(f, "Cache error: {}", msg),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        Error::Cache(error.to_string())
    }
}

// Common error constructors
impl Error {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn transient<T: Into<String>>(msg: T) -> Self {
        Error::Transient(msg.into())
    }

    pub fn adapter_failure<T: Into<String>>(msg: T) -> Self {
        Error::AdapterFailure(msg.into())
    }

    pub fn resource_exhaustion<T: Into<String>>(msg: T) -> Self {
        Error::ResourceExhaustion(msg.into())
    }

    pub fn fatal<T: Into<String>>(msg: T) -> Self {
        Error::Fatal(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn cache<T: Into<String>>(msg: T) -> Self {
        Error::Cache(msg.into())
    }

    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Transient(_) => 503,
            Error::AdapterFailure(_) => 500,
            Error::ResourceExhaustion(_) => 503,
            Error::Fatal(_) => 500,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Cache(_) => 500,
            Error::Network(_) => 503,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Transient(_) => "transient",
            Error::AdapterFailure(_) => "adapter_failure",
            Error::ResourceExhaustion(_) => "resource_exhaustion",
            Error::Fatal(_) => "fatal",
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Cache(_) => "cache",
            Error::Network(_) => "network",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_handling_design() {
        assert_eq!(Error::validation("x").status_code(), 400);
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::adapter_failure("x").status_code(), 500);
        assert_eq!(Error::resource_exhaustion("x").status_code(), 503);
    }

    #[test]
    fn categories_are_stable_strings() {
        assert_eq!(Error::fatal("boom").category(), "fatal");
        assert_eq!(Error::transient("blip").category(), "transient");
    }
}
