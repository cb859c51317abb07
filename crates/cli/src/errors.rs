//! CLI error types reported through miette

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the CLI before or while running a cache phase
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(shardcache::cli::configuration),
        help("Run 'shardcache --help' to see available options")
    )]
    Configuration { message: String },

    #[error("Tracing initialization failed: {message}")]
    #[diagnostic(
        code(shardcache::cli::tracing),
        help("Check --log-filter, RUST_LOG and the --log-format option")
    )]
    Tracing { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Action(#[from] shardcache_cache::Error),
}

impl CliError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn tracing(message: impl Into<String>) -> Self {
        Self::Tracing {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = CliError::configuration("event path is missing");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: event path is missing"
        );
    }

    #[test]
    fn test_library_errors_pass_through() {
        let error: CliError = shardcache_cache::Error::unknown_trigger("schedule").into();
        assert!(error.to_string().contains("schedule"));
        assert!(
            error
                .code()
                .is_some_and(|c| c.to_string() == "shardcache::cache::unknown_trigger")
        );
    }
}
