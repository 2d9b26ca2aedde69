//! Settings validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and log levels before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Settings → Result<(), Vec<ValidationError>>
//! - Virtual server declarations are checked by the orchestrator, not here

use std::fmt;
use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::schema::Settings;

/// A single semantic problem in the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every setting, collecting all problems.
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if EnvFilter::try_new(&settings.observability.log_level).is_err() {
        errors.push(ValidationError {
            field: "observability.log_level",
            message: format!("invalid filter \"{}\"", settings.observability.log_level),
        });
    }

    if settings.observability.metrics_enabled
        && settings.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address",
            message: format!("\"{}\" is not a socket address", settings.observability.metrics_address),
        });
    }

    if settings.admin.enabled {
        if settings.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "admin.bind_address",
                message: format!("\"{}\" is not a socket address", settings.admin.bind_address),
            });
        }
        if settings.admin.api_key.is_empty() {
            errors.push(ValidationError {
                field: "admin.api_key",
                message: "must not be empty when the admin API is enabled".to_string(),
            });
        }
    }

    if let Some(dir) = &settings.dictionary.directory {
        if !dir.is_dir() {
            errors.push(ValidationError {
                field: "dictionary.directory",
                message: format!("{} is not a directory", dir.display()),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut settings = Settings::default();
        settings.admin.enabled = true;
        settings.admin.bind_address = "nowhere".into();
        settings.admin.api_key = String::new();
        settings.observability.metrics_enabled = true;
        settings.observability.metrics_address = "also nowhere".into();

        let errors = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["observability.metrics_address", "admin.bind_address", "admin.api_key"]
        );
    }
}
