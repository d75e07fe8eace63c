use std::{collections::HashMap, net::SocketAddr};

use crate::{
    config::models::{CapabilityConfig, ServerConfig},
    utils::clean_path,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Service path conflict detected: {message}")]
    PathConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
///
/// Only the envelope shape is checked here. Whether a type tag is registered
/// and whether its inner config makes sense is decided by the registry when
/// the service set is built.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        } else {
            for (path, service) in &config.services {
                if let Err(mut service_errors) = Self::validate_service(path, service) {
                    errors.append(&mut service_errors);
                }
            }
        }

        if let Err(mut conflicts) = Self::check_path_conflicts(config) {
            errors.append(&mut conflicts);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8000' or '0.0.0.0:8000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_service(
        path: &str,
        service: &CapabilityConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if path.chars().any(char::is_whitespace) {
            errors.push(ValidationError::InvalidField {
                field: format!("service path: {path:?}"),
                message: "Service paths must not contain whitespace".to_string(),
            });
        }

        Self::validate_envelope(&format!("service '{path}'"), service, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Checks a capability envelope and every nested envelope found under the
    /// well-known `service`, `commander` and `streamer` keys.
    fn validate_envelope(context: &str, envelope: &CapabilityConfig, errors: &mut Vec<ValidationError>) {
        if envelope.kind.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{context} type"),
            });
        }

        for key in ["service", "commander", "streamer", "log_streamer"] {
            let Some(nested) = envelope.config.get(key) else {
                continue;
            };
            match serde_json::from_value::<CapabilityConfig>(nested.clone()) {
                Ok(inner) => {
                    Self::validate_envelope(&format!("{context} {key}"), &inner, errors)
                }
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: format!("{context} {key}"),
                    message: format!("Expected a {{type, config}} envelope: {e}"),
                }),
            }
        }
    }

    /// Two keys that normalise to the same path would shadow each other.
    fn check_path_conflicts(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        let mut errors = Vec::new();

        let mut keys: Vec<&String> = config.services.keys().collect();
        keys.sort();

        for key in keys {
            let cleaned = clean_path(key);
            if let Some(previous) = seen.insert(cleaned.clone(), key) {
                errors.push(ValidationError::PathConflict {
                    message: format!(
                        "Service paths '{previous}' and '{key}' both resolve to '/{cleaned}'"
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
