//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation.
//! Every variant is fatal at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered sources could not be read or merged
    #[error("Failed to load configuration from '{source_name}': {error}")]
    LoadError { source_name: String, error: String },

    /// Merged configuration does not match the expected shape
    #[error("Failed to deserialize configuration: {error}")]
    DeserializationError { error: String },

    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Failed to expand environment variable '{variable}' in configuration: {context}")]
    EnvironmentVariableError { variable: String, context: String },
}

impl ConfigurationError {
    pub fn load_error(source_name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn environment_variable_error(variable: impl Into<String>, context: impl Into<String>) -> Self {
        Self::EnvironmentVariableError {
            variable: variable.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::DeserializationError {
            error: err.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
