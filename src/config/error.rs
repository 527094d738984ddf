//! Errors raised while locating, parsing or validating `taskrelay.yaml`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No taskrelay configuration found (looked in {searched_paths:?})")]
    ConfigFileNotFound { searched_paths: Vec<PathBuf> },

    #[error("Cannot read '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    #[error("Malformed YAML in '{file_path}': {error}")]
    InvalidYaml { file_path: String, error: String },

    /// Only `development`, `test` and `production` have overlay sections
    #[error("Unknown environment '{environment}' (expected one of {expected:?})")]
    UnknownEnvironment {
        environment: String,
        expected: Vec<&'static str>,
    },

    /// A value parsed but breaks a pipeline rule (empty lane name, zero TTL...)
    #[error("{field} = '{value}' rejected: {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn config_file_not_found(searched_paths: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched_paths }
    }

    pub fn file_read_error(file_path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_yaml(file_path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::InvalidYaml {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn unknown_environment(environment: impl Into<String>, expected: &[&'static str]) -> Self {
        Self::UnknownEnvironment {
            environment: environment.into(),
            expected: expected.to_vec(),
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
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
