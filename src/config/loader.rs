//! Configuration Loader
//!
//! Environment-aware layered loading with the `config` crate. Handles
//! environment detection, `${VAR}` expansion in connection URLs, validation
//! and sanitized logging of the result.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::{redact_url, OrchestratorConfig};

/// Prefix for environment variable overrides (`ORCHESTRATOR__DATABASE__URL`)
pub const ENV_PREFIX: &str = "ORCHESTRATOR";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration plus the context it was loaded in
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;
        Self::expand_environment_variables(&mut config)?;
        config.validate()?;

        debug!(
            config = %serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration resolved"
        );
        info!(
            environment = %environment,
            default_binding = %config.transport.default_binding,
            run_store = if config.database.is_configured() { "postgres" } else { "in_memory" },
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: OrchestratorConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Sanitized configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("ORCHESTRATOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("ORCHESTRATOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(config_directory: &Path, environment: &str) -> ConfigResult<OrchestratorConfig> {
        let base_path = config_directory.join("base.toml");
        let environment_path = config_directory
            .join("environments")
            .join(format!("{environment}.toml"));

        let merged = Config::builder()
            .add_source(File::from(base_path.as_path()).required(false))
            .add_source(File::from(environment_path.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))?;

        Ok(merged.try_deserialize()?)
    }

    /// Expand `${VAR}` placeholders in connection URLs
    fn expand_environment_variables(config: &mut OrchestratorConfig) -> ConfigResult<()> {
        for url in [
            &mut config.database.url,
            &mut config.transport.rabbitmq.url,
            &mut config.transport.pgmq.url,
        ] {
            let placeholder = url
                .strip_prefix("${")
                .and_then(|rest| rest.strip_suffix('}'))
                .map(str::to_string);
            if let Some(variable) = placeholder {
                let value = env::var(&variable).map_err(|_| {
                    ConfigurationError::environment_variable_error(&variable, "variable is not set")
                })?;
                debug!(variable = %variable, "Expanded environment variable in connection URL");
                *url = value;
            }
        }
        Ok(())
    }

    /// Mask credentials so the configuration can be logged
    fn sanitize_config_for_logging(config: &OrchestratorConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        Self::sanitize_json_recursive(&mut config_json);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value) {
        const SENSITIVE_PATTERNS: [&str; 4] = ["password", "secret", "token", "credential"];

        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if key_lower.ends_with("url") {
                        if let serde_json::Value::String(url) = val {
                            *url = redact_url(url);
                        }
                    } else if SENSITIVE_PATTERNS.iter().any(|p| key_lower.contains(p)) {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val);
                    }
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(Self::sanitize_json_recursive),
            _ => {}
        }
    }
}
