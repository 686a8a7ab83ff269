//! Configuration loading: TOML file overlaid with environment variables.
//!
//! Resolution order matches the teacher's layered `R2eConfig` loader, trimmed
//! to this gateway's needs: a TOML file provides defaults, then a handful of
//! authoritative environment variables (§6 of the spec) override specific
//! fields. `.env` files are loaded via `dotenvy` before the environment is
//! read, mirroring the teacher's convention of never clobbering an
//! already-set variable.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

const PLACEHOLDER_SECRET: &str = "changeme";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
    #[error("JWT_SECRET_KEY is not set or uses the insecure placeholder value")]
    MissingJwtSecret,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_type: DbType,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub index_path: Option<String>,
}

fn default_db_path() -> String {
    "aigateway.db".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_tool")]
    pub default_tool: String,
    #[serde(default)]
    pub code_editing: Vec<String>,
    #[serde(default)]
    pub research: Vec<String>,
    #[serde(default)]
    pub general_chat: Vec<String>,
}

fn default_tool() -> String {
    "gpt".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodebaseConfig {
    #[serde(default)]
    pub auto_index: bool,
    #[serde(default)]
    pub watch_paths: Vec<String>,
    #[serde(default)]
    pub index_depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enable_mobile: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_rate_limit() -> u32 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enable_mobile: false, allowed_origins: Vec::new(), rate_limit_per_minute: default_rate_limit() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Consecutive upstream failures before this provider's breaker trips
    /// open. Spec.md §8 scenario 3 exercises this at 2; the teacher's
    /// resilience defaults to a more conservative 5.
    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_breaker_timeout_secs")]
    pub circuit_breaker_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub codebase: CodebaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

/// Fully resolved runtime configuration: the TOML file plus the
/// authoritative environment-variable overrides from §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub routing: RoutingConfig,
    pub codebase: CodebaseConfig,
    pub api: ApiConfig,
    pub tools: HashMap<String, ToolConfig>,
    pub jwt_secret_key: String,
    pub encryption_key: Option<String>,
    pub mobile_api_key: Option<String>,
    pub valid_api_key: Option<String>,
    pub redis_url: Option<String>,
    pub enable_csrf: bool,
    pub environment: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load from a TOML file path, then overlay process environment
    /// (`.env` loaded first, never overwriting variables already set).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        let file: FileConfig = toml::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        Self::from_file_config(file)
    }

    pub fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let mut tools = file.tools;
        for (name, tool) in tools.iter_mut() {
            if tool.api_key.is_none() {
                if let Ok(key) = std::env::var(&tool.api_key_env) {
                    tool.api_key = Some(key);
                } else if let Ok(key) = std::env::var(format!("{}_API_KEY", name.to_uppercase())) {
                    tool.api_key = Some(key);
                }
            }
        }

        let jwt_secret_key = std::env::var("JWT_SECRET_KEY").unwrap_or_default();
        if jwt_secret_key.is_empty() || jwt_secret_key == PLACEHOLDER_SECRET {
            return Err(ConfigError::MissingJwtSecret);
        }

        let enable_csrf = std::env::var("ENABLE_CSRF")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            storage: file.storage,
            routing: file.routing,
            codebase: file.codebase,
            api: file.api,
            tools,
            jwt_secret_key,
            encryption_key: std::env::var("ENCRYPTION_KEY").ok(),
            mobile_api_key: std::env::var("MOBILE_API_KEY").ok(),
            valid_api_key: std::env::var("VALID_API_KEY").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            enable_csrf,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
        [storage]
        db_type = "sqlite"
        db_path = "test.db"

        [routing]
        default_tool = "gpt"
        code_editing = ["claude"]
        research = ["perplexity"]
        general_chat = ["gpt"]

        [api]
        rate_limit_per_minute = 60

        [tools.gpt]
        api_key_env = "OPENAI_API_KEY"
        enabled = true
        "#
    }

    #[test]
    fn rejects_missing_jwt_secret() {
        std::env::remove_var("JWT_SECRET_KEY");
        let file: FileConfig = toml::from_str(sample_toml()).unwrap();
        let result = Config::from_file_config(file);
        assert!(matches!(result, Err(ConfigError::MissingJwtSecret)));
    }

    #[test]
    fn rejects_placeholder_jwt_secret() {
        std::env::set_var("JWT_SECRET_KEY", "changeme");
        let file: FileConfig = toml::from_str(sample_toml()).unwrap();
        let result = Config::from_file_config(file);
        assert!(matches!(result, Err(ConfigError::MissingJwtSecret)));
        std::env::remove_var("JWT_SECRET_KEY");
    }

    #[test]
    fn accepts_real_secret() {
        std::env::set_var("JWT_SECRET_KEY", "a-real-secret-value");
        let file: FileConfig = toml::from_str(sample_toml()).unwrap();
        let cfg = Config::from_file_config(file).unwrap();
        assert_eq!(cfg.routing.default_tool, "gpt");
        assert_eq!(cfg.api.rate_limit_per_minute, 60);
        std::env::remove_var("JWT_SECRET_KEY");
    }

    #[test]
    fn tool_breaker_thresholds_default_when_unset() {
        let file: FileConfig = toml::from_str(sample_toml()).unwrap();
        let gpt = &file.tools["gpt"];
        assert_eq!(gpt.circuit_breaker_failure_threshold, 5);
        assert_eq!(gpt.circuit_breaker_success_threshold, 2);
        assert_eq!(gpt.circuit_breaker_timeout_secs, 60);
    }

    #[test]
    fn tool_breaker_thresholds_are_overridable_per_provider() {
        let toml_str = r#"
        [storage]
        db_type = "sqlite"

        [tools.flaky]
        api_key_env = "FLAKY_API_KEY"
        circuit_breaker_failure_threshold = 2
        circuit_breaker_success_threshold = 1
        circuit_breaker_timeout_secs = 5
        "#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let flaky = &file.tools["flaky"];
        assert_eq!(flaky.circuit_breaker_failure_threshold, 2);
        assert_eq!(flaky.circuit_breaker_success_threshold, 1);
        assert_eq!(flaky.circuit_breaker_timeout_secs, 5);
    }
}
