use chrono::{Datelike, Utc};
use serde::Deserialize;
use std::{env, fs, path::Path};

/// Process-wide immutable configuration, loaded once at startup and carried
/// in `AppState`. Persons and categories are configuration values, not
/// stored entities.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// The two (or more) people sharing this tracker.
    pub persons: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Defaults to the calendar year at startup when omitted.
    pub current_year: Option<i32>,
    /// bcrypt hash of the single shared password.
    pub password_hash: String,
    pub jwt_secret: String,
    /// Shared secret for the external scheduler triggering summary emails.
    pub cron_secret: Option<String>,
    pub email: Option<EmailConfig>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

/// Outbound mail goes through an HTTP JSON mail API.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
    pub recipients: Vec<String>,
    /// Link target for the "update your goals" button.
    pub app_url: Option<String>,
}

fn default_categories() -> Vec<String> {
    [
        "Health",
        "Finance",
        "Career",
        "Relationship",
        "Personal",
        "Other",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persons.is_empty() {
            return Err(ConfigError::Invalid("persons must not be empty".into()));
        }
        if self.persons.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid("person names must be non-empty".into()));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("categories must not be empty".into()));
        }
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must be set".into()));
        }
        if self.password_hash.trim().is_empty() {
            return Err(ConfigError::Invalid("password_hash must be set".into()));
        }
        Ok(())
    }

    pub fn current_year(&self) -> i32 {
        self.current_year.unwrap_or_else(|| Utc::now().year())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            persons: vec!["Mark".into(), "Gabs".into()],
            categories: default_categories(),
            current_year: Some(2026),
            password_hash: "$2b$12$abcdefghijklmnopqrstuv".into(),
            jwt_secret: "secret".into(),
            cron_secret: None,
            email: None,
            dev_cors_origin: None,
            listen_port: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn empty_persons_rejected() {
        let mut cfg = base();
        cfg.persons.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_secret_rejected() {
        let mut cfg = base();
        cfg.jwt_secret = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_minimal_yaml_with_defaults() {
        let yaml = r#"
persons: [Mark, Gabs]
password_hash: "$2b$12$abcdefghijklmnopqrstuv"
jwt_secret: "sss"
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.categories.len(), 6);
        assert!(cfg.current_year.is_none());
    }
}
