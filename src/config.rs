use thiserror::Error;

const VALIDATION_ENV: &str = "APP_VALIDATION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value `{value}` for {var}, expected on/off")]
    InvalidFlag { var: &'static str, value: String },
}

/// Startup settings for the application window and Vulkan bootstrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Whether validation layers are required and enabled.
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new("Vulkan App", 800, 600)
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            validation: cfg!(debug_assertions),
        }
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Applies `APP_VALIDATION` from the environment, if set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        match std::env::var(VALIDATION_ENV) {
            Ok(value) => Ok(self.with_validation(parse_flag(VALIDATION_ENV, &value)?)),
            Err(_) => Ok(self),
        }
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validation_follows_build_profile() {
        let config = AppConfig::default();
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert_eq!((config.width, config.height), (800, 600));
    }

    #[test]
    fn validation_can_be_toggled_at_runtime() {
        assert!(AppConfig::default().with_validation(true).validation);
        assert!(!AppConfig::default().with_validation(false).validation);
    }

    #[test]
    fn flags_parse_case_insensitively() {
        assert_eq!(parse_flag(VALIDATION_ENV, "ON"), Ok(true));
        assert_eq!(parse_flag(VALIDATION_ENV, " 1 "), Ok(true));
        assert_eq!(parse_flag(VALIDATION_ENV, "False"), Ok(false));
        assert_eq!(parse_flag(VALIDATION_ENV, "no"), Ok(false));
    }

    #[test]
    fn bad_flag_is_rejected() {
        assert_eq!(
            parse_flag(VALIDATION_ENV, "maybe"),
            Err(ConfigError::InvalidFlag {
                var: VALIDATION_ENV,
                value: "maybe".to_string(),
            })
        );
    }
}
