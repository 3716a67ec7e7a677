use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::marketplace::{MAX_BATCH_SIZE, Visibility};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub pricing: PricingConfig,
    pub settings: SettingsConfig,
    pub images: ImageConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout: u64,
    pub page_size: u32,
    pub visibility: Visibility,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub default_coefficient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub enabled: bool,
    pub thumbnail_size: u32,
    pub max_concurrent: usize,
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "https://api-seller.ozon.ru".to_string(),
                request_timeout: 30,
                page_size: MAX_BATCH_SIZE as u32,
                visibility: Visibility::All,
                retry_attempts: 0,
                retry_delay_ms: 2000,
            },
            scheduler: SchedulerConfig { interval_secs: 60 },
            pricing: PricingConfig {
                default_coefficient: 0.852,
            },
            settings: SettingsConfig {
                path: PathBuf::from("settings.toml"),
            },
            images: ImageConfig {
                enabled: true,
                thumbnail_size: 65,
                max_concurrent: 4,
                request_timeout: 15,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9001,
            },
            logging: LoggingConfig {
                directory: None,
                file_prefix: "ozon-repricer.log".to_string(),
            },
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Built-in defaults so the binary runs without any config files
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Local overrides (ignored by git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Environment variables with prefix "REPRICER_", e.g. REPRICER__API__PAGE_SIZE
            .add_source(Environment::with_prefix("REPRICER").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.api.base_url).is_err() {
            return Err(ConfigError::Message("Invalid API base URL format".into()));
        }

        if self.api.page_size == 0 || self.api.page_size as usize > MAX_BATCH_SIZE {
            return Err(ConfigError::Message(format!(
                "API page_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.api.request_timeout == 0 {
            return Err(ConfigError::Message("API request_timeout must be greater than 0".into()));
        }

        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler interval_secs must be greater than 0".into()));
        }

        if !(self.pricing.default_coefficient.is_finite() && self.pricing.default_coefficient > 0.0) {
            return Err(ConfigError::Message("Pricing default_coefficient must be a positive number".into()));
        }

        if self.images.thumbnail_size == 0 {
            return Err(ConfigError::Message("Image thumbnail_size must be greater than 0".into()));
        }

        if self.images.max_concurrent == 0 {
            return Err(ConfigError::Message("Image max_concurrent must be greater than 0".into()));
        }

        if self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.page_size, 1000);
        assert_eq!(config.pricing.default_coefficient, 0.852);
    }

    #[test]
    fn test_config_validation_invalid_base_url() {
        let mut config = AppConfig::default();
        config.api.base_url = "not-a-valid-url".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid API base URL"));
    }

    #[test]
    fn test_config_validation_page_size_over_limit() {
        let mut config = AppConfig::default();
        config.api.page_size = 1001;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("page_size must be between 1 and 1000"));
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = AppConfig::default();
        config.scheduler.interval_secs = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("interval_secs must be greater than 0"));
    }

    #[test]
    fn test_config_validation_negative_coefficient() {
        let mut config = AppConfig::default();
        config.pricing.default_coefficient = -0.5;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("default_coefficient"));
    }

    #[test]
    fn test_load_from_missing_directory_uses_defaults() {
        let config = AppConfig::load_from("definitely/not/a/config/dir").unwrap();
        assert_eq!(config.api.base_url, "https://api-seller.ozon.ru");
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        assert_eq!(config.api.visibility, Visibility::All);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[scheduler]\ninterval_secs = 300\n\n[api]\npage_size = 500\nvisibility = \"VISIBLE\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.scheduler.interval_secs, 300);
        assert_eq!(config.api.page_size, 500);
        assert_eq!(config.api.visibility, Visibility::Visible);
        // untouched sections keep their defaults
        assert_eq!(config.images.thumbnail_size, 65);
    }
}
