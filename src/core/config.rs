//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional config file
//! (YAML, JSON or TOML, picked by extension), then `EPUB_MT_*` environment
//! variables. Nested keys use `__`, e.g. `EPUB_MT_MODEL__TARGET_LANG=eng_Latn`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::errors::{Result, TranslationError};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "EPUB_MT";

/// Upper bound for `client.max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Compute device for inference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// GPU when the build and the host support it, otherwise CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// Whole application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub client: ClientConfig,
    pub extract: ExtractConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Pretrained model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Name reported by `/health`
    pub name: String,
    /// Directory holding `encoder_model.onnx`, `decoder_model.onnx` and `tokenizer.json`
    pub model_dir: PathBuf,
    pub source_lang: String,
    pub target_lang: String,
    /// Source tokens kept before truncation, language code and `</s>` included
    pub max_input_tokens: usize,
    pub max_new_tokens: usize,
    pub device: Device,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "facebook/nllb-200-distilled-600M".to_string(),
            model_dir: PathBuf::from("models/nllb-200-distilled-600M"),
            source_lang: "jpn_Jpan".to_string(),
            target_lang: "vie_Latn".to_string(),
            max_input_tokens: 512,
            max_new_tokens: 512,
            device: Device::Auto,
        }
    }
}

/// EPUB extraction settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Images whose declared width is smaller are treated as decoration
    pub min_image_width: u32,
    /// Images whose declared height is smaller are treated as decoration
    pub min_image_height: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_image_width: 128,
            min_image_height: 128,
        }
    }
}

/// Settings for the batch client talking to a running server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL, without the `/translate` suffix
    pub endpoint: String,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".to_string(),
            max_concurrent: 5,
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_ms: 30000,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(TranslationError::FileError {
                    path: path.display().to_string(),
                    message: "Config file not found".to_string(),
                });
            }
            info!("Loading config file: {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        debug!("Effective config: {:?}", config);
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.client.validate()?;
        Ok(())
    }
}

impl ModelConfig {
    /// Validate model settings
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(config_error("model.name is required"));
        }

        if self.model_dir.as_os_str().is_empty() {
            return Err(config_error("model.model_dir is required"));
        }

        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(config_error("model.source_lang and model.target_lang are required"));
        }

        // Language code plus `</s>` need two slots
        if self.max_input_tokens < 3 {
            return Err(config_error("model.max_input_tokens must be at least 3"));
        }

        if self.max_new_tokens == 0 {
            return Err(config_error("model.max_new_tokens must be greater than 0"));
        }

        Ok(())
    }
}

impl ClientConfig {
    /// Validate client settings
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(config_error("client.endpoint is required"));
        }

        if self.max_concurrent == 0 {
            return Err(config_error("client.max_concurrent must be greater than 0"));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(TranslationError::ConfigError {
                message: format!("client.max_retries must be at most {}", MAX_RETRIES_LIMIT),
            });
        }

        Ok(())
    }

    /// Full URL of a route on the configured server
    pub fn url(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }
}

fn config_error(message: &str) -> TranslationError {
    TranslationError::ConfigError {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.model.device, Device::Auto);
    }

    #[test]
    fn test_config_validation_empty_language() {
        let mut config = AppConfig::default();
        config.model.target_lang = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_concurrency() {
        let config = AppConfig {
            client: ClientConfig {
                max_concurrent: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_caps_retries() {
        let mut client = ClientConfig::default();
        client.max_retries = MAX_RETRIES_LIMIT;
        assert!(client.validate().is_ok());

        client.max_retries = 64;
        assert!(matches!(client.validate(), Err(TranslationError::ConfigError { .. })));
    }

    #[test]
    fn test_extract_config_partial_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "extract:\n  min_image_width: 64").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.extract.min_image_width, 64);
        assert_eq!(config.extract.min_image_height, 128);
    }

    #[test]
    fn test_load_from_yaml_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 8080\nmodel:\n  target_lang: eng_Latn\n  device: cpu"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.target_lang, "eng_Latn");
        assert_eq!(config.model.source_lang, "jpn_Jpan");
        assert_eq!(config.model.device, Device::Cpu);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/epub-mt.yaml")));
        assert!(matches!(result, Err(TranslationError::FileError { .. })));
    }

    #[test]
    fn test_yaml_dump_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = AppConfig::default();
        config.client.max_retries = 7;
        config.to_file(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.client.max_retries, 7);
    }

    #[test]
    fn test_client_url_joins_route() {
        let client = ClientConfig {
            endpoint: "https://example.ngrok-free.app/".to_string(),
            ..Default::default()
        };
        assert_eq!(client.url("/translate"), "https://example.ngrok-free.app/translate");
        assert_eq!(client.url("health"), "https://example.ngrok-free.app/health");
    }
}
