//! Configuration types
//!
//! All fields are required. No defaults.

use crate::{ConfigError, GxCertResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "GXCERT_CONFIG";

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GxCertConfig {
    pub gateway: GatewayConfig,
}

/// Content-addressed storage gateway used to resolve image content ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway root, e.g. `https://ipfs.io`. Content is read from `{base_url}/ipfs/{cid}`.
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Bodies larger than this are treated as unavailable.
    pub max_content_bytes: u64,
    /// Media type used when the gateway sends no `Content-Type`.
    pub fallback_media_type: String,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> GxCertResult<()> {
        let base_url = self.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(invalid(
                "gateway.base_url",
                &self.base_url,
                "must be an http(s) url",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid(
                "gateway.request_timeout_ms",
                &self.request_timeout_ms.to_string(),
                "must be > 0",
            ));
        }
        if self.max_content_bytes == 0 {
            return Err(invalid(
                "gateway.max_content_bytes",
                &self.max_content_bytes.to_string(),
                "must be > 0",
            ));
        }
        if self.fallback_media_type.trim().is_empty() || !self.fallback_media_type.contains('/') {
            return Err(invalid(
                "gateway.fallback_media_type",
                &self.fallback_media_type,
                "must be a type/subtype media type",
            ));
        }
        Ok(())
    }
}

impl GxCertConfig {
    /// Load from the file named by `GXCERT_CONFIG`. Callers with their own
    /// path (a CLI flag, say) go through `from_path`.
    pub fn from_env() -> GxCertResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> GxCertResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> GxCertResult<Self> {
        let config: GxCertConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GxCertResult<()> {
        self.gateway.validate()
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::GxCertError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GxCertError;

    const VALID: &str = r#"
        [gateway]
        base_url = "https://ipfs.infura.io:5001"
        request_timeout_ms = 5000
        max_content_bytes = 1048576
        fallback_media_type = "image/png"
    "#;

    #[test]
    fn test_parses_valid_config() {
        let config = GxCertConfig::from_toml_str(VALID).unwrap();
        assert_eq!(config.gateway.base_url, "https://ipfs.infura.io:5001");
        assert_eq!(config.gateway.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let toml = format!("{}\nretries = 3\n", VALID);
        let err = GxCertConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, GxCertError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_rejects_missing_fields() {
        let err = GxCertConfig::from_toml_str("[gateway]\nbase_url = \"https://x\"\n").unwrap_err();
        assert!(matches!(err, GxCertError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let mut config = GxCertConfig::from_toml_str(VALID).unwrap();
        config.gateway.base_url = "ipfs://local".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gateway.base_url"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = GxCertConfig::from_toml_str(VALID).unwrap();
        config.gateway.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GxCertConfig::from_toml_str(VALID).unwrap();
        config.gateway.max_content_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = GxCertConfig::from_toml_str(VALID).unwrap();
        config.gateway.fallback_media_type = "png".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_reads_named_file_or_reports_missing_path() {
        let path = std::env::temp_dir().join(format!("gxcert-config-{}.toml", std::process::id()));
        std::fs::write(&path, VALID).unwrap();

        std::env::set_var(CONFIG_PATH_VAR, &path);
        let loaded = GxCertConfig::from_env();
        std::env::remove_var(CONFIG_PATH_VAR);
        let missing = GxCertConfig::from_env();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.unwrap(), GxCertConfig::from_toml_str(VALID).unwrap());
        assert!(matches!(
            missing.unwrap_err(),
            GxCertError::Config(ConfigError::MissingConfigPath)
        ));
    }

    #[test]
    fn test_from_path_reports_missing_file() {
        let err = GxCertConfig::from_path(Path::new("/nonexistent/gxcert.toml")).unwrap_err();
        assert!(matches!(err, GxCertError::Config(ConfigError::Read { .. })));
    }
}
