use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KeyhookError, Result};

/// Top-level configuration for the keyhook runtime.
///
/// Loaded from `~/.keyhook/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyhookConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub hook: HookConfig,
}

impl KeyhookConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeyhookConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KeyhookError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Keep the runtime alive after the last capture is released.
    pub persistent: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            persistent: false,
        }
    }
}

/// Defaults for a capture request when the caller leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Option letters, e.g. `"T5 L100 C"`.
    pub options: String,
    /// End keys in `{Name}` / literal-character notation.
    pub end_keys: String,
    /// Comma-delimited match phrases (`,,` is a literal comma).
    pub match_list: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            options: String::new(),
            end_keys: "{Enter}{Escape}".to_string(),
            match_list: String::new(),
        }
    }
}

/// Timeout scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum timer period in milliseconds.
    pub granularity_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { granularity_ms: 10 }
    }
}

/// Keyboard hook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Remove the keyboard hook once no capture needs it.
    pub uninstall_when_idle: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            uninstall_when_idle: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = KeyhookConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.general.persistent);
        assert_eq!(config.capture.options, "");
        assert_eq!(config.capture.end_keys, "{Enter}{Escape}");
        assert_eq!(config.capture.match_list, "");
        assert_eq!(config.scheduler.granularity_ms, 10);
        assert!(config.hook.uninstall_when_idle);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"
persistent = true

[capture]
options = "T2.5 C"
end_keys = "{Tab}."
match_list = "btw,otoh"

[scheduler]
granularity_ms = 25

[hook]
uninstall_when_idle = false
"#;
        let file = create_temp_config(content);
        let config = KeyhookConfig::load(file.path()).unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.persistent);
        assert_eq!(config.capture.options, "T2.5 C");
        assert_eq!(config.capture.end_keys, "{Tab}.");
        assert_eq!(config.capture.match_list, "btw,otoh");
        assert_eq!(config.scheduler.granularity_ms, 25);
        assert!(!config.hook.uninstall_when_idle);
    }

    #[test]
    fn test_partial_section_uses_field_defaults() {
        let content = r#"
[capture]
options = "*"
"#;
        let file = create_temp_config(content);
        let config = KeyhookConfig::load(file.path()).unwrap();

        assert_eq!(config.capture.options, "*");
        assert_eq!(config.capture.end_keys, "{Enter}{Escape}");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.scheduler.granularity_ms, 10);
    }

    #[test]
    fn test_config_load_or_default_missing_file() {
        let config = KeyhookConfig::load_or_default(Path::new("/does/not/exist/config.toml"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.capture.end_keys, "{Enter}{Escape}");
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = KeyhookConfig::load(file.path());
        assert!(matches!(result, Err(KeyhookError::Config(_))));
    }

    #[test]
    fn test_config_load_or_default_invalid_toml() {
        let file = create_temp_config("[scheduler]\ngranularity_ms = \"soon\"");
        let config = KeyhookConfig::load_or_default(file.path());
        assert_eq!(config.scheduler.granularity_ms, 10);
    }

    #[test]
    fn test_config_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("config.toml");

        let mut config = KeyhookConfig::default();
        config.capture.match_list = "yes,,no".to_string();
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = KeyhookConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.log_level, "info");
        assert_eq!(reloaded.capture.match_list, "yes,,no");
    }

    #[test]
    fn test_config_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = KeyhookConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert!(config.hook.uninstall_when_idle);
    }
}
