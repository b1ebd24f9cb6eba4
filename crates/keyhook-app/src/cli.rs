//! CLI argument definitions for the keyhook binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use keyhook_core::config::KeyhookConfig;

/// keyhook - capture typed text until an end key, a match phrase, a limit or
/// a timeout.
#[derive(Parser, Debug)]
#[command(name = "keyhook", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Option letters, e.g. "T5 L20 C".
    #[arg(short = 'o', long = "options")]
    pub options: Option<String>,

    /// End keys, e.g. "{Enter}{Escape}.".
    #[arg(short = 'e', long = "end-keys")]
    pub end_keys: Option<String>,

    /// Comma-separated match phrases; ",," is a literal comma.
    #[arg(short = 'm', long = "match-list")]
    pub match_list: Option<String>,

    /// Keystroke script to feed. Read from stdin when omitted.
    #[arg(short = 'f', long = "feed")]
    pub feed: Option<String>,

    /// Delay between simulated keystrokes, in milliseconds.
    #[arg(long = "delay-ms", default_value_t = 0)]
    pub delay_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Print the end report as JSON.
    #[arg(long = "json")]
    pub json: bool,
}

/// Setup strings after applying config defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArgs {
    pub options: String,
    pub end_keys: String,
    pub match_list: String,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > KEYHOOK_CONFIG env var > ~/.keyhook/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("KEYHOOK_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &KeyhookConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }

    pub fn resolve_capture(&self, config: &KeyhookConfig) -> CaptureArgs {
        let pick = |flag: &Option<String>, fallback: &String| flag.clone().unwrap_or_else(|| fallback.clone());
        CaptureArgs {
            options: pick(&self.options, &config.capture.options),
            end_keys: pick(&self.end_keys, &config.capture.end_keys),
            match_list: pick(&self.match_list, &config.capture.match_list),
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".keyhook").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".keyhook").join("config.toml");
    }
    PathBuf::from("config.toml")
}
