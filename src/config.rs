//! Configuration management for the voice interaction engine

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default silence timeout before an utterance is considered finished
const DEFAULT_SILENCE_TIMEOUT_SECS: u64 = 8;

/// Default hard cap on a single utterance
const DEFAULT_MAX_UTTERANCE_SECS: u64 = 40;

/// Default activity threshold on the 0-255 energy scale
const DEFAULT_ACTIVITY_THRESHOLD: u8 = 10;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket URL of the streaming endpoint
    pub server_url: String,

    /// HTTP URL of the one-shot text query endpoint
    pub query_url: String,

    /// Audio tuning parameters
    pub audio: AudioConfig,
}

/// Audio capture tuning
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Silence duration that ends an utterance
    pub silence_timeout: Duration,

    /// Unconditional cap on utterance duration
    pub max_utterance: Duration,

    /// Mean frame energy (0-255) at or above which a frame counts as activity
    pub activity_threshold: u8,

    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(DEFAULT_SILENCE_TIMEOUT_SECS),
            max_utterance: Duration::from_secs(DEFAULT_MAX_UTTERANCE_SECS),
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            sample_rate: crate::audio::SAMPLE_RATE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000/ws".to_string(),
            query_url: "http://localhost:8000/text_query".to_string(),
            audio: AudioConfig::default(),
        }
    }
}

/// On-disk configuration file shape (`parlance.toml`)
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    server_url: Option<String>,
    query_url: Option<String>,
    audio: Option<AudioFile>,
}

#[derive(Debug, Default, Deserialize)]
struct AudioFile {
    silence_timeout_secs: Option<u64>,
    max_utterance_secs: Option<u64>,
    activity_threshold: Option<u8>,
    sample_rate: Option<u32>,
}

/// Return the configuration file path (`~/.config/parlance/parlance.toml` on Linux)
#[must_use]
pub fn config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "parlance", "parlance").map_or_else(
        || PathBuf::from("parlance.toml"),
        |d| d.config_dir().join("parlance.toml"),
    )
}

impl Config {
    /// Load configuration: defaults, overridden by the config file, overridden by env
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed, or if a
    /// resulting URL is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit file path
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns error on unparseable TOML or invalid URLs.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<ConfigFile>(&raw)?
        } else {
            ConfigFile::default()
        };

        let defaults = Self::default();
        let audio_file = file.audio.unwrap_or_default();

        let config = Self {
            server_url: std::env::var("PARLANCE_SERVER_URL")
                .ok()
                .or(file.server_url)
                .unwrap_or(defaults.server_url),
            query_url: std::env::var("PARLANCE_QUERY_URL")
                .ok()
                .or(file.query_url)
                .unwrap_or(defaults.query_url),
            audio: AudioConfig {
                silence_timeout: Duration::from_secs(
                    audio_file
                        .silence_timeout_secs
                        .unwrap_or(DEFAULT_SILENCE_TIMEOUT_SECS),
                ),
                max_utterance: Duration::from_secs(
                    audio_file
                        .max_utterance_secs
                        .unwrap_or(DEFAULT_MAX_UTTERANCE_SECS),
                ),
                activity_threshold: audio_file
                    .activity_threshold
                    .unwrap_or(DEFAULT_ACTIVITY_THRESHOLD),
                sample_rate: audio_file.sample_rate.unwrap_or(crate::audio::SAMPLE_RATE),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check URL schemes and timing relationships
    ///
    /// # Errors
    ///
    /// Returns error when a URL has the wrong scheme or the silence
    /// timeout is not shorter than the utterance cap.
    pub fn validate(&self) -> Result<()> {
        let ws = url::Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid server_url: {e}")))?;
        if ws.scheme() != "ws" && ws.scheme() != "wss" {
            return Err(Error::Config(format!(
                "server_url must be ws:// or wss://, got {}",
                ws.scheme()
            )));
        }

        let http = url::Url::parse(&self.query_url)
            .map_err(|e| Error::Config(format!("invalid query_url: {e}")))?;
        if http.scheme() != "http" && http.scheme() != "https" {
            return Err(Error::Config(format!(
                "query_url must be http:// or https://, got {}",
                http.scheme()
            )));
        }

        if self.audio.silence_timeout >= self.audio.max_utterance {
            return Err(Error::Config(
                "silence_timeout_secs must be shorter than max_utterance_secs".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let config = Config::default();
        assert_eq!(config.audio.silence_timeout, Duration::from_secs(8));
        assert_eq!(config.audio.max_utterance, Duration::from_secs(40));
        assert_eq!(config.audio.activity_threshold, 10);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(std::path::Path::new("/nonexistent/parlance.toml"))
            .expect("defaults should load");
        assert_eq!(config.server_url, "ws://localhost:8000/ws");
    }

    #[test]
    fn rejects_http_scheme_for_stream() {
        let config = Config {
            server_url: "http://localhost:8000/ws".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_silence_timeout_beyond_cap() {
        let config = Config {
            audio: AudioConfig {
                silence_timeout: Duration::from_secs(50),
                ..AudioConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
