use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var that overrides `connection.api_token`.
const API_TOKEN_ENV: &str = "RELAY_API_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub pacing: PacingConfig,
    pub reassembly: ReassemblyConfig,
    pub display: DisplayConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base URL of the agent backend, without trailing slash.
    pub base_url: String,
    /// Static bearer token handed to the backend, if it wants one.
    pub api_token: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_token: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Presentation pacing for token text.
///
/// Delay is picked from queue depth: `base_delay_ms` while the queue holds at
/// most `reduced_threshold` items, `reduced_delay_ms` up to
/// `immediate_threshold`, and no delay beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub base_delay_ms: u64,
    pub reduced_delay_ms: u64,
    pub reduced_threshold: usize,
    pub immediate_threshold: usize,
    /// Discard queued text on cancel instead of letting it drain.
    pub hard_cancel: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 12,
            reduced_delay_ms: 4,
            reduced_threshold: 4,
            immediate_threshold: 16,
            hard_cancel: false,
        }
    }
}

impl PacingConfig {
    /// Pacing that forwards every character immediately.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            reduced_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Delay before forwarding the next character, given how many items are
    /// still queued. Never increases as `depth` grows.
    #[must_use]
    pub fn delay_for(&self, depth: usize) -> Duration {
        let ms = if depth > self.immediate_threshold {
            0
        } else if depth > self.reduced_threshold {
            self.reduced_delay_ms.min(self.base_delay_ms)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Longest candidate block (in chars, sentinels included) held back
    /// before it is flushed verbatim.
    pub max_block_chars: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_block_chars: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Max chars of tool input/output shown in the tool log.
    pub tool_preview_chars: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tool_preview_chars: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Increment size used when replaying a recorded stream.
    pub chunk_bytes: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { chunk_bytes: 64 }
    }
}

impl Config {
    /// Default location of the config file.
    #[must_use]
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("relay").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".relay/config.toml"))
    }

    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> crate::error::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };

        if let Ok(token) = std::env::var(API_TOKEN_ENV)
            && !token.is_empty()
        {
            config.connection.api_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.reassembly.max_block_chars == 0 {
            return Err(crate::error::Error::Config(
                "reassembly.max_block_chars must be greater than zero".into(),
            ));
        }
        if self.pacing.immediate_threshold < self.pacing.reduced_threshold {
            return Err(crate::error::Error::Config(
                "pacing.immediate_threshold must be >= pacing.reduced_threshold".into(),
            ));
        }
        if self.replay.chunk_bytes == 0 {
            return Err(crate::error::Error::Config(
                "replay.chunk_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
