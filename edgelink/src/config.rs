//! Configuration for the edgelink client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/edgelink/config.toml`)
//! 4. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::controller::LinkConfig;
use crate::signaling::SignalingOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    signaling: SignalingFileConfig,
    link: LinkFileConfig,
    identity: IdentityFileConfig,
}

/// `[signaling]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SignalingFileConfig {
    host: Option<String>,
    port: Option<u16>,
    secure: Option<bool>,
    debug_level: Option<u8>,
}

/// `[link]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LinkFileConfig {
    discovery_pause_ms: Option<u64>,
    dial_timeout_ms: Option<u64>,
    error_backoff_ms: Option<u64>,
    remote_peer: Option<String>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    file: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Signaling --
    /// Hostname of the signaling service.
    pub host: String,
    /// TCP port of the signaling service.
    pub port: u16,
    /// Whether to use a TLS-protected signaling connection.
    pub secure: bool,
    /// Client-side verbosity knob for the signaling implementation.
    pub debug_level: u8,

    // -- Link timing --
    /// Pause between discovery-loop ticks.
    pub discovery_pause: Duration,
    /// Watchdog timeout over a dial attempt.
    pub dial_timeout: Duration,
    /// Pause before restarting after a fatal error.
    pub error_backoff: Duration,

    // -- Identity --
    /// Remote peer preset to dial, if any.
    pub remote_peer: Option<String>,
    /// Path for the identity file; `None` means the default location.
    pub identity_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            secure: false,
            debug_level: 0,
            discovery_pause: Duration::from_secs(3),
            dial_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(3),
            remote_peer: None,
            identity_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. If no `--config` is given, the default path
    /// (`~/.config/edgelink/config.toml`) is tried and silently ignored
    /// if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or
    /// parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli
                .host
                .clone()
                .or_else(|| file.signaling.host.clone())
                .unwrap_or(defaults.host),
            port: cli
                .port
                .or(file.signaling.port)
                .unwrap_or(defaults.port),
            secure: cli
                .secure
                .or(file.signaling.secure)
                .unwrap_or(defaults.secure),
            debug_level: file.signaling.debug_level.unwrap_or(defaults.debug_level),
            discovery_pause: file
                .link
                .discovery_pause_ms
                .map_or(defaults.discovery_pause, Duration::from_millis),
            dial_timeout: file
                .link
                .dial_timeout_ms
                .map_or(defaults.dial_timeout, Duration::from_millis),
            error_backoff: file
                .link
                .error_backoff_ms
                .map_or(defaults.error_backoff, Duration::from_millis),
            remote_peer: cli
                .remote_peer
                .clone()
                .or_else(|| file.link.remote_peer.clone()),
            identity_file: cli
                .identity_file
                .clone()
                .or_else(|| file.identity.file.clone().map(PathBuf::from)),
        }
    }

    /// Build the controller configuration from the resolved settings.
    #[must_use]
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            signaling: SignalingOptions {
                host: self.host.clone(),
                port: self.port,
                secure: self.secure,
                debug_level: self.debug_level,
            },
            discovery_pause: self.discovery_pause,
            dial_timeout: self.dial_timeout,
            error_backoff: self.error_backoff,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Connection lifecycle controller for remote device links")]
pub struct CliArgs {
    /// Hostname of the signaling service.
    #[arg(long, env = "EDGELINK_HOST")]
    pub host: Option<String>,

    /// TCP port of the signaling service.
    #[arg(long, env = "EDGELINK_PORT")]
    pub port: Option<u16>,

    /// Use a TLS-protected signaling connection.
    #[arg(long, env = "EDGELINK_SECURE")]
    pub secure: Option<bool>,

    /// Remote peer identity to dial.
    #[arg(long, env = "EDGELINK_REMOTE_PEER")]
    pub remote_peer: Option<String>,

    /// Path to config file (default: `~/.config/edgelink/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the identity file (default: `~/.config/edgelink/identity.toml`).
    #[arg(long)]
    pub identity_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "EDGELINK_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("edgelink").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
