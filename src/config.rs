//! # Configuration Management
//!
//! Loads the relay configuration from layered sources:
//! - Default values (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables with the `APP_` prefix, `__` between levels
//!   (e.g. `APP_REMOTE__VOICE=verse`, `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=8`)
//! - Deployment shortcuts: `HOST`, `PORT` and `OPENAI_API_KEY`
//!
//! ## Backend Mode:
//! The process runs every session against the remote realtime service when an
//! API key is configured, and against the local speech pipeline otherwise. The
//! decision is made once at startup.

use crate::backend::BackendMode;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Complete relay configuration.
///
/// ## Rust Concepts:
/// - **Serialize + Deserialize**: The `config` crate deserializes the merged
///   sources straight into this struct, and the defaults are fed back in as a
///   serialized source
/// - **Clone**: `main` keeps a copy for logging after handing one to `AppState`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote realtime conversational-AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bearer credential. Absent or blank selects the local pipeline.
    pub api_key: Option<String>,

    /// WebSocket endpoint, without the `model` query parameter
    pub url: String,

    pub model: String,

    /// Voice profile declared when the backend session is initialized
    pub voice: String,

    /// Longest silence tolerated while a requested response is outstanding.
    /// A session with nothing outstanding may stay idle indefinitely.
    pub event_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            voice: "alloy".to_string(),
            event_timeout_secs: 300,
        }
    }
}

/// Local speech-to-text / text-to-speech programs.
///
/// See [`crate::backend::speech`] for the argument placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Language tag passed to speech-to-text
    pub language: String,
    pub stt_program: String,
    pub stt_args: Vec<String>,
    pub tts_program: String,
    pub tts_args: Vec<String>,
    /// Voice passed to text-to-speech
    pub voice: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let args = |list: &[&str]| list.iter().map(|arg| arg.to_string()).collect();
        Self {
            language: "en-US".to_string(),
            stt_program: "whisper-cli".to_string(),
            stt_args: args(&["--language", "{language}", "--no-timestamps", "--no-prints", "--file", "{input}"]),
            tts_program: "edge-tts".to_string(),
            tts_args: args(&["--voice", "{voice}", "--text", "{text}", "--write-media", "{output}"]),
            voice: "en-US-AriaNeural".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Upper bound on live relay sessions; further upgrades get 503
    pub max_concurrent_sessions: usize,

    /// Capacity of each session's backend event channel
    pub event_channel_capacity: usize,

    /// How often the relay pings the client
    pub heartbeat_interval_secs: u64,

    /// Client silence (no frames, no pongs) after which the connection is dropped
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8081,
            },
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
            performance: PerformanceConfig {
                max_concurrent_sessions: 64,
                event_channel_capacity: 256,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("remote.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let invalid = |message: &str| Err(AppError::ValidationError(message.to_string()));

        if self.server.port == 0 {
            return invalid("Server port cannot be 0");
        }
        if self.performance.max_concurrent_sessions == 0 {
            return invalid("Max concurrent sessions must be greater than 0");
        }
        // A local operation queues two events before the dispatcher drains them.
        if self.performance.event_channel_capacity < 2 {
            return invalid("Event channel capacity must be at least 2");
        }
        if self.performance.heartbeat_interval_secs == 0 || self.performance.client_timeout_secs == 0 {
            return invalid("Heartbeat interval and client timeout must be greater than 0");
        }
        if self.performance.heartbeat_interval_secs >= self.performance.client_timeout_secs {
            return invalid("Heartbeat interval must be shorter than the client timeout");
        }
        if self.remote.event_timeout_secs == 0 {
            return invalid("Remote event timeout must be greater than 0");
        }
        if self.local.stt_program.trim().is_empty() || self.local.tts_program.trim().is_empty() {
            return invalid("Speech-to-text and text-to-speech programs must be set");
        }

        Ok(())
    }

    /// Remote credentials, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        self.remote
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn backend_mode(&self) -> BackendMode {
        if self.api_key().is_some() {
            BackendMode::Remote
        } else {
            BackendMode::Local
        }
    }
}
