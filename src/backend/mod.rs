//! # Backend Adapters
//!
//! A relay session talks to exactly one backend through the [`BackendAdapter`]
//! trait. Two interchangeable variants exist:
//!
//! - **Remote realtime** ([`remote`]): one persistent streaming WebSocket per
//!   session to a hosted conversational-AI service. Responses stream back as deltas.
//! - **Local pipeline** ([`local`]): no persistent connection. Commits run the
//!   buffered clip through a speech-to-text program and text runs through a
//!   text-to-speech program, one shot each.
//!
//! ## Event Flow:
//! Both variants report results through the same [`BackendEvent`] channel that
//! is handed to them in [`BackendAdapter::begin_session`]. The dispatcher
//! drains that channel and turns each event into a client envelope.

pub mod local;
pub mod remote;
pub mod speech;

use crate::config::AppConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use local::LocalPipelineAdapter;
use remote::RemoteRealtimeAdapter;
use speech::{CommandSpeechToText, CommandTextToSpeech, SpeechToText, TextToSpeech};

/// Which backend family serves the sessions of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Remote,
    Local,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Remote => "remote",
            BackendMode::Local => "local",
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform event emitted by any backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    TextDelta(String),
    TextDone,
    /// Base64 encoded audio
    AudioDelta(String),
    AudioDone,
    /// Backend error detail, echoed to the client untouched
    Error(Value),
}

/// Sending half of a session's event channel.
pub type EventSink = mpsc::Sender<BackendEvent>;

/// Uniform operation set every backend supports.
///
/// Methods take `&mut self` because a session drives its adapter from a single
/// task. Returning an error from any operation ends the session.
#[async_trait]
pub trait BackendAdapter: Send {
    fn mode(&self) -> BackendMode;

    /// Acquire backend resources and start emitting into `events`.
    async fn begin_session(&mut self, events: EventSink) -> Result<()>;

    /// Forward one base64 fragment as it arrives.
    async fn submit_audio_chunk(&mut self, chunk: &str) -> Result<()>;

    /// Close the current utterance. `clip` is the ordered concatenation of
    /// every fragment since the previous commit.
    async fn commit_audio(&mut self, clip: String) -> Result<()>;

    async fn submit_text(&mut self, text: &str) -> Result<()>;

    /// Like `submit_text`, for prompts the relay derives itself (stress readings).
    async fn submit_prompt(&mut self, prompt: &str) -> Result<()>;

    /// Release backend resources. Must be safe to call more than once.
    async fn end_session(&mut self);
}

/// Creates one adapter per accepted connection.
///
/// The mode is fixed when the factory is built (at startup, from whether
/// remote credentials are configured).
#[derive(Clone)]
pub struct BackendFactory {
    mode: BackendMode,
    config: Arc<AppConfig>,
    speech_to_text: Arc<dyn SpeechToText>,
    text_to_speech: Arc<dyn TextToSpeech>,
}

impl BackendFactory {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let speech_to_text = Arc::new(CommandSpeechToText::from_config(&config.local));
        let text_to_speech = Arc::new(CommandTextToSpeech::from_config(&config.local));

        Self {
            mode: config.backend_mode(),
            config,
            speech_to_text,
            text_to_speech,
        }
    }

    /// Swap the speech collaborators for in-process fakes.
    #[cfg(test)]
    pub fn with_speech(
        mut self,
        speech_to_text: Arc<dyn SpeechToText>,
        text_to_speech: Arc<dyn TextToSpeech>,
    ) -> Self {
        self.speech_to_text = speech_to_text;
        self.text_to_speech = text_to_speech;
        self
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn create(&self) -> Box<dyn BackendAdapter> {
        match self.mode {
            BackendMode::Remote => {
                let mut remote = self.config.remote.clone();
                remote.api_key = self.config.api_key().map(String::from);
                Box::new(RemoteRealtimeAdapter::new(remote))
            }
            BackendMode::Local => Box::new(LocalPipelineAdapter::new(
                self.speech_to_text.clone(),
                self.text_to_speech.clone(),
                self.config.local.language.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_mode_follows_credentials() {
        let local = BackendFactory::from_config(Arc::new(AppConfig::default()));
        assert_eq!(local.mode(), BackendMode::Local);
        assert_eq!(local.create().mode(), BackendMode::Local);

        let mut config = AppConfig::default();
        config.remote.api_key = Some("sk-test".to_string());
        let remote = BackendFactory::from_config(Arc::new(config));
        assert_eq!(remote.mode(), BackendMode::Remote);
        assert_eq!(remote.create().mode(), BackendMode::Remote);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_value(BackendMode::Local).unwrap(), "local");
        assert_eq!(BackendMode::Remote.to_string(), "remote");
    }
}
