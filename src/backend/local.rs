//! # Local Pipeline Adapter
//!
//! Serves a session without any persistent backend connection:
//! - **commit**: decode the buffered base64 clip, write it to a temporary `.wav`,
//!   run speech-to-text, emit the transcript as one `text_response` + done.
//! - **text**: run text-to-speech into a temporary `.mp3`, read it back, emit it
//!   base64 encoded as one `audio_response` + done.
//! - **prompt**: echo the prompt as one `text_response` + done (no synthesis).
//!
//! Every operation is single-shot; nothing streams. Temporary files are owned
//! by `tempfile` handles and removed on every exit path, including when the
//! speech program fails.

use super::speech::{SpeechToText, TextToSpeech};
use super::{BackendAdapter, BackendEvent, BackendMode, EventSink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LocalPipelineAdapter {
    speech_to_text: Arc<dyn SpeechToText>,
    text_to_speech: Arc<dyn TextToSpeech>,
    language: String,
    events: Option<EventSink>,
}

impl LocalPipelineAdapter {
    pub fn new(
        speech_to_text: Arc<dyn SpeechToText>,
        text_to_speech: Arc<dyn TextToSpeech>,
        language: String,
    ) -> Self {
        Self {
            speech_to_text,
            text_to_speech,
            language,
            events: None,
        }
    }

    async fn emit(&self, event: BackendEvent) -> Result<()> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| anyhow!("local session has not been started"))?;
        events
            .send(event)
            .await
            .map_err(|_| anyhow!("event channel closed"))
    }

    /// Run speech-to-text over raw audio bytes through a scoped temporary file.
    async fn transcribe(&self, audio: &[u8]) -> String {
        let clip = match tempfile::Builder::new()
            .prefix("relay-input-")
            .suffix(".wav")
            .tempfile()
        {
            Ok(file) => file.into_temp_path(),
            Err(err) => return format!("Transcription error: {}", err),
        };

        let text = match tokio::fs::write(&clip, audio).await {
            Ok(()) => self.speech_to_text.transcribe(&clip, &self.language).await,
            Err(err) => format!("Transcription error: {}", err),
        };

        if let Err(err) = clip.close() {
            warn!("Failed to remove temporary clip: {}", err);
        }
        text
    }

    /// Run text-to-speech into a scoped temporary file and return its bytes.
    async fn synthesize(&self, text: &str) -> Vec<u8> {
        let output = match tempfile::Builder::new()
            .prefix("relay-output-")
            .suffix(".mp3")
            .tempfile()
        {
            Ok(file) => file.into_temp_path(),
            Err(err) => {
                warn!("Could not create synthesis output file: {}", err);
                return Vec::new();
            }
        };

        if let Err(err) = self.text_to_speech.synthesize(text, &output).await {
            warn!("Text-to-speech failed: {:#}", err);
        }

        let audio = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Could not read synthesized audio: {}", err);
                Vec::new()
            }
        };

        if let Err(err) = output.close() {
            warn!("Failed to remove synthesis output: {}", err);
        }
        audio
    }
}

/// Decode a clip made of concatenated base64 fragments.
///
/// Each client fragment is padded on its own, so padding may appear in the
/// middle of the clip. The clip is decoded segment by segment, splitting after
/// every run of `=`. Line breaks and other ASCII whitespace (MIME-wrapped
/// base64) are dropped first.
pub fn decode_clip(clip: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = clip.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let mut audio = Vec::with_capacity(compact.len() / 4 * 3);
    let mut rest = compact.as_str();

    while !rest.is_empty() {
        let end = match rest.find('=') {
            Some(pad) => pad + rest[pad..].bytes().take_while(|b| *b == b'=').count(),
            None => rest.len(),
        };
        STANDARD.decode_vec(&rest[..end], &mut audio)?;
        rest = &rest[end..];
    }

    Ok(audio)
}

#[async_trait]
impl BackendAdapter for LocalPipelineAdapter {
    fn mode(&self) -> BackendMode {
        BackendMode::Local
    }

    async fn begin_session(&mut self, events: EventSink) -> Result<()> {
        self.events = Some(events);
        Ok(())
    }

    async fn submit_audio_chunk(&mut self, _chunk: &str) -> Result<()> {
        // Fragments stay in the session buffer until commit.
        Ok(())
    }

    async fn commit_audio(&mut self, clip: String) -> Result<()> {
        let text = match decode_clip(&clip) {
            Ok(audio) => {
                debug!(bytes = audio.len(), "Transcribing committed clip");
                self.transcribe(&audio).await
            }
            Err(err) => format!("Transcription error: invalid audio payload: {}", err),
        };

        self.emit(BackendEvent::TextDelta(text)).await?;
        self.emit(BackendEvent::TextDone).await
    }

    async fn submit_text(&mut self, text: &str) -> Result<()> {
        let audio = self.synthesize(text).await;
        debug!(bytes = audio.len(), "Synthesized reply");

        self.emit(BackendEvent::AudioDelta(STANDARD.encode(audio))).await?;
        self.emit(BackendEvent::AudioDone).await
    }

    async fn submit_prompt(&mut self, prompt: &str) -> Result<()> {
        self.emit(BackendEvent::TextDelta(prompt.to_string())).await?;
        self.emit(BackendEvent::TextDone).await
    }

    async fn end_session(&mut self) {
        self.events = None;
    }
}
