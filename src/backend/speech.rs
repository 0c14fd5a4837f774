//! # Speech Collaborators
//!
//! Speech-to-text and text-to-speech engines used by the local pipeline. The
//! relay only depends on the two traits; the default implementations shell out
//! to configurable programs (for example `whisper-cli` and `edge-tts`).
//!
//! ## Argument Templates:
//! Program arguments may contain placeholders that are substituted per call:
//! - STT: `{input}` (audio file path), `{language}` (BCP-47 tag)
//! - TTS: `{text}`, `{output}` (file to write), `{voice}`
//!
//! ## Failure Reporting:
//! Speech-to-text failures are returned as text (`Transcription error: ...`),
//! not as errors, so a failed recognition still produces a normal response.

use crate::config::LocalConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Recognizes speech in an audio file.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Returns the recognized text, or a description of what went wrong.
    async fn transcribe(&self, audio_path: &Path, language: &str) -> String;
}

/// Synthesizes speech into an audio file.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()>;
}

/// Replace every `{key}` placeholder in each argument.
///
/// Each template is scanned once, so substituted values are never searched
/// for placeholders themselves. Unknown `{...}` runs are kept as written.
fn render_args(templates: &[String], values: &[(&str, &str)]) -> Vec<String> {
    templates
        .iter()
        .map(|template| render_template(template, values))
        .collect()
}

fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

/// Speech-to-text backed by an external program that prints the transcript on stdout.
#[derive(Debug, Clone)]
pub struct CommandSpeechToText {
    program: String,
    args: Vec<String>,
}

impl CommandSpeechToText {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        Self::new(config.stt_program.clone(), config.stt_args.clone())
    }
}

#[async_trait]
impl SpeechToText for CommandSpeechToText {
    async fn transcribe(&self, audio_path: &Path, language: &str) -> String {
        if !audio_path.exists() {
            return "File not found. Please verify the path.".to_string();
        }

        let input = audio_path.to_string_lossy();
        let args = render_args(&self.args, &[("input", &input), ("language", language)]);
        debug!(program = %self.program, ?args, "Running speech-to-text");

        match Command::new(&self.program).args(&args).output().await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(output) => format!(
                "Transcription error: {} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(err) => format!("Transcription error: {}", err),
        }
    }
}

/// Text-to-speech backed by an external program that writes the audio file itself.
#[derive(Debug, Clone)]
pub struct CommandTextToSpeech {
    program: String,
    args: Vec<String>,
    voice: String,
}

impl CommandTextToSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>, voice: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            voice: voice.into(),
        }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        Self::new(config.tts_program.clone(), config.tts_args.clone(), config.voice.clone())
    }
}

#[async_trait]
impl TextToSpeech for CommandTextToSpeech {
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
        let output = output_path.to_string_lossy();
        let args = render_args(
            &self.args,
            &[("text", text), ("output", &output), ("voice", &self.voice)],
        );
        debug!(program = %self.program, chars = text.len(), "Running text-to-speech");

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to start {}", self.program))?;

        if !result.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }

        Ok(())
    }
}
