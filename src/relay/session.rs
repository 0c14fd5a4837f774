//! # Relay Sessions
//!
//! A [`Session`] is everything that belongs to one live client connection: its
//! audio buffer and its backend adapter. Nothing in a session is shared with
//! other sessions.
//!
//! The [`SessionRegistry`] is the only process-wide piece. It records which
//! connections are live (inserted on accept, removed on teardown) and enforces
//! the concurrent session limit.

use crate::backend::{BackendAdapter, BackendMode, EventSink};
use crate::relay::buffer::AudioBuffer;
use crate::relay::envelope::ClientEnvelope;
use crate::stress;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Identity of one accepted client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State owned by one client connection.
pub struct Session {
    id: ConnectionId,
    buffer: AudioBuffer,
    adapter: Box<dyn BackendAdapter>,
}

impl Session {
    pub fn new(id: ConnectionId, adapter: Box<dyn BackendAdapter>) -> Self {
        Self {
            id,
            buffer: AudioBuffer::new(),
            adapter,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn mode(&self) -> BackendMode {
        self.adapter.mode()
    }

    #[cfg(test)]
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub async fn begin(&mut self, events: EventSink) -> Result<()> {
        self.adapter.begin_session(events).await
    }

    /// Apply one client envelope to the buffer and the backend.
    pub async fn handle(&mut self, envelope: ClientEnvelope) -> Result<()> {
        match envelope {
            ClientEnvelope::Audio { audio } => {
                let chunk = audio.unwrap_or_default();
                self.adapter.submit_audio_chunk(&chunk).await?;
                self.buffer.push(chunk);
                debug!(
                    connection_id = %self.id,
                    chunks = self.buffer.len(),
                    encoded_len = self.buffer.encoded_len(),
                    "Audio chunk buffered"
                );
            }
            ClientEnvelope::AudioCommit => {
                let clip = self.buffer.take_concatenated();
                debug!(connection_id = %self.id, encoded_len = clip.len(), "Audio committed");
                self.adapter.commit_audio(clip).await?;
            }
            ClientEnvelope::Text { text } => {
                self.adapter.submit_text(&text.unwrap_or_default()).await?;
            }
            ClientEnvelope::Sensor(metrics) => {
                let score = stress::score(&metrics);
                debug!(connection_id = %self.id, score, "Sensor reading scored");
                self.adapter.submit_prompt(&stress::prompt(score)).await?;
            }
        }
        Ok(())
    }

    /// Release the buffer and the backend. Safe to call on any exit path.
    pub async fn close(&mut self) {
        self.buffer.clear();
        self.adapter.end_session().await;
    }
}

/// Registry entry for a live connection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub mode: BackendMode,
    pub opened_at: DateTime<Utc>,
}

/// Live connections keyed by connection identity.
///
/// Entries are only inserted by the accepting handler and only removed by the
/// connection's own teardown, so a connection never sees another's entry.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionId, SessionEntry>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Record a newly accepted connection.
    ///
    /// ## Returns:
    /// - **Ok(())**: Registered
    /// - **Err(message)**: Limit reached or id already live
    pub fn try_register(&self, id: ConnectionId, mode: BackendMode) -> Result<(), String> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if sessions.len() >= self.max_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_sessions
            ));
        }
        if sessions.contains_key(&id) {
            return Err(format!("Connection '{}' is already registered", id));
        }

        sessions.insert(id, SessionEntry { mode, opened_at: Utc::now() });
        Ok(())
    }

    /// Forget a connection. Returns whether it was registered.
    pub fn release(&self, id: ConnectionId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn snapshot(&self) -> Vec<(ConnectionId, SessionEntry)> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendEvent;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Adapter that records every call it receives.
    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<String>>>);

    struct LoggingAdapter(CallLog);

    #[async_trait]
    impl BackendAdapter for LoggingAdapter {
        fn mode(&self) -> BackendMode {
            BackendMode::Remote
        }
        async fn begin_session(&mut self, _events: EventSink) -> Result<()> {
            self.0 .0.lock().unwrap().push("begin".into());
            Ok(())
        }
        async fn submit_audio_chunk(&mut self, chunk: &str) -> Result<()> {
            self.0 .0.lock().unwrap().push(format!("chunk:{}", chunk));
            Ok(())
        }
        async fn commit_audio(&mut self, clip: String) -> Result<()> {
            self.0 .0.lock().unwrap().push(format!("commit:{}", clip));
            Ok(())
        }
        async fn submit_text(&mut self, text: &str) -> Result<()> {
            self.0 .0.lock().unwrap().push(format!("text:{}", text));
            Ok(())
        }
        async fn submit_prompt(&mut self, prompt: &str) -> Result<()> {
            self.0 .0.lock().unwrap().push(format!("prompt:{}", prompt));
            Ok(())
        }
        async fn end_session(&mut self) {
            self.0 .0.lock().unwrap().push("end".into());
        }
    }

    #[tokio::test]
    async fn test_session_routes_envelopes() {
        let log = CallLog::default();
        let mut session = Session::new(ConnectionId::new(), Box::new(LoggingAdapter(log.clone())));
        let (events, _rx) = tokio::sync::mpsc::channel::<BackendEvent>(4);

        session.begin(events).await.unwrap();
        session.handle(ClientEnvelope::Audio { audio: Some("QQ==".into()) }).await.unwrap();
        session.handle(ClientEnvelope::Audio { audio: None }).await.unwrap();
        session.handle(ClientEnvelope::Audio { audio: Some("Qg==".into()) }).await.unwrap();
        assert_eq!(session.buffer().len(), 3);

        session.handle(ClientEnvelope::AudioCommit).await.unwrap();
        assert!(session.buffer().is_empty());

        session.handle(ClientEnvelope::Text { text: Some("hi".into()) }).await.unwrap();
        session
            .handle(ClientEnvelope::Sensor(stress::SensorMetrics {
                heart_rate: Some(115.0),
                heart_rate_bpm: None,
                rage_probability: Some(50.0),
            }))
            .await
            .unwrap();
        session.close().await;

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "begin",
                "chunk:QQ==",
                "chunk:",
                "chunk:Qg==",
                "commit:QQ==Qg==",
                "text:hi",
                "prompt:Stress 0.70",
                "end",
            ]
        );
    }

    #[test]
    fn test_registry_limits_and_release() {
        let registry = SessionRegistry::new(2);
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        assert!(registry.try_register(first, BackendMode::Local).is_ok());
        assert!(registry.try_register(first, BackendMode::Local).is_err());
        assert!(registry.try_register(second, BackendMode::Local).is_ok());
        assert!(registry.try_register(ConnectionId::new(), BackendMode::Local).is_err());
        assert_eq!(registry.len(), 2);

        assert!(registry.release(first));
        assert!(!registry.release(first));
        assert!(!registry.contains(first));
        assert!(registry.contains(second));
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.try_register(ConnectionId::new(), BackendMode::Local).is_ok());
    }
}
