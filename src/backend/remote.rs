//! # Remote Realtime Adapter
//!
//! Owns one persistent WebSocket per session to a hosted realtime
//! conversational-AI service and translates between the relay's uniform
//! operations and the service's JSON events.
//!
//! ## Tasks:
//! - The session task writes to the connection (`sink`) through the adapter methods.
//! - A drain task reads the connection (`stream`), translates each event and
//!   pushes it into the session's event channel.
//!
//! When the drain task ends it drops its event sender, which the dispatcher
//! sees as the end of the session. That happens when the backend closes, when a
//! read fails, or when a requested response stalls for longer than
//! `event_timeout_secs`. A connection with nothing outstanding may stay quiet
//! indefinitely. `end_session` aborts the drain task and closes the socket,
//! waiting at most a few seconds for the close to go through.
//!
//! ## Wire Messages:
//! | Operation | Messages sent |
//! |-----------|---------------|
//! | begin     | `session.update` |
//! | audio     | `input_audio_buffer.append` |
//! | commit    | `input_audio_buffer.commit`, `response.create` |
//! | text      | `conversation.item.create`, `response.create` |
//! | prompt    | `conversation.item.create`, `response.create` (audio only) |

use super::{BackendAdapter, BackendEvent, BackendMode, EventSink};
use crate::config::RemoteConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const AUDIO_AND_TEXT: &[&str] = &["audio", "text"];
const AUDIO_ONLY: &[&str] = &["audio"];
const SESSION_MODALITIES: &[&str] = &["text", "audio"];
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent to the realtime service.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RealtimeCommand<'a> {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings<'a> },

    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: &'a str },

    #[serde(rename = "input_audio_buffer.commit")]
    CommitAudio,

    #[serde(rename = "conversation.item.create")]
    CreateItem { item: ConversationItem<'a> },

    #[serde(rename = "response.create")]
    CreateResponse { response: ResponseSettings },
}

#[derive(Debug, Serialize)]
struct SessionSettings<'a> {
    modalities: &'static [&'static str],
    voice: &'a str,
}

#[derive(Debug, Serialize)]
struct ConversationItem<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    role: &'static str,
    content: [InputContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct InputContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseSettings {
    modalities: &'static [&'static str],
}

impl<'a> RealtimeCommand<'a> {
    fn user_message(text: &'a str) -> Self {
        RealtimeCommand::CreateItem {
            item: ConversationItem {
                kind: "message",
                role: "user",
                content: [InputContent { kind: "input_text", text }],
            },
        }
    }

    fn respond(modalities: &'static [&'static str]) -> Self {
        RealtimeCommand::CreateResponse {
            response: ResponseSettings { modalities },
        }
    }
}

/// The subset of service events the relay inspects.
#[derive(Debug, Deserialize)]
struct RealtimeEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl RealtimeEvent {
    /// Whether this event ends the response the relay is waiting for.
    fn finishes_response(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "response.done" | "response.audio.done" | "response.text.done" | "error"
        )
    }

    /// Translate into a uniform backend event.
    ///
    /// Returns `None` for events the relay does not forward.
    fn into_backend_event(self) -> Option<BackendEvent> {
        match self.kind.as_str() {
            "response.audio.delta" => {
                // Current service versions send the base64 string directly; older
                // ones wrapped it as {"audio": "..."}.
                let audio = match self.delta? {
                    Value::String(audio) => audio,
                    Value::Object(mut fields) => match fields.remove("audio") {
                        Some(Value::String(audio)) => audio,
                        _ => return None,
                    },
                    _ => return None,
                };
                (!audio.is_empty()).then_some(BackendEvent::AudioDelta(audio))
            }
            "response.audio.done" => Some(BackendEvent::AudioDone),
            "response.text.delta" => {
                let text = match self.delta {
                    Some(Value::String(text)) => text,
                    _ => String::new(),
                };
                Some(BackendEvent::TextDelta(text))
            }
            "response.text.done" => Some(BackendEvent::TextDone),
            "error" => Some(BackendEvent::Error(
                self.error.unwrap_or_else(|| Value::Object(Default::default())),
            )),
            _ => None,
        }
    }
}

/// One session's connection to the hosted realtime service.
///
/// ## Fields:
/// - **sink**: Write half of the socket, used by every adapter method
/// - **drain**: The task reading the other half
/// - **requested**: Tells the drain task a response was just asked for, which
///   arms its stall timer
pub struct RemoteRealtimeAdapter {
    config: RemoteConfig,
    sink: Option<SplitSink<RealtimeSocket, Message>>,
    drain: Option<JoinHandle<()>>,
    requested: Option<watch::Sender<Instant>>,
}

impl RemoteRealtimeAdapter {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            sink: None,
            drain: None,
            requested: None,
        }
    }

    fn endpoint(&self) -> String {
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.config.url, separator, self.config.model)
    }

    async fn connect(&self) -> Result<RealtimeSocket> {
        let endpoint = self.endpoint();
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid realtime endpoint {}", endpoint))?;

        if let Some(key) = self.config.api_key.as_deref() {
            let headers = request.headers_mut();
            headers.insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .context("API key is not a valid header value")?,
            );
            headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .with_context(|| format!("failed to connect to {}", self.config.url))?;
        Ok(socket)
    }

    async fn send(&mut self, command: RealtimeCommand<'_>) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| anyhow!("realtime session is not open"))?;
        let payload = serde_json::to_string(&command)?;
        sink.send(Message::Text(payload))
            .await
            .context("realtime backend connection lost")
    }

    /// Ask the service for a response with the given modalities.
    ///
    /// The drain task is told before `response.create` goes out, so the reply
    /// can never reach it ahead of the notice.
    async fn request_response(&mut self, modalities: &'static [&'static str]) -> Result<()> {
        if let Some(requested) = &self.requested {
            requested.send_replace(Instant::now());
        }
        self.send(RealtimeCommand::respond(modalities)).await
    }
}

/// Close the write half, giving up after `limit`.
///
/// A stalled service may never let the close frame through; teardown must not
/// wait on it.
async fn close_within<S>(sink: &mut S, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(limit, sink.close()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("Realtime backend close failed: {}", err);
            false
        }
        Err(_) => {
            warn!("Realtime backend did not accept close within {:?}", limit);
            false
        }
    }
}

/// Read backend events until the connection ends or the session stops
/// listening.
///
/// ## Stall Detection:
/// A quiet connection is healthy while nothing has been asked of it. Only
/// after `request_response` does a deadline run: every frame pushes it back by
/// `stall_timeout`, and a frame that finishes the response disarms it. If the
/// deadline passes first the service is treated as stalled and the drain ends.
async fn drain_events(
    mut stream: SplitStream<RealtimeSocket>,
    events: EventSink,
    mut requested: watch::Receiver<Instant>,
    stall_timeout: Duration,
) {
    let mut awaiting = false;
    let mut deadline = Instant::now();

    loop {
        let next = tokio::select! {
            biased;

            changed = requested.changed() => {
                if changed.is_err() {
                    break;
                }
                awaiting = true;
                deadline = *requested.borrow_and_update() + stall_timeout;
                continue;
            }
            _ = tokio::time::sleep_until(deadline), if awaiting => {
                warn!("No realtime backend response for {:?}, ending session", stall_timeout);
                break;
            }
            next = stream.next() => next,
        };

        let frame = match next {
            None => {
                info!("Realtime backend stream ended");
                break;
            }
            Some(Err(err)) => {
                warn!("Realtime backend read failed: {}", err);
                break;
            }
            Some(Ok(frame)) => frame,
        };
        if awaiting {
            deadline = Instant::now() + stall_timeout;
        }

        match frame {
            Message::Text(raw) => {
                let Ok(event) = serde_json::from_str::<RealtimeEvent>(&raw) else {
                    continue;
                };
                if event.finishes_response() {
                    awaiting = false;
                }
                let Some(event) = event.into_backend_event() else {
                    continue;
                };
                if let BackendEvent::Error(detail) = &event {
                    warn!(%detail, "Realtime backend reported an error");
                }
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Message::Close(reason) => {
                info!(?reason, "Realtime backend closed the connection");
                break;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl BackendAdapter for RemoteRealtimeAdapter {
    fn mode(&self) -> BackendMode {
        BackendMode::Remote
    }

    async fn begin_session(&mut self, events: EventSink) -> Result<()> {
        let socket = self.connect().await?;
        let (sink, stream) = socket.split();
        self.sink = Some(sink);

        let voice = self.config.voice.clone();
        self.send(RealtimeCommand::SessionUpdate {
            session: SessionSettings {
                modalities: SESSION_MODALITIES,
                voice: &voice,
            },
        })
        .await?;

        let (requested, requests) = watch::channel(Instant::now());
        self.requested = Some(requested);
        let stall_timeout = Duration::from_secs(self.config.event_timeout_secs);
        self.drain = Some(tokio::spawn(drain_events(stream, events, requests, stall_timeout)));

        info!(url = %self.config.url, model = %self.config.model, "Realtime backend session opened");
        Ok(())
    }

    async fn submit_audio_chunk(&mut self, chunk: &str) -> Result<()> {
        self.send(RealtimeCommand::AppendAudio { audio: chunk }).await
    }

    async fn commit_audio(&mut self, clip: String) -> Result<()> {
        debug!(encoded_len = clip.len(), "Committing streamed audio");
        self.send(RealtimeCommand::CommitAudio).await?;
        self.request_response(AUDIO_AND_TEXT).await
    }

    async fn submit_text(&mut self, text: &str) -> Result<()> {
        self.send(RealtimeCommand::user_message(text)).await?;
        self.request_response(AUDIO_AND_TEXT).await
    }

    async fn submit_prompt(&mut self, prompt: &str) -> Result<()> {
        self.send(RealtimeCommand::user_message(prompt)).await?;
        self.request_response(AUDIO_ONLY).await
    }

    async fn end_session(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        self.requested = None;
        if let Some(mut sink) = self.sink.take() {
            close_within(&mut sink, CLOSE_TIMEOUT).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn command_json(command: RealtimeCommand<'_>) -> Value {
        serde_json::to_value(command).unwrap()
    }

    fn translate_event(raw: &str) -> Option<BackendEvent> {
        serde_json::from_str::<RealtimeEvent>(raw).ok()?.into_backend_event()
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(
            command_json(RealtimeCommand::SessionUpdate {
                session: SessionSettings { modalities: SESSION_MODALITIES, voice: "alloy" },
            }),
            json!({"type": "session.update", "session": {"modalities": ["text", "audio"], "voice": "alloy"}})
        );
        assert_eq!(
            command_json(RealtimeCommand::AppendAudio { audio: "QQ==" }),
            json!({"type": "input_audio_buffer.append", "audio": "QQ=="})
        );
        assert_eq!(
            command_json(RealtimeCommand::CommitAudio),
            json!({"type": "input_audio_buffer.commit"})
        );
        assert_eq!(
            command_json(RealtimeCommand::user_message("hello")),
            json!({"type": "conversation.item.create", "item": {
                "type": "message", "role": "user",
                "content": [{"type": "input_text", "text": "hello"}]
            }})
        );
        assert_eq!(
            command_json(RealtimeCommand::respond(AUDIO_ONLY)),
            json!({"type": "response.create", "response": {"modalities": ["audio"]}})
        );
    }

    #[test]
    fn test_translate_events() {
        assert_eq!(
            translate_event(r#"{"type":"response.audio.delta","delta":"AAAA"}"#),
            Some(BackendEvent::AudioDelta("AAAA".into()))
        );
        assert_eq!(
            translate_event(r#"{"type":"response.audio.delta","delta":{"audio":"BBBB"}}"#),
            Some(BackendEvent::AudioDelta("BBBB".into()))
        );
        assert_eq!(translate_event(r#"{"type":"response.audio.delta","delta":""}"#), None);
        assert_eq!(
            translate_event(r#"{"type":"response.audio.done"}"#),
            Some(BackendEvent::AudioDone)
        );
        assert_eq!(
            translate_event(r#"{"type":"response.text.delta","delta":"Hel"}"#),
            Some(BackendEvent::TextDelta("Hel".into()))
        );
        assert_eq!(
            translate_event(r#"{"type":"response.text.done","text":"Hello"}"#),
            Some(BackendEvent::TextDone)
        );
        assert_eq!(
            translate_event(r#"{"type":"error","error":{"code":"invalid_value"}}"#),
            Some(BackendEvent::Error(json!({"code": "invalid_value"})))
        );
        assert_eq!(translate_event(r#"{"type":"session.created"}"#), None);
        assert_eq!(translate_event("garbage"), None);
    }

    #[test]
    fn test_endpoint_appends_model() {
        let mut config = RemoteConfig::default();
        config.url = "wss://example.test/v1/realtime".into();
        config.model = "rt-model".into();
        assert_eq!(
            RemoteRealtimeAdapter::new(config.clone()).endpoint(),
            "wss://example.test/v1/realtime?model=rt-model"
        );

        config.url = "wss://example.test/v1/realtime?region=eu".into();
        assert_eq!(
            RemoteRealtimeAdapter::new(config).endpoint(),
            "wss://example.test/v1/realtime?region=eu&model=rt-model"
        );
    }

    #[test]
    fn test_finishing_events() {
        let finishes = |raw: &str| serde_json::from_str::<RealtimeEvent>(raw).unwrap().finishes_response();

        assert!(finishes(r#"{"type":"response.done"}"#));
        assert!(finishes(r#"{"type":"response.audio.done"}"#));
        assert!(finishes(r#"{"type":"response.text.done"}"#));
        assert!(finishes(r#"{"type":"error","error":{}}"#));
        assert!(!finishes(r#"{"type":"response.audio.delta","delta":"AAAA"}"#));
        assert!(!finishes(r#"{"type":"session.updated"}"#));
    }

    /// What the fake service observed from the relay.
    #[derive(Debug)]
    enum Seen {
        Frame(Value),
        Closed,
    }

    /// How the fake service answers `response.create`.
    struct Script {
        reply: Vec<Value>,
        hang_up_after_reply: bool,
    }

    impl Script {
        fn silent() -> Self {
            Self { reply: Vec::new(), hang_up_after_reply: false }
        }
    }

    /// Starts a one-connection fake realtime service. Every text frame it
    /// receives is forwarded to the returned channel, followed by `Closed` once
    /// the relay closes or drops the connection.
    async fn fake_service(script: Script) -> (String, mpsc::UnboundedReceiver<Seen>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();

            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(raw))) => {
                        let frame: Value = serde_json::from_str(&raw).unwrap();
                        let wants_reply = frame["type"] == "response.create";
                        let _ = seen_tx.send(Seen::Frame(frame));
                        if !wants_reply {
                            continue;
                        }
                        for event in &script.reply {
                            socket.send(Message::Text(event.to_string())).await.unwrap();
                        }
                        if script.hang_up_after_reply {
                            let _ = socket.close(None).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        let _ = seen_tx.send(Seen::Closed);
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        });

        (url, seen_rx)
    }

    async fn next_frame(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Value {
        match seen.recv().await {
            Some(Seen::Frame(frame)) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    fn remote_config(url: String) -> RemoteConfig {
        let mut config = RemoteConfig::default();
        config.url = url;
        config.api_key = Some("sk-test".into());
        config
    }

    #[tokio::test]
    async fn test_round_trip_against_fake_service() {
        let (url, mut seen) = fake_service(Script {
            reply: vec![
                json!({"type": "response.text.delta", "delta": "Hi"}),
                json!({"type": "rate_limits.updated"}),
                json!({"type": "response.text.done"}),
                json!({"type": "error", "error": {"message": "slow down"}}),
            ],
            hang_up_after_reply: true,
        })
        .await;

        let mut adapter = RemoteRealtimeAdapter::new(remote_config(url));
        let (events_tx, mut events) = mpsc::channel(16);
        adapter.begin_session(events_tx).await.unwrap();
        adapter.submit_audio_chunk("QQ==").await.unwrap();
        adapter.commit_audio("QQ==".into()).await.unwrap();

        assert_eq!(next_frame(&mut seen).await["type"], "session.update");
        assert_eq!(
            next_frame(&mut seen).await,
            json!({"type": "input_audio_buffer.append", "audio": "QQ=="})
        );
        assert_eq!(next_frame(&mut seen).await["type"], "input_audio_buffer.commit");
        assert_eq!(
            next_frame(&mut seen).await,
            json!({"type": "response.create", "response": {"modalities": ["audio", "text"]}})
        );

        assert_eq!(events.recv().await, Some(BackendEvent::TextDelta("Hi".into())));
        assert_eq!(events.recv().await, Some(BackendEvent::TextDone));
        assert_eq!(
            events.recv().await,
            Some(BackendEvent::Error(json!({"message": "slow down"})))
        );
        // Backend closed: the drain task drops its sender.
        assert_eq!(events.recv().await, None);

        adapter.end_session().await;
        adapter.end_session().await;
    }

    #[tokio::test]
    async fn test_text_and_prompt_request_their_modalities() {
        let (url, mut seen) = fake_service(Script {
            reply: vec![
                json!({"type": "response.audio.delta", "delta": "AAAA"}),
                json!({"type": "response.audio.done"}),
            ],
            hang_up_after_reply: false,
        })
        .await;

        let mut adapter = RemoteRealtimeAdapter::new(remote_config(url));
        let (events_tx, mut events) = mpsc::channel(16);
        adapter.begin_session(events_tx).await.unwrap();
        assert_eq!(next_frame(&mut seen).await["type"], "session.update");

        adapter.submit_text("hello").await.unwrap();
        assert_eq!(
            next_frame(&mut seen).await,
            json!({"type": "conversation.item.create", "item": {
                "type": "message", "role": "user",
                "content": [{"type": "input_text", "text": "hello"}]
            }})
        );
        assert_eq!(
            next_frame(&mut seen).await,
            json!({"type": "response.create", "response": {"modalities": ["audio", "text"]}})
        );
        assert_eq!(events.recv().await, Some(BackendEvent::AudioDelta("AAAA".into())));
        assert_eq!(events.recv().await, Some(BackendEvent::AudioDone));

        adapter.submit_prompt("Stress 0.70").await.unwrap();
        assert_eq!(
            next_frame(&mut seen).await["item"]["content"][0]["text"],
            "Stress 0.70"
        );
        assert_eq!(
            next_frame(&mut seen).await,
            json!({"type": "response.create", "response": {"modalities": ["audio"]}})
        );
        assert_eq!(events.recv().await, Some(BackendEvent::AudioDelta("AAAA".into())));
        assert_eq!(events.recv().await, Some(BackendEvent::AudioDone));

        adapter.end_session().await;
        assert!(matches!(seen.recv().await, Some(Seen::Closed)));
    }

    #[tokio::test]
    async fn test_quiet_session_outlives_event_timeout() {
        let (url, mut seen) = fake_service(Script::silent()).await;
        let mut config = remote_config(url);
        config.event_timeout_secs = 1;

        let mut adapter = RemoteRealtimeAdapter::new(config);
        let (events_tx, mut events) = mpsc::channel(16);
        adapter.begin_session(events_tx).await.unwrap();

        // Nothing asked, nothing owed: the drain keeps listening.
        let quiet = tokio::time::timeout(Duration::from_millis(2500), events.recv()).await;
        assert!(quiet.is_err(), "session ended while idle: {:?}", quiet);

        // An unanswered request is a stall and ends the session.
        adapter.submit_text("anyone there?").await.unwrap();
        let stalled = tokio::time::timeout(Duration::from_secs(3), events.recv()).await;
        assert_eq!(stalled.unwrap(), None);

        adapter.end_session().await;
        assert_eq!(next_frame(&mut seen).await["type"], "session.update");
    }

    /// Write half whose close never completes.
    struct StuckSink;

    impl Sink<Message> for StuckSink {
        type Error = io::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, _: Message) -> io::Result<()> {
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_gives_up_on_a_stuck_backend() {
        let started = std::time::Instant::now();
        assert!(!close_within(&mut StuckSink, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(2));

        let mut drained = futures_util::sink::drain::<Message>();
        assert!(close_within(&mut drained, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_client_disconnect_closes_backend() {
        use crate::relay::dispatcher::{Dispatcher, SessionEnd};
        use crate::relay::session::SessionRegistry;
        use crate::state::{RelayMetrics, SharedMetrics};
        use std::sync::{Arc, RwLock};

        let (url, mut seen) = fake_service(Script::silent()).await;
        let registry = SessionRegistry::new(2);
        let metrics: SharedMetrics = Arc::new(RwLock::new(RelayMetrics::default()));
        let dispatcher = Dispatcher::new(registry.clone(), metrics, 8);
        let session = dispatcher
            .open(Box::new(RemoteRealtimeAdapter::new(remote_config(url))))
            .unwrap();

        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, _outbound) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(session, inbound_rx, outbound_tx));

        inbound.send(r#"{"type":"text","text":"hi"}"#.to_string()).unwrap();
        assert_eq!(next_frame(&mut seen).await["type"], "session.update");
        assert_eq!(next_frame(&mut seen).await["type"], "conversation.item.create");
        assert_eq!(next_frame(&mut seen).await["type"], "response.create");

        drop(inbound);
        assert!(matches!(task.await.unwrap(), SessionEnd::ClientClosed));
        assert!(matches!(seen.recv().await, Some(Seen::Closed)));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = RemoteConfig::default();
        config.url = format!("ws://{}/v1/realtime", addr);
        let mut adapter = RemoteRealtimeAdapter::new(config);
        let (events_tx, _events) = mpsc::channel(4);

        assert!(adapter.begin_session(events_tx).await.is_err());
        assert!(adapter.submit_text("hello").await.is_err());
    }
}
