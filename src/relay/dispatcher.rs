//! # Relay Dispatcher
//!
//! Runs one session from accept to teardown.
//!
//! ## Task Layout:
//! The WebSocket actor owns the client socket. It pushes every text frame into
//! the session's inbound channel and writes every [`ServerEnvelope`] it gets
//! from the outbound channel. The dispatcher sits between those two channels
//! and the backend event channel:
//!
//! ```text
//! client frames ──inbound──▶ Dispatcher ──▶ Session (buffer + adapter) ──▶ backend
//! client ◀──outbound── Dispatcher ◀──events── adapter / remote drain task
//! ```
//!
//! Events are always drained before the next client frame is read, so a
//! backend never waits on a full event channel while the dispatcher waits on it.
//!
//! ## Teardown:
//! Whatever ends the loop (client gone, backend gone, an operation failing),
//! the session is closed and the registry entry released before `run` returns.

use crate::backend::{BackendAdapter, BackendEvent};
use crate::error::{AppError, AppResult};
use crate::relay::envelope::{self, Decoded, ServerEnvelope};
use crate::relay::session::{ConnectionId, Session, SessionRegistry};
use crate::state::{RelayMetrics, SharedMetrics};
use anyhow::Context;
use std::fmt;
use std::sync::PoisonError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client disconnected (or its socket actor stopped)
    ClientClosed,
    /// The backend stopped producing events
    BackendClosed,
    /// Nobody is reading outbound envelopes anymore
    OutboundClosed,
    /// Opening the backend or applying an envelope failed
    Failed(anyhow::Error),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ClientClosed => f.write_str("client closed"),
            SessionEnd::BackendClosed => f.write_str("backend closed"),
            SessionEnd::OutboundClosed => f.write_str("outbound channel closed"),
            SessionEnd::Failed(err) => write!(f, "failed: {:#}", err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    metrics: SharedMetrics,
    event_capacity: usize,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, metrics: SharedMetrics, event_capacity: usize) -> Self {
        Self {
            registry,
            metrics,
            event_capacity: event_capacity.max(2),
        }
    }

    /// Accept a connection: register it and give it a fresh session.
    ///
    /// ## Errors:
    /// - **Unavailable**: The registry is full
    pub fn open(&self, adapter: Box<dyn BackendAdapter>) -> AppResult<Session> {
        let id = ConnectionId::new();
        self.registry
            .try_register(id, adapter.mode())
            .map_err(AppError::Unavailable)?;
        self.record(|metrics| metrics.sessions_opened += 1);

        info!(connection_id = %id, mode = %adapter.mode(), "Session opened");
        Ok(Session::new(id, adapter))
    }

    /// Relay between the client channels and the backend until either side ends.
    ///
    /// ## Channels:
    /// - **inbound**: Raw client text frames; closed when the client leaves
    /// - **outbound**: Envelopes for the client; closed when nobody writes them
    /// - **events**: Created here and handed to the adapter in `begin`
    ///
    /// Takes `self` by value so the task owns everything it touches and can be
    /// handed straight to `tokio::spawn`.
    pub async fn run(
        self,
        mut session: Session,
        mut inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::Sender<ServerEnvelope>,
    ) -> SessionEnd {
        let id = session.id();
        let (events_tx, mut events) = mpsc::channel(self.event_capacity);

        let end = match session.begin(events_tx).await {
            Ok(()) => {
                self.relay(&mut session, &mut inbound, &mut events, &outbound)
                    .await
            }
            Err(err) => {
                error!(connection_id = %id, mode = %session.mode(), "Failed to open backend: {:#}", err);
                SessionEnd::Failed(err)
            }
        };

        session.close().await;
        self.registry.release(id);

        match &end {
            SessionEnd::Failed(_) => warn!(connection_id = %id, reason = %end, "Session ended"),
            _ => info!(connection_id = %id, reason = %end, "Session ended"),
        }
        end
    }

    async fn relay(
        &self,
        session: &mut Session,
        inbound: &mut mpsc::UnboundedReceiver<String>,
        events: &mut mpsc::Receiver<BackendEvent>,
        outbound: &mpsc::Sender<ServerEnvelope>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        return SessionEnd::BackendClosed;
                    };
                    if matches!(event, BackendEvent::Error(_)) {
                        self.record(|metrics| metrics.backend_errors += 1);
                    }
                    if outbound.send(event.into()).await.is_err() {
                        return SessionEnd::OutboundClosed;
                    }
                }

                frame = inbound.recv() => {
                    let Some(raw) = frame else {
                        return SessionEnd::ClientClosed;
                    };
                    if let Err(err) = self.apply(session, &raw).await {
                        return SessionEnd::Failed(err);
                    }
                }
            }
        }
    }

    /// Decode one client frame and apply it. Frames that do not decode are dropped.
    async fn apply(&self, session: &mut Session, raw: &str) -> anyhow::Result<()> {
        match envelope::decode(raw) {
            Decoded::Envelope(envelope) => {
                let tag = envelope.tag();
                self.record(|metrics| metrics.envelopes_received += 1);
                debug!(connection_id = %session.id(), kind = tag, "Envelope received");

                session
                    .handle(envelope)
                    .await
                    .with_context(|| format!("handling {} envelope", tag))
            }
            Decoded::Unknown(tag) => {
                debug!(connection_id = %session.id(), kind = %tag, "Ignoring unknown envelope");
                Ok(())
            }
            Decoded::Malformed(reason) => {
                debug!(connection_id = %session.id(), %reason, "Ignoring malformed envelope");
                Ok(())
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut RelayMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }
}
