//! # Realtime WebSocket Handler
//!
//! Clients connect to `/v1/realtime` and exchange JSON text frames (see
//! [`crate::relay::envelope`]). Each accepted connection becomes one relay
//! session.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: the handler registers the connection; a full registry answers 503
//! 2. **Start**: the actor spawns the session's dispatcher task and wires two channels to it
//! 3. **Relay**: text frames go to the dispatcher, envelopes come back and are written out
//! 4. **Heartbeat**: protocol pings; a silent client is dropped after the timeout
//! 5. **Stop**: either side ending closes the other (dropping a channel is the signal)
//!
//! ## Message Format:
//! - **Client → Server**: JSON text frames; binary frames are ignored
//! - **Server → Client**: JSON text frames, one per [`ServerEnvelope`]
//!
//! ## Key Rust Concepts:
//!
//! ### Actors (the `actix` crate)
//! - **Actor**: An object with its own context that handles one message at a
//!   time, so its fields need no locks
//! - **StreamHandler**: Lets the actor consume a stream; the socket's frames
//!   are one stream and the dispatcher's envelopes are another
//! - **Context**: `ws::WebsocketContext` writes frames (`ctx.text`,
//!   `ctx.ping`) and schedules timers (`ctx.run_interval`)
//!
//! ### Bridging Actors and Tasks
//! The dispatcher is a plain tokio task, not an actor. The actor talks to it
//! only through `mpsc` channels, and the channels' close semantics carry
//! teardown in both directions.

use crate::config::PerformanceConfig;
use crate::relay::dispatcher::Dispatcher;
use crate::relay::envelope::ServerEnvelope;
use crate::relay::session::{ConnectionId, Session};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Outbound envelopes buffered between the dispatcher and the socket.
const OUTBOUND_CAPACITY: usize = 64;

/// WebSocket actor for one relay session.
///
/// The actor only moves frames. All session state lives in the dispatcher
/// task, which owns the [`Session`].
///
/// ## Rust Concepts:
/// - **Option<Session>**: The session is moved out with `take()` when the
///   dispatcher starts, leaving `None` behind; a value can only have one owner
/// - **Option<UnboundedSender>**: Setting it to `None` drops the sender, which
///   is how the dispatcher learns the client left
pub struct RelaySocket {
    id: ConnectionId,

    /// Handed to the dispatcher task when the actor starts
    session: Option<Session>,

    dispatcher: Dispatcher,

    /// Client frames for the dispatcher. Dropping it ends the session.
    inbound: Option<mpsc::UnboundedSender<String>>,

    /// How often to ping the client
    heartbeat_interval: Duration,

    /// Silence longer than this drops the client
    client_timeout: Duration,

    /// Last time any frame arrived from the client
    last_heartbeat: Instant,
}

impl RelaySocket {
    pub fn new(session: Session, dispatcher: Dispatcher, performance: &PerformanceConfig) -> Self {
        Self {
            id: session.id(),
            session: Some(session),
            dispatcher,
            inbound: None,
            heartbeat_interval: Duration::from_secs(performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(performance.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    /// Ping the client every `heartbeat_interval` and stop the actor once it
    /// has been silent for longer than `client_timeout`.
    ///
    /// ## Rust Concepts:
    /// - **Closure arguments**: `run_interval` hands the closure `&mut Self`
    ///   and the context on each tick instead of capturing `self`, since the
    ///   closure outlives this call
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called once the handshake completed.
    ///
    /// ## What this does:
    /// 1. Creates the inbound (client to dispatcher) and outbound (dispatcher
    ///    to client) channels
    /// 2. Registers the outbound receiver as a stream of this actor
    /// 3. Spawns the dispatcher task, which owns the session from here on
    /// 4. Starts the heartbeat
    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(session) = self.session.take() else {
            ctx.stop();
            return;
        };
        info!(connection_id = %self.id, mode = %session.mode(), "WebSocket connection started");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.inbound = Some(inbound_tx);

        ctx.add_stream(ReceiverStream::new(outbound_rx));
        tokio::spawn(self.dispatcher.clone().run(session, inbound_rx, outbound_tx));

        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the inbound channel tells the dispatcher the client is gone.
        self.inbound = None;
        info!(connection_id = %self.id, "WebSocket connection stopped");
    }
}

/// Frames from the client.
///
/// Any frame counts as a sign of life. Text frames are forwarded untouched;
/// decoding happens in the dispatcher so malformed input never reaches the
/// actor's error path.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                let delivered = self
                    .inbound
                    .as_ref()
                    .is_some_and(|inbound| inbound.send(text.to_string()).is_ok());
                if !delivered {
                    debug!(connection_id = %self.id, "Session already ended, dropping frame");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                debug!(connection_id = %self.id, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Envelopes from the dispatcher.
impl StreamHandler<ServerEnvelope> for RelaySocket {
    fn handle(&mut self, envelope: ServerEnvelope, ctx: &mut Self::Context) {
        match serde_json::to_string(&envelope) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(connection_id = %self.id, "Failed to encode envelope: {}", err),
        }
    }

    /// The dispatcher finished, so the session is over.
    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// WebSocket upgrade for `/v1/realtime`.
///
/// The connection is registered before the handshake is answered, so a full
/// relay refuses with a plain HTTP error instead of accepting and then closing
/// the socket. If the handshake itself fails the registration is undone.
///
/// ## Errors:
/// - **503**: `max_concurrent_sessions` sessions are already live
/// - **400**: not a valid WebSocket handshake
pub async fn realtime_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.connection_info().peer_addr(), "New WebSocket connection request");

    let dispatcher = state.dispatcher();
    let session = dispatcher.open(state.backends.create())?;
    let id = session.id();

    let socket = RelaySocket::new(session, dispatcher, &state.config.performance);
    ws::start(socket, &req, stream).map_err(|err| {
        state.registry.release(id);
        err
    })
}
