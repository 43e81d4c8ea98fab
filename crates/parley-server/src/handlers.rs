//! Connection handlers for the Parley server.
//!
//! Each WebSocket is one session: a `connect` handshake binds it to an
//! identity, after which it may join chat rooms, issue message requests and
//! receive lifecycle events for the rooms it has joined.

use crate::config::Config;
use crate::identity::{ConfigIdentities, Identity, IdentityResolver};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::request::{self, RequestError};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::{
    MemoryDirectory, MemoryStore, MessageService, RealtimeBroadcaster, RoomRouter, RouterError,
};
use parley_protocol::{codes, ChatEvent, Frame, FrameCodec, ProtocolError, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub service: MessageService,
    pub router: Arc<RoomRouter>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    /// Chat membership, seeded from configuration.
    pub directory: Arc<MemoryDirectory>,
    pub identities: Arc<dyn IdentityResolver>,
    /// Decodes client frames under `limits.max_frame_size`.
    pub codec: FrameCodec,
    /// Encodes server frames under `limits.max_reply_size`.
    pub outbound: FrameCodec,
    pub config: Config,
    next_session: AtomicU64,
}

impl AppState {
    /// Wire the message core together. Must be called within a tokio
    /// runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router = Arc::new(RoomRouter::with_config(config.limits.router_config()));
        let broadcaster = Arc::new(RealtimeBroadcaster::start(router.clone()));

        let directory = Arc::new(MemoryDirectory::new());
        for chat in &config.chats {
            directory.set_chat(chat.id.clone(), chat.participants.iter().cloned());
        }

        let service = MessageService::new(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            broadcaster.clone(),
        );
        let identities = ConfigIdentities::from_config(&config.identities);
        if identities.is_empty() {
            warn!("No identities configured; every connect will be rejected");
        }
        info!(
            chats = directory.chat_count(),
            identities = identities.len(),
            "Message core ready"
        );

        Self {
            service,
            router,
            broadcaster,
            directory,
            identities: Arc::new(identities),
            codec: FrameCodec::with_limit(config.limits.max_frame_size),
            outbound: FrameCodec::with_limit(config.limits.max_reply_size),
            config,
            next_session: AtomicU64::new(0),
        }
    }

    fn next_session_id(&self) -> String {
        format!("sess_{}", self.next_session.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.broadcaster.shutdown().await;
    info!("Parley server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "rooms": stats.room_count,
        "sessions": stats.session_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Per-connection state after a successful handshake.
struct Session {
    id: String,
    identity: Identity,
    /// Room forwarders, by chat id.
    forwarders: HashMap<String, JoinHandle<u64>>,
    /// Bounded queue of events waiting for the socket.
    events: mpsc::Sender<Arc<ChatEvent>>,
}

impl Session {
    fn close(&mut self, state: &AppState) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
        state.router.leave_all(&self.id);
        metrics::set_active_rooms(state.router.stats().room_count);
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let session_id = state.next_session_id();
    debug!(session = %session_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    let Some(identity) = handshake(
        &state,
        &session_id,
        &mut sender,
        &mut receiver,
        &mut read_buffer,
    )
    .await
    else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    info!(
        session = %session_id,
        actor = %identity.actor_id,
        name = identity.display_name.as_deref().unwrap_or("-"),
        "Session established"
    );

    let (events_tx, mut events_rx) =
        mpsc::channel::<Arc<ChatEvent>>(state.config.limits.room_capacity);
    let mut session = Session {
        id: session_id,
        identity,
        forwarders: HashMap::new(),
        events: events_tx,
    };

    let idle_limit = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = tokio::time::interval(Duration::from_millis(
        state.config.heartbeat.interval_ms,
    ));
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    'session: loop {
        tokio::select! {
            biased;

            // Events from joined rooms
            Some(event) = events_rx.recv() => {
                let kind = event.event_type.as_str();
                let data = match state.outbound.encode(&Frame::event(event.as_ref().clone())) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(session = %session.id, message_id = event.message_id, error = %e, "Dropping unencodable event");
                        metrics::record_error("event_encode");
                        continue;
                    }
                };
                if send_bytes(&mut sender, data).await.is_err() {
                    break;
                }
                metrics::record_event_delivered(kind);
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= idle_limit {
                    debug!(session = %session.id, "Session idle, closing");
                    break;
                }
                if send_frame(&state.outbound, &mut sender, &Frame::ping()).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match state.codec.decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if let Err(e) = handle_frame(frame, &mut session, &state, &mut sender).await {
                                        error!(session = %session.id, error = %e, "Frame handling error");
                                        break 'session;
                                    }
                                }
                                Ok(None) => break,
                                Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                                    warn!(session = %session.id, error = %e, "Oversized frame, closing");
                                    metrics::record_error("frame_too_large");
                                    let _ = send_frame(&state.outbound, &mut sender, &Frame::error(0, codes::INVALID_FRAME, e.to_string())).await;
                                    break 'session;
                                }
                                Err(e) => {
                                    debug!(session = %session.id, error = %e, "Undecodable frame");
                                    metrics::record_error("decode");
                                    if send_frame(&state.outbound, &mut sender, &Frame::error(0, codes::INVALID_FRAME, e.to_string())).await.is_err() {
                                        break 'session;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        last_seen = Instant::now();
                        let reply = Frame::error(0, codes::INVALID_FRAME, "Binary frames only");
                        if send_frame(&state.outbound, &mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session.id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    session.close(&state);
    debug!(session = %session.id, "WebSocket disconnected");
}

/// Wait for `connect` and admit the session.
///
/// Every refusal is reported to the client before `None` is returned.
async fn handshake(
    state: &AppState,
    session_id: &str,
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    buffer: &mut BytesMut,
) -> Option<Identity> {
    let wait = Duration::from_millis(state.config.heartbeat.timeout_ms);

    let first = match tokio::time::timeout(wait, next_frame(&state.codec, receiver, buffer)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            debug!(session = %session_id, "Closed before connect");
            return None;
        }
        Ok(Err(e)) => {
            debug!(session = %session_id, error = %e, "Invalid handshake frame");
            let refusal = Frame::error(0, codes::INVALID_FRAME, e.to_string());
            let _ = send_frame(&state.outbound, sender, &refusal).await;
            return None;
        }
        Err(_) => {
            debug!(session = %session_id, "Handshake timed out");
            return None;
        }
    };

    match admit(state, session_id, first).await {
        Ok((identity, connected)) => {
            if let Err(e) = send_frame(&state.outbound, sender, &connected).await {
                error!(session = %session_id, error = %e, "Failed to send Connected frame");
                return None;
            }
            Some(identity)
        }
        Err(refusal) => {
            let _ = send_frame(&state.outbound, sender, &refusal).await;
            None
        }
    }
}

/// Decide on the first frame of a session: negotiate the protocol version
/// and resolve the token. Returns the identity with the `Connected` frame,
/// or the `Error` frame to refuse with.
async fn admit(state: &AppState, session_id: &str, first: Frame) -> Result<(Identity, Frame), Frame> {
    let Frame::Connect { version, token } = first else {
        return Err(Frame::error(0, codes::INVALID_FRAME, "Expected connect"));
    };

    let Some(negotiated) = PROTOCOL_VERSION.negotiate(version) else {
        debug!(session = %session_id, version, "Unsupported protocol version");
        return Err(Frame::error(
            0,
            codes::UNSUPPORTED_VERSION,
            format!("Unsupported protocol version {}, server speaks {}", version, PROTOCOL_VERSION),
        ));
    };

    let identity = match token {
        Some(token) => state.identities.resolve(&token).await,
        None => None,
    };
    let Some(identity) = identity else {
        debug!(session = %session_id, "Unauthenticated session refused");
        metrics::record_error("unauthenticated");
        return Err(Frame::error(0, codes::UNAUTHENTICATED, "Unknown session token"));
    };

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(session_id, &identity.actor_id, negotiated.major, heartbeat);
    Ok((identity, connected))
}

/// Read socket messages until a whole frame is buffered. `None` means the
/// socket closed first.
async fn next_frame(
    codec: &FrameCodec,
    receiver: &mut WsReceiver,
    buffer: &mut BytesMut,
) -> Result<Option<Frame>, ProtocolError> {
    loop {
        if let Some(frame) = codec.decode_from(buffer)? {
            return Ok(Some(frame));
        }
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => {
                metrics::record_frame(data.len(), "inbound");
                buffer.extend_from_slice(&data);
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(None),
            Some(Ok(_)) => {}
        }
    }
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    session: &mut Session,
    state: &AppState,
    sender: &mut WsSender,
) -> Result<()> {
    match frame {
        Frame::Join { id, chat_id } => {
            debug!(session = %session.id, chat = %chat_id, "Join request");

            let response = match join_room(state, session, &chat_id).await {
                Ok(()) => Frame::ack(id),
                Err(e) => {
                    debug!(session = %session.id, chat = %chat_id, error = %e, "Join refused");
                    Frame::error(id, e.code, e.message)
                }
            };
            send_reply(&state.outbound, sender, id, &response).await?;
        }

        Frame::Leave { id, chat_id } => {
            debug!(session = %session.id, chat = %chat_id, "Leave request");

            let response = match leave_room(state, session, &chat_id) {
                Ok(()) => Frame::ack(id),
                Err(e) => Frame::error(id, e.code, e.message),
            };
            send_reply(&state.outbound, sender, id, &response).await?;
        }

        Frame::Request { id, request } => {
            let op = request.op();
            let start = Instant::now();

            let response = match request::execute(&state.service, &session.identity, request).await {
                Ok(payload) => {
                    metrics::record_request(op, "ok", start.elapsed().as_secs_f64());
                    Frame::reply(id, payload)
                }
                Err(e) => {
                    metrics::record_request(op, e.outcome(), start.elapsed().as_secs_f64());
                    debug!(session = %session.id, op, error = %e, "Request failed");
                    Frame::error(id, e.code, e.message)
                }
            };
            send_reply(&state.outbound, sender, id, &response).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(&state.outbound, sender, &Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {}

        Frame::Connect { .. } => {
            let reply = Frame::error(0, codes::INVALID_FRAME, "Session already connected");
            send_frame(&state.outbound, sender, &reply).await?;
        }

        other => {
            warn!(session = %session.id, frame_type = ?other.frame_type(), "Unexpected frame type");
            let reply = Frame::error(0, codes::INVALID_FRAME, "Unexpected frame type");
            send_frame(&state.outbound, sender, &reply).await?;
        }
    }

    Ok(())
}

/// Join a chat's room and start forwarding its events to the session.
/// Joining a room twice is accepted.
async fn join_room(state: &AppState, session: &mut Session, chat_id: &str) -> Result<(), RequestError> {
    if session.forwarders.contains_key(chat_id) {
        return Ok(());
    }
    state
        .service
        .authorize_room(chat_id, &session.identity.actor_id)
        .await?;

    let rx = state.router.join(&session.id, chat_id).map_err(room_error)?;
    let handle = tokio::spawn(forward_events(rx, session.events.clone()));
    session.forwarders.insert(chat_id.to_string(), handle);

    metrics::set_active_rooms(state.router.stats().room_count);
    Ok(())
}

fn leave_room(state: &AppState, session: &mut Session, chat_id: &str) -> Result<(), RequestError> {
    if let Some(handle) = session.forwarders.remove(chat_id) {
        handle.abort();
    }
    state.router.leave(&session.id, chat_id).map_err(room_error)?;

    metrics::set_active_rooms(state.router.stats().room_count);
    Ok(())
}

fn room_error(e: RouterError) -> RequestError {
    let code = match e {
        RouterError::RoomLimit | RouterError::SessionRoomLimit => codes::ROOM_LIMIT,
        RouterError::InvalidChatId(_) | RouterError::NotInRoom(_) | RouterError::AlreadyInRoom(_) => {
            codes::INVALID_INPUT
        }
    };
    RequestError::new(code, e.to_string())
}

/// Copy a room's events into the session's queue.
///
/// A full queue blocks the copy, so a stalled socket leaves events in the
/// room's ring buffer, where the oldest are overwritten. Returns how many
/// events this session lost that way.
async fn forward_events(
    mut rx: broadcast::Receiver<Arc<ChatEvent>>,
    tx: mpsc::Sender<Arc<ChatEvent>>,
) -> u64 {
    let mut lost = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Session fell behind its room");
                metrics::record_events_lagged(skipped);
                lost += skipped;
            }
        }
    }
    lost
}

/// Encode the answer to frame `id`. An answer over the outbound limit is
/// replaced by an `INTERNAL` error so the client still hears back.
fn encode_reply(codec: &FrameCodec, id: u64, frame: &Frame) -> Result<Bytes, ProtocolError> {
    match codec.encode(frame) {
        Ok(data) => Ok(data),
        Err(e) => {
            warn!(id, error = %e, "Reply could not be encoded");
            metrics::record_error("reply_encode");
            codec.encode(&Frame::error(id, codes::INTERNAL, "Reply too large"))
        }
    }
}

async fn send_reply(codec: &FrameCodec, sender: &mut WsSender, id: u64, frame: &Frame) -> Result<()> {
    let data = encode_reply(codec, id, frame)?;
    send_bytes(sender, data).await
}

/// Send a frame to the WebSocket.
async fn send_frame(codec: &FrameCodec, sender: &mut WsSender, frame: &Frame) -> Result<()> {
    let data = codec.encode(frame)?;
    send_bytes(sender, data).await
}

async fn send_bytes(sender: &mut WsSender, data: Bytes) -> Result<()> {
    metrics::record_frame(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
