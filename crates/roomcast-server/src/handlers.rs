//! Connection handlers for the Roomcast server.
//!
//! This module owns the connection lifecycle: handshake authentication
//! before the WebSocket upgrade, the per-connection frame loop, and
//! teardown that drives presence offline.

use crate::auth::{bearer_token, JwtVerifier};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use roomcast_core::events::MessageEvent;
use roomcast_core::{
    ChatError, ConnectionId, Envelope, IdentityVerifier, MemoryStore, MessageService,
    PresenceTracker, RoomService, RoomStore, Router as TopicRouter, RouterConfig, SessionError,
    SessionRegistry, Topic, User, UserId,
};
use roomcast_protocol::{codec, Frame, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Durable storage.
    pub store: Arc<dyn RoomStore>,
    /// The topic router.
    pub router: Arc<TopicRouter>,
    /// Live connections and their subscriptions.
    pub registry: SessionRegistry,
    /// Room membership and lifecycle.
    pub rooms: Arc<RoomService>,
    /// Message lifecycle and replay.
    pub messages: MessageService,
    /// Presence tracking.
    pub presence: PresenceTracker,
    /// Handshake credential verifier.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Wire the full service stack over a store and verifier.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn RoomStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let router = Arc::new(TopicRouter::with_config(RouterConfig {
            max_topics: config.limits.max_topics,
            topic_capacity: config.limits.topic_capacity,
            auto_delete_empty_topics: true,
        }));
        let registry = SessionRegistry::new(
            Arc::clone(&router),
            config.limits.max_subscriptions_per_connection,
        );
        let rooms = Arc::new(RoomService::new(Arc::clone(&store), Arc::clone(&router)));
        let messages = MessageService::new(
            Arc::clone(&store),
            Arc::clone(&rooms),
            Arc::clone(&router),
        );
        let presence = PresenceTracker::new(Arc::clone(&store), Arc::clone(&router));

        Self {
            store,
            router,
            registry,
            rooms,
            messages,
            presence,
            verifier,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server over the in-memory store.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let verifier: Arc<dyn IdentityVerifier> =
        Arc::new(JwtVerifier::new(&config.auth.jwt_secret));
    let state = Arc::new(AppState::new(config.clone(), store, verifier));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Roomcast server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// The credential is verified before the upgrade; a request that cannot
/// be tied to a user is rejected with 401 and no socket is opened.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let credential = bearer_token(&headers).map(str::to_owned).or_else(|| {
        state
            .config
            .auth
            .allow_query_token
            .then(|| params.get("token").cloned())
            .flatten()
    });

    let Some(credential) = credential else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.verifier.verify(&credential).await {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id)),
        Err(e) => {
            debug!(error = %e, "handshake rejected");
            metrics::record_error("auth");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    if let Err(e) = state.registry.register(connection_id.clone(), user_id) {
        error!(connection = %connection_id, error = %e, "session registration failed");
        return;
    }
    if let Err(e) = state.presence.connected(user_id).await {
        warn!(user_id, error = %e, "presence online transition failed");
    }

    debug!(connection = %connection_id, user_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let connected_frame = Frame::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION,
        state.config.heartbeat.interval_ms,
        user_id,
    );
    if send_frame(&mut sender, &connected_frame).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        teardown(&state, &connection_id).await;
        return;
    }

    // One forwarder task per subscription, merged into a single mpsc so
    // the select loop has one receive point.
    let mut subscription_tasks: HashMap<Topic, tokio::task::JoinHandle<()>> = HashMap::new();
    let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<Arc<Envelope>>();

    loop {
        tokio::select! {
            biased;

            // Routed events from subscribed topics
            Some(envelope) = sub_rx.recv() => {
                match Frame::event(&envelope) {
                    Ok(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "event serialization failed");
                        metrics::record_error("serialize");
                    }
                }
            }

            // Frames from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_frame(text.len(), "inbound");

                        match codec::decode(&text) {
                            Ok(frame) => {
                                if let Err(e) = handle_frame(
                                    &frame,
                                    &connection_id,
                                    user_id,
                                    &state,
                                    &mut sender,
                                    &mut subscription_tasks,
                                    &sub_tx,
                                ).await {
                                    error!(connection = %connection_id, error = %e, "Frame handling error");
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(connection = %connection_id, error = %e, "malformed frame");
                                metrics::record_error("protocol");
                                let response = Frame::error(0, 1005, e.to_string());
                                if send_frame(&mut sender, &response).await.is_err() {
                                    break;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection = %connection_id, "ignoring binary message");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    for (_, handle) in subscription_tasks {
        handle.abort();
    }
    teardown(&state, &connection_id).await;

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Drop the session and drive the presence offline transition.
async fn teardown(state: &Arc<AppState>, connection_id: &ConnectionId) {
    if let Some(principal) = state.registry.drop_connection(connection_id) {
        if let Err(e) = state.presence.disconnected(principal).await {
            warn!(user_id = principal, error = %e, "presence offline transition failed");
        }
    }
    metrics::set_active_topics(state.router.topic_count());
}

/// Whether the principal may subscribe to a topic.
///
/// Room-scoped topics require participancy, a user topic belongs to its
/// user alone, and the presence topic is open to every authenticated
/// connection.
async fn authorize_subscription(
    state: &Arc<AppState>,
    user_id: UserId,
    topic: Topic,
) -> Result<(), ChatError> {
    match topic {
        Topic::Room(room_id)
        | Topic::Typing(room_id)
        | Topic::Edited(room_id)
        | Topic::Deleted(room_id) => {
            if state.rooms.is_participant(room_id, user_id).await? {
                Ok(())
            } else {
                Err(ChatError::NotParticipant { user_id, room_id })
            }
        }
        Topic::User(owner) if owner == user_id => Ok(()),
        Topic::User(_) => Err(ChatError::Unauthorized(
            "cannot subscribe to another user's topic",
        )),
        Topic::Presence => Ok(()),
    }
}

/// Turn a service error into a wire error frame, hiding internals.
fn error_frame(id: u64, e: &ChatError) -> Frame {
    if e.is_internal() {
        metrics::record_error("internal");
        Frame::error(id, e.code(), "internal error")
    } else {
        Frame::error(id, e.code(), e.to_string())
    }
}

/// Handle a decoded frame.
#[allow(clippy::too_many_lines)]
async fn handle_frame(
    frame: &Frame,
    connection_id: &ConnectionId,
    user_id: UserId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    subscription_tasks: &mut HashMap<Topic, tokio::task::JoinHandle<()>>,
    sub_tx: &mpsc::UnboundedSender<Arc<Envelope>>,
) -> Result<()> {
    match frame {
        Frame::Subscribe { id, topic } => {
            debug!(connection = %connection_id, %topic, "Subscribe request");

            if let Err(e) = authorize_subscription(state, user_id, *topic).await {
                warn!(connection = %connection_id, %topic, error = %e, "Subscribe denied");
                send_frame(sender, &error_frame(*id, &e)).await?;
                return Ok(());
            }

            let response = match state.registry.subscribe(connection_id, *topic) {
                Ok(Some(mut rx)) => {
                    let tx = sub_tx.clone();
                    let handle = tokio::spawn(async move {
                        loop {
                            match rx.recv().await {
                                Ok(envelope) => {
                                    if tx.send(envelope).is_err() {
                                        break; // Receiver dropped
                                    }
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            }
                        }
                    });
                    subscription_tasks.insert(*topic, handle);
                    metrics::record_subscription();
                    metrics::set_active_topics(state.router.topic_count());
                    Frame::ack(*id)
                }
                // Already held; the existing forwarder stays in place.
                Ok(None) => Frame::ack(*id),
                Err(e @ SessionError::MaxSubscriptionsReached) => {
                    warn!(connection = %connection_id, error = %e, "Subscribe failed");
                    Frame::error(*id, 1005, e.to_string())
                }
                Err(e) => {
                    error!(connection = %connection_id, error = %e, "Subscribe failed");
                    Frame::error(*id, 1100, "internal error")
                }
            };

            send_frame(sender, &response).await?;
        }

        Frame::Unsubscribe { id, topic } => {
            debug!(connection = %connection_id, %topic, "Unsubscribe request");

            if let Some(handle) = subscription_tasks.remove(topic) {
                handle.abort();
            }

            let response = match state.registry.unsubscribe(connection_id, *topic) {
                Ok(()) => {
                    metrics::set_active_topics(state.router.topic_count());
                    Frame::ack(*id)
                }
                Err(e) => Frame::error(*id, 1005, e.to_string()),
            };

            send_frame(sender, &response).await?;
        }

        Frame::Send {
            id,
            room_id,
            content,
            message_type,
        } => {
            let response = match state
                .messages
                .send(user_id, *room_id, content, *message_type)
                .await
            {
                Ok(message) => {
                    debug!(connection = %connection_id, room_id, message_id = message.id, "Message sent");
                    Frame::ack(*id)
                }
                Err(e) => error_frame(*id, &e),
            };
            send_frame(sender, &response).await?;
        }

        Frame::Edit {
            id,
            message_id,
            content,
        } => {
            let response = match state.messages.edit(*message_id, user_id, content).await {
                Ok(_) => Frame::ack(*id),
                Err(e) => error_frame(*id, &e),
            };
            send_frame(sender, &response).await?;
        }

        Frame::Delete { id, message_id } => {
            let response = match state.messages.delete(*message_id, user_id).await {
                Ok(()) => Frame::ack(*id),
                Err(e) => error_frame(*id, &e),
            };
            send_frame(sender, &response).await?;
        }

        // Fire-and-forget; a failed indicator is not worth a round trip.
        Frame::Typing { room_id, is_typing } => {
            if let Err(e) = state.messages.typing(*room_id, user_id, *is_typing).await {
                debug!(connection = %connection_id, room_id, error = %e, "typing rejected");
            }
        }

        Frame::Status { id, status } => {
            let response = match state.presence.set_status(user_id, *status).await {
                Ok(()) => Frame::ack(*id),
                Err(e) => error_frame(*id, &e),
            };
            send_frame(sender, &response).await?;
        }

        Frame::Recent { id, room_id, limit } => {
            let cap = state.config.limits.replay_limit;
            let limit = limit.unwrap_or(cap).min(cap);

            let response = match state.messages.recent(*room_id, user_id, limit).await {
                Ok(messages) => {
                    let events = hydrate_events(state, messages).await;
                    Frame::history(*id, *room_id, events)
                }
                Err(e) => error_frame(*id, &e),
            };
            send_frame(sender, &response).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(*timestamp)).await?;
        }

        Frame::Pong { .. } => {
            // Ignore
        }

        _ => {
            warn!(connection = %connection_id, "Unexpected server-originated frame from client");
        }
    }

    Ok(())
}

/// Join stored messages with their senders for the wire, caching user
/// lookups within the batch.
async fn hydrate_events(
    state: &Arc<AppState>,
    messages: Vec<roomcast_core::Message>,
) -> Vec<MessageEvent> {
    let mut senders: HashMap<UserId, User> = HashMap::new();
    let mut events = Vec::with_capacity(messages.len());

    for message in &messages {
        if !senders.contains_key(&message.sender_id) {
            let user = match state.store.find_user_by_id(message.sender_id).await {
                Ok(Some(user)) => user,
                _ => User::new(message.sender_id, "unknown"),
            };
            senders.insert(message.sender_id, user);
        }
        events.push(MessageEvent::from_message(message, &senders[&message.sender_id]));
    }
    events
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<()> {
    let text = codec::encode(frame)?;
    metrics::record_frame(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}
