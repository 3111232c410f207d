//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameError, Snapshot};
use crate::http::routes::{parse_room_id, AppError};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};
use crate::ws::session::Subscription;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Player identity persisted by the client
    #[serde(default)]
    pub player_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Attach before upgrading so an unknown room is a plain HTTP error
    let subscription = match parse_room_id(&room_id)
        .and_then(|id| state.sessions.open(id, query.player_id.clone()))
    {
        Ok(sub) => sub,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "WebSocket attach refused");
            return AppError::from(e).into_response();
        }
    };

    let connection_id = subscription.connection_id;
    let sessions = state.sessions.clone();
    ws.on_failed_upgrade(move |e| {
        warn!(connection_id = %connection_id, error = %e, "WebSocket upgrade failed");
        sessions.close(&connection_id);
    })
    .on_upgrade(move |socket| handle_socket(socket, subscription, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, subscription: Subscription, state: AppState) {
    let Subscription {
        connection_id,
        room_id,
        initial,
        snapshots,
    } = subscription;

    info!(connection_id = %connection_id, room_id = %room_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    if let Err(e) = send_msg(&mut ws_sink, &ServerMsg::Snapshot(initial)).await {
        debug!(connection_id = %connection_id, error = %e, "Failed to send initial snapshot");
        state.sessions.close(&connection_id);
        return;
    }

    run_session(connection_id, ws_sink, ws_stream, snapshots, &state).await;

    state.sessions.close(&connection_id);
    info!(connection_id = %connection_id, room_id = %room_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut snapshot_rx: broadcast::Receiver<Arc<Snapshot>>,
    state: &AppState,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Errors meant for this connection only
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(16);

    // Writer task: snapshots and direct replies -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        forward_updates(connection_id, &mut ws_sink, &mut snapshot_rx, &mut direct_rx).await;
    });

    // Reader loop: WebSocket -> room intent queue
    loop {
        let result = tokio::select! {
            _ = &mut writer_handle => {
                debug!(connection_id = %connection_id, "Writer finished, closing reader");
                return;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection_id = %connection_id, "Rate limited input message");
                    report(&direct_tx, &GameError::Throttled);
                    continue;
                }
                handle_text(connection_id, &text, state, &direct_tx);
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Parse one client message and queue it; failures go back to this
/// connection only
fn handle_text(
    connection_id: Uuid,
    text: &str,
    state: &AppState,
    direct_tx: &mpsc::Sender<ServerMsg>,
) {
    let submitted = serde_json::from_str::<ClientMsg>(text)
        .map_err(|e| GameError::InvalidIntent(e.to_string()))
        .and_then(|msg| {
            let kind = msg.action.into_intent()?;
            state
                .sessions
                .submit(&connection_id, msg.player_id.as_deref(), kind)
        });

    match submitted {
        Ok(reply_rx) => {
            let direct_tx = direct_tx.clone();
            tokio::spawn(async move {
                match reply_rx.await {
                    // Accepted; the broadcast carries the resulting state
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => report(&direct_tx, &e),
                    Err(_) => report(&direct_tx, &GameError::RoomClosed),
                }
            });
        }
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "Rejected client message");
            report(&direct_tx, &e);
        }
    }
}

/// Pump the room feed and this connection's direct messages into `sink`
/// until either side closes. A subscriber that falls behind the broadcast
/// buffer is sent a close frame and dropped; the tick never waits on it.
async fn forward_updates<S>(
    connection_id: Uuid,
    sink: &mut S,
    snapshot_rx: &mut broadcast::Receiver<Arc<Snapshot>>,
    direct_rx: &mut mpsc::Receiver<ServerMsg>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let msg = tokio::select! {
            biased;

            Some(direct) = direct_rx.recv() => direct,
            snapshot = snapshot_rx.recv() => match snapshot {
                Ok(snapshot) => ServerMsg::Snapshot(snapshot),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        connection_id = %connection_id,
                        lagged_count = n,
                        "Client too slow for the snapshot feed, disconnecting"
                    );
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %connection_id, "Snapshot channel closed");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
        };

        if let Err(e) = send_msg(sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

fn report(direct_tx: &mpsc::Sender<ServerMsg>, e: &GameError) {
    // Dropped when the connection is already backed up
    let _ = direct_tx.try_send(ServerMsg::from(e));
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::RoomPhase;
    use futures::channel::mpsc::unbounded;

    fn snapshot(tick: u64) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            room_id: Uuid::nil(),
            tick,
            phase: RoomPhase::Running,
            players: vec![],
            glow_points: vec![],
            game_over: false,
        })
    }

    fn decode(msg: &Message) -> serde_json::Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_closed() {
        let (feed, mut snapshot_rx) = broadcast::channel(2);
        for tick in 0..5 {
            feed.send(snapshot(tick)).unwrap();
        }
        let (_direct_tx, mut direct_rx) = mpsc::channel(4);
        let (mut sink, frames) = unbounded::<Message>();

        forward_updates(Uuid::new_v4(), &mut sink, &mut snapshot_rx, &mut direct_rx).await;
        drop(sink);

        let frames: Vec<Message> = frames.collect().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Message::Close(None)));

        // The room keeps publishing regardless
        assert!(feed.send(snapshot(5)).is_ok());
    }

    #[tokio::test]
    async fn test_direct_errors_reach_only_their_connection() {
        let (feed, _) = broadcast::channel(8);
        let mut rx_a = feed.subscribe();
        let mut rx_b = feed.subscribe();
        let (direct_a, mut direct_rx_a) = mpsc::channel(4);
        let (_direct_b, mut direct_rx_b) = mpsc::channel(4);

        report(&direct_a, &GameError::UnknownPlayer);
        feed.send(snapshot(1)).unwrap();
        drop(feed);

        let (mut sink_a, frames_a) = unbounded::<Message>();
        let (mut sink_b, frames_b) = unbounded::<Message>();
        forward_updates(Uuid::new_v4(), &mut sink_a, &mut rx_a, &mut direct_rx_a).await;
        forward_updates(Uuid::new_v4(), &mut sink_b, &mut rx_b, &mut direct_rx_b).await;
        drop((sink_a, sink_b));

        let frames_a: Vec<Message> = frames_a.collect().await;
        let frames_b: Vec<Message> = frames_b.collect().await;

        assert_eq!(frames_a.len(), 3);
        let error = decode(&frames_a[0]);
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "unknown_player");
        assert_eq!(decode(&frames_a[1])["type"], "snapshot");
        assert!(matches!(frames_a[2], Message::Close(None)));

        assert_eq!(frames_b.len(), 2);
        assert_eq!(decode(&frames_b[0])["type"], "snapshot");
        assert!(matches!(frames_b[1], Message::Close(None)));
    }
}
