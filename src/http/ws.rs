use std::time::Duration;

use alertflow_common::ProgressEvent;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::api::SharedState;
use crate::errors::OrchestratorError;
use crate::progress::Subscription;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub from_sequence: Option<u64>,
}

/// Frames sent to progress observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Event {
        #[serde(flatten)]
        event: ProgressEvent,
    },
    /// The requested history is gone; fetch status and subscribe from its
    /// `lastSequence`.
    ResyncRequired {
        #[serde(rename = "alertId")]
        alert_id: String,
        requested: u64,
        message: String,
    },
}

impl StreamFrame {
    fn resync(err: &OrchestratorError, alert_id: &str) -> Self {
        let requested = match err {
            OrchestratorError::BacklogOverflow { requested, .. } => *requested,
            _ => 0,
        };
        StreamFrame::ResyncRequired {
            alert_id: alert_id.to_string(),
            requested,
            message: err.to_string(),
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let subscription = state
        .engine
        .progress
        .subscribe(&alert_id, query.from_sequence);
    ws.on_upgrade(move |socket| handle_socket(socket, alert_id, subscription))
}

async fn handle_socket(
    socket: WebSocket,
    alert_id: String,
    subscription: Result<Subscription, OrchestratorError>,
) {
    let (mut sender, receiver) = socket.split();
    match subscription {
        Ok(subscription) => run_socket_loop(sender, receiver, subscription).await,
        Err(err) => {
            let _ = send_frame(&mut sender, &StreamFrame::resync(&err, &alert_id)).await;
            let _ = sender.send(Message::Close(None)).await;
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &StreamFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Progress forwarding with ping/pong keepalive.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(alert_id = subscription.alert_id(), "progress stream timed out");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            next = subscription.next() => {
                match next {
                    Some(Ok(event)) => {
                        if send_frame(&mut sender, &StreamFrame::Event { event }).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let frame = StreamFrame::resync(&err, subscription.alert_id());
                        let _ = send_frame(&mut sender, &frame).await;
                        break;
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
