use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::session::Session;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Ping task: heartbeats and closes the socket on a missed pong
/// - Reader loop (this task): handles inbound frames one at a time, in order
///
/// The session is torn down exactly once when the reader loop ends.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut session = Session::new(state, identity, tx.clone());
    session.activate();

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    // Ping task tells the reader loop to stop when the peer stops answering
    let (dead_tx, mut dead_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    let _ = dead_tx.send(());
                    break;
                }
            }
        }
    });

    let reason = loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = dead_rx.recv() => break "ping timeout",
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&mut session, text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %session.user_id(),
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %session.user_id(),
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break "client disconnect";
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %session.user_id(),
                    error = %e,
                    "WebSocket receive error"
                );
                break "transport error";
            }
            None => {
                tracing::info!(user_id = %session.user_id(), "WebSocket stream ended");
                break "transport close";
            }
        }
    };

    session.teardown(reason);
    ping_handle.abort();
    drop(session);
    drop(tx);
    // Let queued frames (such as the pong-timeout close) drain, then stop the writer.
    let mut writer_handle = writer_handle;
    if timeout(Duration::from_secs(1), &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
