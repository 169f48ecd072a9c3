use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use pirc_types::events::{ClientFrame, ServerFrame};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::registry::ConnectionId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Frames buffered per connection before fan-out starts dropping for it.
pub const OUTBOUND_BUFFER: usize = 256;

/// How much of a rejected frame ends up in the log.
const LOGGED_FRAME_CHARS: usize = 200;

/// Drive one WebSocket from accept to close.
///
/// Inbound frames are handled strictly in arrival order on the read task;
/// the write task drains the connection's outbound queue and runs the
/// heartbeat. If the write side ends first the read task is asked to stop
/// between frames, so an event already being handled is never cut short.
/// The disconnect path then runs exactly once.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, requested_nick: Option<String>) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Utf8Bytes>(OUTBOUND_BUFFER);

    let identity = dispatcher.connect(tx, requested_nick).await;
    let conn_id = identity.id;
    info!("{} ({}) connected to gateway", identity.nickname, conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut recv_task = tokio::spawn(read_frames(
        receiver,
        dispatcher.clone(),
        conn_id,
        pong_flag_recv,
        shutdown_rx,
    ));

    // Wait for either task to finish, then make sure the other has stopped
    // before unregistering.
    let recv_finished = tokio::select! {
        _ = &mut send_task => false,
        _ = &mut recv_task => true,
    };
    if recv_finished {
        send_task.abort();
        let _ = send_task.await;
    } else {
        let _ = shutdown_tx.send(true);
        let _ = recv_task.await;
    }

    dispatcher.disconnect(conn_id).await;
    info!("{} disconnected from gateway", conn_id);
}

/// Read loop of one connection. `shutdown` is only observed between frames.
async fn read_frames<S, E>(
    mut frames: S,
    dispatcher: Dispatcher,
    conn_id: ConnectionId,
    pong_received: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = frames.next() => next,
        };
        let Some(Ok(msg)) = next else { break };

        match msg {
            Message::Text(text) => {
                let Some(frame) = decode_frame(text.as_str()) else {
                    continue;
                };
                let name = frame.name();
                if let Err(e) = dispatcher.handle(conn_id, frame).await {
                    report(&dispatcher, conn_id, name, e).await;
                }
            }
            Message::Binary(data) => {
                warn!("{} sent a binary frame ({} bytes), dropping", conn_id, data.len());
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Parse one inbound text frame. Malformed frames are logged and dropped.
pub fn decode_frame(text: &str) -> Option<ClientFrame> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            let raw: String = text.chars().take(LOGGED_FRAME_CHARS).collect();
            warn!("bad frame: {} -- raw: {}", e, raw);
            None
        }
    }
}

async fn report(dispatcher: &Dispatcher, conn_id: ConnectionId, event: &str, err: DispatchError) {
    match err {
        DispatchError::Invalid { .. } => {
            debug!("{} rejected {}: {}", conn_id, event, err);
            dispatcher.send_to(conn_id, &ServerFrame::error(err.to_string())).await;
        }
        DispatchError::Persistence(ref e) => {
            warn!("{} {} delivered but not persisted: {}", conn_id, event, e);
        }
        DispatchError::UnknownConnection(_) => {
            warn!("{} {} after unregister: {}", conn_id, event, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use pirc_db::Database;
    use pirc_types::events::FrameKind;

    use super::*;
    use crate::registry::SessionRegistry;

    async fn next_frame(rx: &mut mpsc::Receiver<Utf8Bytes>) -> ServerFrame {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(text.as_str()).unwrap()
    }

    #[tokio::test]
    async fn shutdown_lets_the_current_frame_finish() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(SessionRegistry::new(), db.clone());

        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        let a = dispatcher.connect(tx_a, Some("alice".into())).await;
        let b = dispatcher.connect(tx_b, Some("bob".into())).await;
        next_frame(&mut rx_a).await;
        next_frame(&mut rx_b).await;
        for id in [a.id, b.id] {
            dispatcher
                .handle(id, ClientFrame::Join { channel: "#general".into() })
                .await
                .unwrap();
        }
        while rx_b.try_recv().is_ok() {}

        let said = Message::Text(r##"{"type":"message","channel":"#general","content":"last words"}"##.into());
        let frames = stream::iter(vec![Ok::<_, axum::Error>(said)]).chain(stream::pending());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(read_frames(
            frames,
            dispatcher.clone(),
            a.id,
            Arc::new(AtomicBool::new(true)),
            shutdown_rx,
        ));

        let frame = next_frame(&mut rx_b).await;
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.content, "last words");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();

        let history = db.channel_history("#general", 50).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "last words");
    }

    #[tokio::test]
    async fn closed_stream_ends_the_reader() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(SessionRegistry::new(), db);
        let (tx, _rx) = mpsc::channel(16);
        let a = dispatcher.connect(tx, None).await;

        let frames = stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::time::timeout(
            Duration::from_secs(1),
            read_frames(frames, dispatcher, a.id, Arc::new(AtomicBool::new(true)), shutdown_rx),
        )
        .await
        .unwrap();
    }

    #[test]
    fn decode_accepts_known_frames() {
        let frame = decode_frame(r##"{"type":"join","channel":"#general"}"##).unwrap();
        assert_eq!(frame.name(), "join");
    }

    #[test]
    fn decode_drops_garbage_without_panicking() {
        assert!(decode_frame("{").is_none());
        assert!(decode_frame(r#"{"type":"whois","nick":"x"}"#).is_none());
        // Long multi-byte input must not be sliced mid-character when logged
        let long = "é".repeat(LOGGED_FRAME_CHARS * 2);
        assert!(decode_frame(&long).is_none());
    }
}
