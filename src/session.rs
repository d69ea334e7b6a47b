//! One connected peer: a read loop and a write task sharing an outbound queue
//!
//! The driver is generic over the transport so it can run on an axum
//! `WebSocket` split into halves, or on plain channels in tests.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant, Interval, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::hub::{HubHandle, SessionHandle, SessionId};
use crate::protocol::{decode, Envelope, Inbound};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Close frame or end of stream
    Closed,
    /// Transport error or undecodable frame
    ReadFailed(String),
    /// Nothing received within the idle timeout
    IdleTimeout,
    /// Outbound queue was closed by the hub before the peer went away
    Evicted,
    WriteFailed(String),
    /// The hub task is gone
    HubUnavailable,
}

/// Register with the hub and run the session until either side ends.
///
/// Sends exactly one unregister to the hub, whichever task finished first.
pub async fn run_session<W, R, E>(
    sink: W,
    mut stream: R,
    identity: String,
    hub: HubHandle,
    config: SessionConfig,
) -> SessionEnd
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id: SessionId = ulid::Ulid::new().to_string();
    let (outbound, queue) = mpsc::channel(config.outbound_capacity.max(1));

    let handle = SessionHandle {
        id: id.clone(),
        identity: identity.clone(),
        outbound,
    };
    if hub.register(handle).await.is_err() {
        tracing::error!(session = %id, "Hub unavailable, refusing session");
        return SessionEnd::HubUnavailable;
    }

    let mut writer = tokio::spawn(write_loop(
        sink,
        queue,
        config.ping_interval,
        config.write_timeout,
    ));

    let (end, writer_done) = tokio::select! {
        end = read_loop(&mut stream, &identity, &hub, config.idle_timeout) => (end, false),
        joined = &mut writer => {
            let end = joined.unwrap_or_else(|e| SessionEnd::WriteFailed(e.to_string()));
            (end, true)
        }
    };

    if hub.unregister(id.clone()).await.is_err() {
        tracing::error!(session = %id, "Hub unavailable during unregister");
    }

    // The hub dropped our queue on unregister; let the writer flush what is left
    if !writer_done && timeout(config.write_timeout, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(session = %id, identity = %identity, reason = ?end, "Session ended");
    end
}

async fn read_loop<R, E>(
    stream: &mut R,
    identity: &str,
    hub: &HubHandle,
    idle_timeout: Option<Duration>,
) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => return SessionEnd::IdleTimeout,
            },
            None => stream.next().await,
        };

        let decoded = match next {
            Some(Ok(Message::Text(text))) => decode(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => decode(&data),
            Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
            // Ping/pong only refresh the idle deadline
            Some(Ok(_)) => continue,
            Some(Err(e)) => return SessionEnd::ReadFailed(e.to_string()),
        };

        match decoded {
            Ok(Inbound::Chat(mut chat)) => {
                chat.username = identity.to_string();

                if hub.broadcast(Envelope::ChatMessage(chat)).await.is_err() {
                    return SessionEnd::HubUnavailable;
                }
            }
            Ok(Inbound::Ignored { kind }) => {
                tracing::debug!(identity, kind = %kind, "Dropping non-chat frame");
            }
            Err(e) => {
                tracing::debug!(identity, "Failed to decode frame: {}", e);
                return SessionEnd::ReadFailed(e.to_string());
            }
        }
    }
}

async fn write_loop<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Envelope>,
    ping_interval: Option<Duration>,
    write_timeout: Duration,
) -> SessionEnd
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let frame = tokio::select! {
            next = queue.recv() => match next {
                Some(envelope) => match envelope.encode() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!("Failed to serialize {} envelope: {}", envelope.kind(), e);
                        continue;
                    }
                },
                None => {
                    let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
                    return SessionEnd::Evicted;
                }
            },
            _ = tick(&mut ping) => Message::Ping(Bytes::new()),
        };

        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Write error: {}", e);
                return SessionEnd::WriteFailed(e.to_string());
            }
            Err(_) => {
                tracing::warn!("Write timed out after {:?}", write_timeout);
                return SessionEnd::WriteFailed("write timed out".to_string());
            }
        }
    }
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        // No keepalive: wait forever
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use futures::channel::mpsc as fmpsc;

    type ClientSide = (
        fmpsc::UnboundedSender<Result<Message, axum::Error>>,
        fmpsc::UnboundedReceiver<Message>,
    );

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            idle_timeout: None,
            ping_interval: None,
            ..SessionConfig::default()
        }
    }

    fn connect(
        hub: &HubHandle,
        identity: &str,
        config: SessionConfig,
    ) -> (ClientSide, tokio::task::JoinHandle<SessionEnd>) {
        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, client_rx) = fmpsc::unbounded();
        let task = tokio::spawn(run_session(
            server_tx,
            server_rx,
            identity.to_string(),
            hub.clone(),
            config,
        ));
        ((client_tx, client_rx), task)
    }

    async fn next_envelope(rx: &mut fmpsc::UnboundedReceiver<Message>) -> Envelope {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(1), rx.next())
                .await
                .expect("timed out")
                .expect("socket closed");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_username_is_overwritten_with_identity() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((tx, mut rx), _session) = connect(&hub, "alice", quiet_config());

        let frame = r#"{"type":"chatMessage","payload":{"username":"mallory","message":"hi"}}"#;
        tx.unbounded_send(Ok(Message::Text(frame.into()))).unwrap();

        loop {
            if let Envelope::ChatMessage(chat) = next_envelope(&mut rx).await {
                assert_eq!(chat.username, "alice");
                assert_eq!(chat.message, "hi");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_non_string_username_is_still_relayed() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((tx, mut rx), session) = connect(&hub, "alice", quiet_config());

        let frame = r#"{"type":"chatMessage","payload":{"username":42,"message":"hi"}}"#;
        tx.unbounded_send(Ok(Message::Text(frame.into()))).unwrap();

        loop {
            if let Envelope::ChatMessage(chat) = next_envelope(&mut rx).await {
                assert_eq!(chat.username, "alice");
                assert_eq!(chat.message, "hi");
                break;
            }
        }
        assert!(!session.is_finished());
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_session() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((tx, _rx), session) = connect(&hub, "alice", quiet_config());

        tx.unbounded_send(Ok(Message::Text("{oops".into()))).unwrap();

        let end = session.await.unwrap();
        assert!(matches!(end, SessionEnd::ReadFailed(_)));
        assert_eq!(hub.snapshot().await.unwrap().users, 0);
    }

    #[tokio::test]
    async fn test_non_chat_frames_are_not_forwarded() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((tx, _rx), _session) = connect(&hub, "alice", quiet_config());

        let frame = r#"{"type":"system","payload":{"text":"fake"}}"#;
        tx.unbounded_send(Ok(Message::Text(frame.into()))).unwrap();
        tx.unbounded_send(Ok(Message::Ping(Bytes::new()))).unwrap();
        let frame = r#"{"type":"chatMessage","payload":{"message":"real"}}"#;
        tx.unbounded_send(Ok(Message::Binary(Bytes::from(frame)))).unwrap();

        // Barrier: wait until the real chat has been recorded
        let history = loop {
            let snapshot = hub.snapshot().await.unwrap();
            if !snapshot.history.is_empty() {
                break snapshot.history;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "real");
        assert_eq!(history[0].username, "alice");
    }

    #[tokio::test]
    async fn test_close_unregisters_once() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((tx, _rx), session) = connect(&hub, "alice", quiet_config());

        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        assert_eq!(session.await.unwrap(), SessionEnd::Closed);
        assert_eq!(hub.snapshot().await.unwrap().users, 0);
    }

    #[tokio::test]
    async fn test_write_failure_triggers_unregister() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let ((_tx, rx), session) = connect(&hub, "alice", quiet_config());

        // Peer stops reading; the next write fails
        drop(rx);
        hub.broadcast(Envelope::chat("bob", "anyone?")).await.unwrap();

        let end = tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(end, SessionEnd::WriteFailed(_)));
        assert_eq!(hub.snapshot().await.unwrap().users, 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_session() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_millis(50)),
            ping_interval: None,
            ..SessionConfig::default()
        };
        let ((_tx, _rx), session) = connect(&hub, "alice", config);

        let end = tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::IdleTimeout);
    }

    #[tokio::test]
    async fn test_keepalive_pings_are_sent() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let config = SessionConfig {
            idle_timeout: None,
            ping_interval: Some(Duration::from_millis(20)),
            ..SessionConfig::default()
        };
        let ((_tx, mut rx), _session) = connect(&hub, "alice", config);

        let got_ping = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(msg) = rx.next().await {
                if matches!(msg, Message::Ping(_)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(got_ping);
    }

    #[tokio::test]
    async fn test_dead_hub_refuses_session() {
        let (hub, task) = Hub::spawn(&HubConfig::default());
        task.abort();
        let _ = task.await;

        let (_client, session) = connect(&hub, "alice", quiet_config());
        assert_eq!(session.await.unwrap(), SessionEnd::HubUnavailable);
    }
}
