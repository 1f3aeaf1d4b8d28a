//! # Realtime Transport
//!
//! Owns the WebSocket to the voice endpoint and turns it into two channels:
//! an outbound queue of client messages and an inbound stream of
//! [`TransportEvent`]s consumed by the session worker.
//!
//! ## Task Layout:
//! ```text
//! session ──Outbound──▶ writer task ──▶ WebSocket sink
//! session ◀──TransportEvent── reader task ◀── WebSocket stream
//! ```
//! The writer sends the `setup` message before anything else. The reader maps
//! `setupComplete` to [`TransportEvent::Opened`], decodes every other JSON
//! frame (text or binary) into a [`ServerMessage`] and reports close/error
//! exactly once before it exits.
//!
//! ## Security:
//! The connect URL embeds the API key, so it is never logged.

use crate::error::{AppError, AppResult};
use crate::live::protocol::{ClientMessage, LiveConnectConfig, ServerMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

/// What the session asks the writer to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ClientMessage),
    Close,
}

/// Everything the session can learn from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server accepted the setup; audio may flow
    Opened,
    Message(ServerMessage),
    /// A frame that was not valid JSON for the protocol
    Undecodable(String),
    Closed(Option<String>),
    Error(String),
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Shuts the connection down: clean close first, hard abort after a timeout.
#[derive(Debug)]
pub struct ConnectionGuard {
    outbound: OutboundSender,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl ConnectionGuard {
    pub async fn close(&mut self, timeout: Duration) {
        // Already gone if the writer exited on its own
        let _ = self.outbound.send(Outbound::Close);

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(timeout, &mut writer).await.is_err() {
                warn!(timeout_ms = timeout.as_millis() as u64, "Close handshake timed out");
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// An established realtime channel.
#[derive(Debug)]
pub struct LiveChannel {
    pub outbound: OutboundSender,
    pub events: EventReceiver,
    pub guard: ConnectionGuard,
}

impl LiveChannel {
    /// Wrap existing channel ends. `writer`/`reader` are the tasks servicing
    /// them, if any.
    pub fn new(
        outbound: OutboundSender,
        events: EventReceiver,
        writer: Option<JoinHandle<()>>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        let guard = ConnectionGuard {
            outbound: outbound.clone(),
            writer,
            reader,
        };
        Self {
            outbound,
            events,
            guard,
        }
    }
}

/// Opens realtime channels. Swapped for a scripted fake in tests.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, config: &LiveConnectConfig) -> AppResult<LiveChannel>;
}

/// WebSocket connector for the hosted endpoint.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, config: &LiveConnectConfig) -> AppResult<LiveChannel> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::Connection("no API key configured".to_string()));
        }

        debug!(endpoint = %config.endpoint, model = %config.model, "Opening realtime channel");
        let (stream, response) = tokio_tungstenite::connect_async(config.url())
            .await
            .map_err(|e| AppError::Connection(format!("WebSocket connect failed: {}", e)))?;
        info!(status = %response.status(), "Realtime channel connected");

        let setup = config
            .setup_message()
            .to_json()
            .map_err(|e| AppError::Internal(format!("cannot encode setup message: {}", e)))?;

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            if let Err(e) = write.send(WsMessage::Text(setup)).await {
                let _ = writer_events.send(TransportEvent::Error(format!("setup send failed: {}", e)));
                return;
            }

            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Message(message) => {
                        let text = match message.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Dropping unencodable outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            let _ = writer_events
                                .send(TransportEvent::Error(format!("send failed: {}", e)));
                            return;
                        }
                    }
                    Outbound::Close => break,
                }
            }

            // Best effort: the peer may already be gone
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
            debug!("Realtime writer finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let events = match frame {
                    Ok(WsMessage::Text(text)) => decode_frame(&text),
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => decode_frame(&text),
                        Err(e) => vec![TransportEvent::Undecodable(format!(
                            "binary frame is not UTF-8: {}",
                            e
                        ))],
                    },
                    Ok(WsMessage::Close(close)) => {
                        let reason = close
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        let _ = event_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };
                for event in events {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed(None));
        });

        Ok(LiveChannel::new(
            outbound_tx,
            event_rx,
            Some(writer),
            Some(reader),
        ))
    }
}

/// Decode one JSON frame into the events it carries.
pub fn decode_frame(text: &str) -> Vec<TransportEvent> {
    match ServerMessage::parse(text) {
        Ok(message) => {
            let mut events = Vec::with_capacity(2);
            if message.is_setup_complete() {
                events.push(TransportEvent::Opened);
            }
            if message.server_content.is_some() || message.go_away.is_some() {
                events.push(TransportEvent::Message(message));
            }
            events
        }
        Err(e) => vec![TransportEvent::Undecodable(e.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_setup_complete() {
        assert_eq!(decode_frame(r#"{"setupComplete":{}}"#), vec![TransportEvent::Opened]);
    }

    #[test]
    fn test_decode_server_content() {
        let events = decode_frame(r#"{"serverContent":{"turnComplete":true}}"#);
        assert_eq!(events.len(), 1);
        match &events[0] {
            TransportEvent::Message(message) => assert!(message.is_turn_complete()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        let events = decode_frame("{not json");
        assert!(matches!(events.as_slice(), [TransportEvent::Undecodable(_)]));
    }

    #[test]
    fn test_decode_unrelated_message_yields_nothing() {
        assert!(decode_frame(r#"{"usageMetadata":{"totalTokenCount":3}}"#).is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_connection_error() {
        let config = LiveConnectConfig {
            endpoint: "wss://example.invalid/ws".to_string(),
            api_key: String::new(),
            model: "m".to_string(),
            voice: "v".to_string(),
            system_instruction: String::new(),
        };
        let result = WsConnector.connect(&config).await;
        assert!(matches!(result, Err(AppError::Connection(_))));
    }

    #[tokio::test]
    async fn test_guard_close_without_tasks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_event_tx, event_rx) = mpsc::unbounded_channel();
        let mut channel = LiveChannel::new(tx, event_rx, None, None);
        channel.guard.close(Duration::from_millis(10)).await;
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
