//! In-process transport
//!
//! [`ChannelTransport`] hands every connection to a [`ChannelServer`], which
//! a test drives frame by frame.

use crate::error::TransportError;
use crate::transport::{Connection, Transport, TransportEvent, TransportMessage};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

const FRAME_BUFFER: usize = 256;

/// Client side: connects to the paired [`ChannelServer`]
#[derive(Clone)]
pub struct ChannelTransport {
    connections: mpsc::UnboundedSender<ServerConnection>,
    failures: Arc<AtomicU32>,
}

/// Server side: accepts connections opened by the paired transport
pub struct ChannelServer {
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, ChannelServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: tx,
                failures: Arc::new(AtomicU32::new(0)),
            },
            ChannelServer { connections: rx },
        )
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        let (client_tx, server_rx) = mpsc::channel(FRAME_BUFFER);
        let (server_tx, client_rx) = mpsc::channel(FRAME_BUFFER);
        self.connections
            .send(ServerConnection {
                url: url.to_string(),
                incoming: server_rx,
                outgoing: server_tx,
            })
            .map_err(|_| TransportError::ChannelClosed)?;

        Ok(Connection::new(client_tx, client_rx, Vec::new()))
    }
}

impl ChannelServer {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.connections.recv().await
    }
}

/// Server end of one connection
pub struct ServerConnection {
    pub url: String,
    incoming: mpsc::Receiver<TransportMessage>,
    outgoing: mpsc::Sender<TransportEvent>,
}

impl ServerConnection {
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outgoing
            .send(TransportEvent::Frame(text.into()))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub async fn send_op(&self, op: u8, d: Value) -> Result<(), TransportError> {
        self.send_raw(json!({ "op": op, "d": d }).to_string()).await
    }

    pub async fn send_dispatch(&self, name: &str, sequence: u64, d: Value) -> Result<(), TransportError> {
        self.send_raw(json!({ "op": 0, "t": name, "s": sequence, "d": d }).to_string())
            .await
    }

    /// Hang up with a close code
    pub async fn close(&self, code: u16) -> Result<(), TransportError> {
        self.outgoing
            .send(TransportEvent::Closed { code: Some(code) })
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Next message from the client
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.incoming.recv().await
    }

    /// Next text frame from the client, parsed; `None` once the client
    /// closes or goes away
    pub async fn recv_frame(&mut self) -> Option<Value> {
        loop {
            match self.incoming.recv().await? {
                TransportMessage::Text(text) => return serde_json::from_str(&text).ok(),
                TransportMessage::Close(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut server) = ChannelTransport::pair();
        let mut client = transport.connect("test://gateway").await.unwrap();
        let mut conn = server.accept().await.unwrap();
        assert_eq!(conn.url, "test://gateway");

        conn.send_op(10, json!({"heartbeat_interval": 1000})).await.unwrap();
        match client.recv().await {
            Some(TransportEvent::Frame(text)) => assert!(text.contains("heartbeat_interval")),
            other => panic!("unexpected {other:?}"),
        }

        client
            .sender()
            .send(TransportMessage::Text(r#"{"op":1,"d":null}"#.into()))
            .await
            .unwrap();
        assert_eq!(conn.recv_frame().await.unwrap()["op"], 1);
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let (transport, _server) = ChannelTransport::pair();
        transport.fail_next(2);
        assert!(transport.connect("a").await.is_err());
        assert!(transport.connect("a").await.is_err());
        assert!(transport.connect("a").await.is_ok());
    }
}
