use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::trace;

use crate::error::TransportError;
use crate::transport::{Connection, Transport, TransportEvent, TransportMessage};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 1024;

/// WebSocket transport
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        WsTransport
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<TransportMessage>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_BUFFER);

        // Outgoing frames
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match msg {
                    TransportMessage::Text(text) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    TransportMessage::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        });

        // Incoming frames
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Close(frame)) => {
                        let code = frame.map(|f| u16::from(f.code));
                        let _ = in_tx.send(TransportEvent::Closed { code }).await;
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        trace!("Received ping: {:?}", data);
                        continue;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if in_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(Connection::new(out_tx, in_rx, vec![writer, reader]))
    }
}
