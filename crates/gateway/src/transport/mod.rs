//! Transport abstraction layer
//!
//! A [`Transport`] opens one bidirectional text-frame stream per connection.
//! Frames travel over tokio channels; the tasks pumping a real socket are
//! owned by the [`Connection`] and stop when it is dropped.

pub mod channel;
pub mod ws;

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Client → server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    /// Close the connection with this code
    Close(u16),
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { code: Option<u16> },
    Error(String),
}

/// Opens connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// One open connection
pub struct Connection {
    outbound: mpsc::Sender<TransportMessage>,
    inbound: mpsc::Receiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        outbound: mpsc::Sender<TransportMessage>,
        inbound: mpsc::Receiver<TransportEvent>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    /// A sender for outbound frames, usable from other tasks
    pub fn sender(&self) -> mpsc::Sender<TransportMessage> {
        self.outbound.clone()
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Ask the server to close and wait up to `grace` for it to hang up
    pub async fn close(mut self, code: u16, grace: Duration) {
        if self.outbound.send(TransportMessage::Close(code)).await.is_err() {
            return;
        }
        let drained = async {
            while let Some(event) = self.inbound.recv().await {
                if matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_)) {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(grace, drained).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ensure the transport trait is object-safe
    fn _assert_transport_object_safe(_: &dyn Transport) {}
}
