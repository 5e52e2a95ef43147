//! How a health signal leaves the process.
//!
//! A transport is driven with `go` when its signal is up and `stop` when
//! it is down. Both calls must be idempotent; sync components call them
//! repeatedly with the same value.

mod file;
mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use file::FileTransport;
pub use tcp::TcpTransport;

/// An external signaling channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Signal "up".
    async fn go(&self, message: &str) -> Result<(), TransportError>;

    /// Signal "down".
    async fn stop(&self, message: &str) -> Result<(), TransportError>;
}

/// A signal delivered to a custom consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Go(String),
    Stop(String),
}

/// Hands every call to a custom consumer over a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn go(&self, message: &str) -> Result<(), TransportError> {
        self.tx
            .send(TransportSignal::Go(message.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    async fn stop(&self, message: &str) -> Result<(), TransportError> {
        self.tx
            .send(TransportSignal::Stop(message.to_string()))
            .map_err(|_| TransportError::Closed)
    }
}
