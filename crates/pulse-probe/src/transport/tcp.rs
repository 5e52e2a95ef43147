//! TCP transport: a listening socket is open while the signal is up.
//!
//! Orchestrators that probe with a plain TCP connect see the port accept
//! connections on `go` and refuse them after `stop`.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Transport;
use crate::error::TransportError;

struct Listening {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

pub struct TcpTransport {
    address: String,
    listening: Mutex<Option<Listening>>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listening: Mutex::new(None),
        }
    }

    /// Address actually bound, while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.local_addr)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn go(&self, _message: &str) -> Result<(), TransportError> {
        let mut listening = self.listening.lock().await;
        if listening.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(&self.address).await?;
        let local_addr = listener.local_addr()?;
        let accept_loop = tokio::spawn(async move {
            // Accept and immediately drop; the connect itself is the signal.
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(%peer, "probe connection accepted");
                drop(stream);
            }
        });

        info!(%local_addr, "signal socket listening");
        *listening = Some(Listening {
            local_addr,
            accept_loop,
        });
        Ok(())
    }

    async fn stop(&self, _message: &str) -> Result<(), TransportError> {
        if let Some(listening) = self.listening.lock().await.take() {
            listening.accept_loop.abort();
            // Wait for the listener to be dropped so the port is released.
            let _ = listening.accept_loop.await;
            info!(local_addr = %listening.local_addr, "signal socket closed");
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(listening) = self.listening.get_mut().take() {
            listening.accept_loop.abort();
        }
    }
}
