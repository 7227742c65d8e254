//! Task-per-connection TCP acceptor.

use crate::network::error::{NetworkError, NetworkResult};
use log::{debug, error, info};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Accepts connections and hands each one to its own task.
///
/// Every connection task receives a child of the listener's cancellation
/// token, so cancelling the listener also ends the sessions it started.
pub struct Listener {
    name: String,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(name: &str, host: &str, port: u16) -> NetworkResult<Self> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            NetworkError::ConnectionFailed(format!("Failed to bind to {}:{}: {}", host, port, e))
        })?;
        Self::from_listener(name, listener)
    }

    pub fn from_listener(name: &str, listener: TcpListener) -> NetworkResult<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            name: name.to_string(),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop on a background task until `shutdown` is cancelled.
    pub fn spawn<F, Fut>(self, shutdown: CancellationToken, handler: F) -> JoinHandle<()>
    where
        F: Fn(TcpStream, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            info!("{} listening on {}", self.name, self.local_addr);
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = self.listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("{} accepted connection from {}", self.name, peer_addr);
                        tokio::spawn(handler(stream, shutdown.child_token()));
                    }
                    Err(e) => error!("{} failed to accept connection: {}", self.name, e),
                }
            }
            info!("{} shutdown complete", self.name);
        })
    }
}
