//! Line-oriented TCP connections.
//!
//! Every protocol spoken by the cluster is newline-delimited text: one command
//! or reply per line. [`LineConnection`] wraps a [`TcpStream`] in a
//! [`LinesCodec`] and splits it so that the read half stays with the session
//! loop while the write half ([`LineWriter`]) can be shared with tasks the
//! session spawns, such as a queue subscription.

use crate::network::error::{NetworkError, NetworkResult};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Upper bound for a single protocol line.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Cloneable handle to the write half of a [`LineConnection`].
#[derive(Clone)]
pub struct LineWriter {
    sink: Arc<AsyncMutex<FramedWrite<OwnedWriteHalf, LinesCodec>>>,
}

impl LineWriter {
    /// Writes one line; the trailing newline is added by the codec.
    pub async fn send_line(&self, line: &str) -> NetworkResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(line).await?;
        Ok(())
    }

    /// Flushes pending output and shuts down the write direction.
    pub async fn close(&self) -> NetworkResult<()> {
        let mut sink = self.sink.lock().await;
        SinkExt::<&str>::close(&mut *sink).await?;
        Ok(())
    }
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter").finish_non_exhaustive()
    }
}

/// A framed, line-oriented TCP connection.
pub struct LineConnection {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: LineWriter,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl LineConnection {
    pub fn new(stream: TcpStream) -> NetworkResult<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: LineWriter {
                sink: Arc::new(AsyncMutex::new(FramedWrite::new(
                    write_half,
                    LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
                ))),
            },
            peer_addr,
            local_addr,
        })
    }

    /// Opens a connection to `host:port`.
    pub async fn connect(host: &str, port: u16) -> NetworkResult<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?;
        Self::new(stream)
    }

    /// Reads the next line. Returns `Ok(None)` once the peer has closed the stream.
    pub async fn read_line(&mut self) -> NetworkResult<Option<String>> {
        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Reads the next line, treating end of stream as an error.
    pub async fn expect_line(&mut self) -> NetworkResult<String> {
        self.read_line().await?.ok_or(NetworkError::ConnectionClosed)
    }

    pub async fn send_line(&self, line: &str) -> NetworkResult<()> {
        self.writer.send_line(line).await
    }

    pub fn writer(&self) -> LineWriter {
        self.writer.clone()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends `line` and waits for the single reply line.
    pub async fn request(&mut self, line: &str) -> NetworkResult<String> {
        self.send_line(line).await?;
        self.expect_line().await
    }

    pub async fn close(self) {
        if let Err(e) = self.writer.close().await {
            debug!("Error while closing connection to {}: {}", self.peer_addr, e);
        }
    }
}

/// Connects to a server, discards its banner, sends `message` and returns the reply.
///
/// This is the single round trip that peer brokers and the name service client
/// are built on. `deadline` bounds the whole exchange when set.
pub async fn request_reply(
    host: &str,
    port: u16,
    message: &str,
    deadline: Option<Duration>,
) -> NetworkResult<String> {
    let exchange = async {
        let mut connection = LineConnection::connect(host, port).await?;
        connection.expect_line().await?;
        let reply = connection.request(message).await?;
        connection.close().await;
        Ok::<_, NetworkError>(reply)
    };

    match deadline {
        Some(limit) => timeout(limit, exchange).await?,
        None => exchange.await,
    }
}
