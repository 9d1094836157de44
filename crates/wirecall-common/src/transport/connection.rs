use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, UnixStream};

use crate::protocol::error::{Result, WirecallError};
use crate::protocol::message::{Response, RpcValue};
use crate::transport::framing::{write_frame, FrameBuffer};
use crate::transport::serializer::SerializerStack;
use crate::transport::tls::{self, ClientTls};
use crate::transport::Endpoint;

/// Marker trait for the byte streams a connection can own: plain TCP, Unix
/// domain sockets and both TLS stream directions all qualify.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> RawStream for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection lifecycle.
///
/// Clients walk `Idle -> Established -> Pending -> Done` and may be recycled
/// from `Done` back to `Established` by the pool; any failure or close lands
/// in `Closed`. Server-side connections sit in `Active` while accepted and
/// are never pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Active,
    Established,
    Pending,
    Done,
    Closed,
}

/// The per-socket state machine shared by client and server.
///
/// Owns the byte stream, the receive buffer and the negotiated serializer
/// stack. Exactly one socket per connection; client connections are recycled
/// through the pool only at `Done` with no error observed.
pub struct Connection {
    stream: Box<dyn RawStream>,
    role: Role,
    status: Status,
    buffer: FrameBuffer,
    serializers: Arc<Mutex<SerializerStack>>,
    peer: String,
    tls_configured: bool,
    verified_peer: bool,
}

impl Connection {
    /// Dials the endpoint and performs the optional TLS handshake,
    /// returning an `Established` client-role connection.
    ///
    /// A TLS handshake whose failure is certificate-related (untrusted
    /// chain, hostname mismatch) is a fatal
    /// [`WirecallError::SslPeerVerification`]; other dial failures are
    /// retryable [`WirecallError::Connection`] errors.
    pub async fn connect(
        endpoint: &Endpoint,
        client_tls: Option<&ClientTls>,
        serializers: SerializerStack,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let peer = endpoint.to_string();

        let stream: Box<dyn RawStream> = match endpoint {
            Endpoint::Tcp { host, port } => {
                let tcp = tokio::time::timeout(
                    connect_timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| {
                    WirecallError::Connection(format!("connection to {peer} timed out"))
                })?
                .map_err(|e| WirecallError::Connection(format!("failed to connect to {peer}: {e}")))?;

                let _ = tcp.set_nodelay(true);

                match client_tls {
                    Some(client_tls) => {
                        let tls_stream = client_tls
                            .connector
                            .connect(client_tls.server_name.clone(), tcp)
                            .await
                            .map_err(|e| tls::classify_handshake_error(e, &peer))?;
                        Box::new(tls_stream)
                    }
                    None => Box::new(tcp),
                }
            }
            Endpoint::Unix { path } => {
                let stream = tokio::time::timeout(connect_timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| {
                        WirecallError::Connection(format!("connection to {peer} timed out"))
                    })?
                    .map_err(|e| {
                        WirecallError::Connection(format!("failed to connect to {peer}: {e}"))
                    })?;
                Box::new(stream)
            }
        };

        tracing::debug!(peer = %peer, "connection established");

        Ok(Connection {
            stream,
            role: Role::Client,
            status: Status::Established,
            buffer: FrameBuffer::new(),
            serializers: Arc::new(Mutex::new(serializers)),
            peer,
            tls_configured: client_tls.is_some(),
            // rustls verified the server chain and hostname during the
            // handshake; reaching this point means the peer checked out.
            verified_peer: client_tls.is_some(),
        })
    }

    /// Wraps an accepted server-side stream in an `Active` connection.
    pub fn accepted(
        stream: Box<dyn RawStream>,
        peer: String,
        serializers: SerializerStack,
        tls_configured: bool,
        verified_peer: bool,
    ) -> Self {
        Connection {
            stream,
            role: Role::Server,
            status: Status::Active,
            buffer: FrameBuffer::new(),
            serializers: Arc::new(Mutex::new(serializers)),
            peer,
            tls_configured,
            verified_peer,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn tls_configured(&self) -> bool {
        self.tls_configured
    }

    pub fn verified_peer(&self) -> bool {
        self.verified_peer
    }

    /// Serializes and sends one message as a single frame.
    pub async fn send_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = self.serializers.lock().unwrap().dump(message)?;

        if let Err(e) = write_frame(&mut self.stream, &payload).await {
            self.status = Status::Closed;
            return Err(e);
        }

        Ok(())
    }

    /// Reads until one whole frame is buffered and returns its payload.
    ///
    /// A peer close while a frame is awaited is a connection error: the
    /// caller had a message outstanding.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; 8 * 1024];
            let n = self.stream.read(&mut chunk).await.map_err(|e| {
                self.status = Status::Closed;
                WirecallError::Connection(format!("failed to read from {}: {e}", self.peer))
            })?;

            if n == 0 {
                self.status = Status::Closed;
                return Err(WirecallError::Connection(format!(
                    "connection closed by peer [{}]",
                    self.peer
                )));
            }

            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Decodes a frame payload through the negotiated serializer stack.
    pub fn decode(&self, frame: &[u8]) -> Result<RpcValue> {
        self.serializers.lock().unwrap().load(frame)
    }

    /// Receives and decodes one response (client role).
    pub async fn recv_response(&mut self) -> Result<Response> {
        let frame = self.recv_frame().await?;
        let value = self.decode(&frame)?;
        serde_json::from_value(value)
            .map_err(|e| WirecallError::Decode(format!("malformed response payload: {e}")))
    }

    /// Whether undecoded bytes remain in the receive buffer. A connection
    /// with leftover bytes is desynchronized and must not be reused.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Cheap liveness probe for pooled connections.
    ///
    /// Polls a one-byte read with a zero deadline: a pending read means the
    /// socket is idle and open, while EOF, an error, or unsolicited bytes
    /// (which would desynchronize the next call) all disqualify the
    /// connection from reuse.
    pub async fn is_alive(&mut self) -> bool {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut byte)).await {
            Err(_) => true,
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => false,
            Ok(Err(_)) => false,
        }
    }

    /// Splits into independently owned read and write halves (server side),
    /// so deferred async completions can write while the reader keeps
    /// accepting frames.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (rd, wr) = tokio::io::split(self.stream);

        let reader = ConnectionReader {
            rd,
            buffer: self.buffer,
            serializers: self.serializers.clone(),
            peer: self.peer.clone(),
            tls_configured: self.tls_configured,
            verified_peer: self.verified_peer,
        };
        let writer = ConnectionWriter {
            wr,
            serializers: self.serializers,
            peer: self.peer,
        };

        (reader, writer)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("status", &self.status)
            .field("peer", &self.peer)
            .field("verified_peer", &self.verified_peer)
            .finish_non_exhaustive()
    }
}

/// Read half of a split server-side connection.
pub struct ConnectionReader {
    rd: ReadHalf<Box<dyn RawStream>>,
    buffer: FrameBuffer,
    serializers: Arc<Mutex<SerializerStack>>,
    peer: String,
    tls_configured: bool,
    verified_peer: bool,
}

impl ConnectionReader {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn tls_configured(&self) -> bool {
        self.tls_configured
    }

    pub fn verified_peer(&self) -> bool {
        self.verified_peer
    }

    /// Returns the next frame payload, or `None` once the peer has closed
    /// the connection cleanly.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; 8 * 1024];
            let n = self.rd.read(&mut chunk).await.map_err(|e| {
                WirecallError::Connection(format!("failed to read from {}: {e}", self.peer))
            })?;

            if n == 0 {
                return Ok(None);
            }

            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Decodes a frame payload through the negotiated serializer stack.
    ///
    /// Kept separate from [`next_frame`](Self::next_frame) so the server's
    /// peer verification gate can reject buffered data without attempting to
    /// decode it.
    pub fn decode(&self, frame: &[u8]) -> Result<RpcValue> {
        self.serializers.lock().unwrap().load(frame)
    }
}

/// Write half of a split server-side connection.
///
/// Shares the serializer stack with its reader, so responses always use the
/// serializer the peer negotiated.
pub struct ConnectionWriter {
    wr: WriteHalf<Box<dyn RawStream>>,
    serializers: Arc<Mutex<SerializerStack>>,
    peer: String,
}

impl ConnectionWriter {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = self.serializers.lock().unwrap().dump(message)?;
        write_frame(&mut self.wr, &payload).await
    }
}
