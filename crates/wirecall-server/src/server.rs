use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{mpsc, watch};

use wirecall_common::auth::TokenAuth;
use wirecall_common::protocol::{
    ExceptionKind, Request, Response, Result, RpcException, WirecallError,
};
use wirecall_common::transport::connection::RawStream;
use wirecall_common::transport::tls::{server_acceptor, TlsAcceptor};
use wirecall_common::transport::{
    Connection, ConnectionReader, Endpoint, Serializer, SerializerStack, TlsMaterial,
};

use crate::handler::{Completion, Handler};
use crate::registry::HandlerRegistry;

/// Delay between a shutdown request and the accept loop stopping, so
/// responses already in flight can drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Accepted connections are force-closed after this long without receiving a
/// complete frame, so abandoned peers cannot leak sockets.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub token: Option<String>,
    pub serializer: Serializer,
    pub fallback_serializer: Option<Serializer>,
    pub tls: Option<TlsMaterial>,
}

impl ServerConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            token: None,
            serializer: Serializer::default(),
            fallback_serializer: None,
            tls: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_fallback_serializer(mut self, serializer: Serializer) -> Self {
        self.fallback_serializer = Some(serializer);
        self
    }

    pub fn with_tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, label: String },
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(Box<dyn RawStream>, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok((Box::new(stream), peer.to_string()))
            }
            Listener::Unix { listener, label } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), label.clone()))
            }
        }
    }
}

/// Requests the owning server to stop accepting connections.
///
/// Clonable and safe to trigger from inside a handler (shutting a server
/// down over RPC is the usual way to stop it remotely).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Schedules shutdown after the grace delay. Returns immediately.
    pub fn shutdown(&self) {
        tracing::info!(
            "shutting down in {} seconds",
            SHUTDOWN_GRACE.as_secs()
        );
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            let _ = tx.send(true);
        });
    }
}

/// Wirecall RPC server.
///
/// Bound at construction; [`run`](Server::run) drives the accept loop until
/// a [`ShutdownHandle`] fires. Handlers and async checks may be registered
/// at any time, including while running.
pub struct Server {
    config: ServerConfig,
    listener: Listener,
    acceptor: Option<TlsAcceptor>,
    registry: Arc<RwLock<HandlerRegistry>>,
    auth: TokenAuth,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Validates the configuration and binds the listening socket.
    ///
    /// Configured TLS material is checked for existence here; a missing
    /// key/cert/CA file is a fatal configuration error.
    pub async fn bind(config: ServerConfig) -> Result<Server> {
        let acceptor = match (&config.tls, &config.endpoint) {
            (Some(material), Endpoint::Tcp { .. }) => {
                material.validate()?;
                Some(server_acceptor(material)?)
            }
            (Some(_), Endpoint::Unix { .. }) => {
                return Err(WirecallError::Config(
                    "TLS is not supported over Unix sockets".into(),
                ));
            }
            (None, _) => None,
        };

        let listener = match &config.endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await.map_err(|e| {
                    WirecallError::Connection(format!(
                        "failed to bind to {}: {e}",
                        config.endpoint
                    ))
                })?;
                Listener::Tcp(listener)
            }
            Endpoint::Unix { path } => {
                // A stale socket file from a previous run would make bind fail.
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path).map_err(|e| {
                    WirecallError::Connection(format!(
                        "failed to bind to {}: {e}",
                        config.endpoint
                    ))
                })?;
                Listener::Unix {
                    listener,
                    label: config.endpoint.to_string(),
                }
            }
        };

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Server {
            auth: TokenAuth::from_option(config.token.clone()),
            config,
            listener,
            acceptor,
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            shutdown_tx,
        })
    }

    /// The actual bound address (TCP endpoints only; useful with port 0).
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix { .. } => None,
        }
    }

    /// Registers `handler` under `name`, exposing its declared methods.
    pub fn add_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.write().unwrap().add_handler(name, handler);
    }

    /// Registers a predicate deciding, per method name, whether the method
    /// follows the completion protocol. Consulted once per method at
    /// handler-registration time.
    pub fn add_async_check(&self, check: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.registry.write().unwrap().add_async_check(check);
    }

    /// Drops every registered handler and async check.
    pub fn clear_handlers(&self) {
        self.registry.write().unwrap().clear();
    }

    /// Trivial liveness probe, handy to expose through a handler.
    pub fn alive(&self) -> bool {
        true
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Runs the accept loop until shutdown. Blocks the calling task.
    pub async fn run(self) -> Result<()> {
        tracing::info!("RPC server started");
        tracing::info!(endpoint = %self.config.endpoint, "listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "connection established");
                            let acceptor = self.acceptor.clone();
                            let registry = self.registry.clone();
                            let auth = self.auth.clone();
                            let serializers = SerializerStack::new(
                                self.config.serializer,
                                self.config.fallback_serializer,
                            );
                            tokio::spawn(async move {
                                handle_connection(
                                    stream, peer, acceptor, serializers, registry, auth,
                                )
                                .await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("RPC server stopped");
        Ok(())
    }
}

/// Drives one accepted connection: optional TLS handshake, the peer
/// verification gate, then the request loop.
async fn handle_connection(
    stream: Box<dyn RawStream>,
    peer: String,
    acceptor: Option<TlsAcceptor>,
    serializers: SerializerStack,
    registry: Arc<RwLock<HandlerRegistry>>,
    auth: TokenAuth,
) {
    let (stream, tls_configured, verified_peer): (Box<dyn RawStream>, bool, bool) = match acceptor
    {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                let verified = tls_stream.get_ref().1.peer_certificates().is_some();
                (Box::new(tls_stream), true, verified)
            }
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => (stream, false, false),
    };

    let connection = Connection::accepted(stream, peer, serializers, tls_configured, verified_peer);
    let (mut reader, mut writer) = connection.into_split();

    // All responses of this connection, sync or deferred, serialize through
    // one writer task. Outstanding completions hold a sender clone, pinning
    // the write half for their whole lifetime.
    let (writer_tx, mut writer_rx) = mpsc::channel::<Response>(16);
    let writer_peer = writer.peer().to_string();
    let writer_task = tokio::spawn(async move {
        while let Some(response) = writer_rx.recv().await {
            if let Err(e) = writer.send_message(&response).await {
                tracing::error!(peer = %writer_peer, error = %e, "failed to send response");
                break;
            }
        }
    });

    loop {
        let frame = match tokio::time::timeout(INACTIVITY_TIMEOUT, reader.next_frame()).await {
            Err(_) => {
                tracing::debug!(peer = %reader.peer(), "closing connection after inactivity");
                break;
            }
            Ok(Ok(None)) => {
                tracing::debug!(peer = %reader.peer(), "connection closed by peer");
                break;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Err(e)) => {
                tracing::error!(peer = %reader.peer(), error = %e, "connection failed");
                break;
            }
        };

        // Reject data from unverified peers before any decode attempt, and
        // process no further frames.
        if reader.tls_configured() && !reader.verified_peer() {
            tracing::error!(peer = %reader.peer(), "could not verify peer");
            let exception = RpcException::new(
                ExceptionKind::SslPeerVerificationFailed,
                "Could not verify peer.",
            );
            let _ = writer_tx.send(Response::from_exception(&exception)).await;
            break;
        }

        let request: Request = match reader
            .decode(&frame)
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| {
                    WirecallError::Decode(format!("malformed request payload: {e}"))
                })
            }) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(peer = %reader.peer(), error = %e, "failed to decode request");
                break;
            }
        };

        process_request(request, &reader, &registry, &auth, &writer_tx).await;
    }

    drop(writer_tx);
    let _ = writer_task.await;
}

enum Dispatch {
    Value(wirecall_common::RpcValue),
    InFlight,
}

/// Runs one request through the pipeline and enqueues its response, unless
/// the call went async (its completion will enqueue the response later).
async fn process_request(
    request: Request,
    reader: &ConnectionReader,
    registry: &Arc<RwLock<HandlerRegistry>>,
    auth: &TokenAuth,
    writer_tx: &mpsc::Sender<Response>,
) {
    let peer = reader.peer();

    match dispatch_request(&request, peer, registry, auth, writer_tx).await {
        Ok(Dispatch::Value(value)) => {
            let _ = writer_tx.send(Response::success(value)).await;
        }
        Ok(Dispatch::InFlight) => {}
        Err(err) => {
            let exception = RpcException::from_error(&err);
            tracing::error!(
                peer = %peer,
                expr = %request.message,
                error = %err,
                "request failed"
            );
            let _ = writer_tx.send(Response::from_exception(&exception)).await;
        }
    }
}

/// Authentication, resolution and invocation. Any error is converted into a
/// structured-exception response by the caller; the pipeline completes or
/// fails per request, never partially.
async fn dispatch_request(
    request: &Request,
    peer: &str,
    registry: &Arc<RwLock<HandlerRegistry>>,
    auth: &TokenAuth,
    writer_tx: &mpsc::Sender<Response>,
) -> Result<Dispatch> {
    if !auth.validate(request.token.as_deref()) {
        return Err(WirecallError::InvalidToken(format!(
            "Token missing or invalid while calling: {}",
            request.message
        )));
    }

    tracing::info!(peer = %peer, expr = %request.message, "call");
    tracing::debug!(args = ?request.args);

    let resolved = registry.read().unwrap().resolve(&request.message)?;

    if resolved.is_async {
        let (completion, completion_rx) = Completion::channel();
        let args = request.args.clone();

        let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| {
            resolved
                .handler
                .call_with_completion(&resolved.method, &args, completion);
        }));
        if invoked.is_err() {
            return Err(WirecallError::Remote(RpcException::new(
                ExceptionKind::RemoteException,
                format!("handler panicked in '{}'", request.message),
            )));
        }

        let writer_tx = writer_tx.clone();
        let peer = peer.to_string();
        let expr = request.message.clone();
        tokio::spawn(async move {
            match completion_rx.await {
                Ok(Ok(value)) => {
                    let _ = writer_tx.send(Response::success(value).mark_async()).await;
                }
                Ok(Err(err)) => {
                    let failure = classify_handler_error(err);
                    let exception = RpcException::from_error(&failure);
                    tracing::error!(peer = %peer, expr = %expr, error = %failure, "async handler failed");
                    let _ = writer_tx
                        .send(Response::from_exception(&exception).mark_async())
                        .await;
                }
                // Dropped without firing: the response stays pending, which
                // is the completion protocol's contract.
                Err(_) => {
                    tracing::debug!(peer = %peer, expr = %expr, "completion dropped without firing");
                }
            }
        });

        return Ok(Dispatch::InFlight);
    }

    // Direct-return methods run on the blocking pool; awaiting here keeps
    // responses ordered per connection while other connections proceed.
    let handler = resolved.handler.clone();
    let method = resolved.method.clone();
    let args = request.args.clone();

    match tokio::task::spawn_blocking(move || handler.call(&method, &args)).await {
        Ok(Ok(value)) => Ok(Dispatch::Value(value)),
        Ok(Err(err)) => Err(classify_handler_error(err)),
        Err(join_err) => Err(WirecallError::Remote(RpcException::new(
            ExceptionKind::RemoteException,
            format!("handler panicked in '{}': {join_err}", request.message),
        ))),
    }
}

/// Converts a handler failure into the taxonomy.
///
/// Typed failures the handler raised deliberately pass through with their
/// kind; anything else becomes a `RemoteException` whose backtrace is the
/// error's cause chain.
fn classify_handler_error(err: anyhow::Error) -> WirecallError {
    let err = match err.downcast::<WirecallError>() {
        Ok(typed) => return typed,
        Err(err) => err,
    };
    let err = match err.downcast::<RpcException>() {
        Ok(exception) => return WirecallError::Remote(exception),
        Err(err) => err,
    };

    let backtrace: Vec<String> = err.chain().skip(1).map(|cause| cause.to_string()).collect();
    WirecallError::Remote(
        RpcException::new(ExceptionKind::RemoteException, err.to_string())
            .with_backtrace(backtrace),
    )
}
