use std::sync::{Arc, OnceLock};
use std::time::Duration;

use wirecall_common::protocol::{Request, Response, Result, RpcValue, WirecallError};
use wirecall_common::transport::tls::{client_tls, ClientTls};
use wirecall_common::transport::{Connection, Endpoint, Serializer, SerializerStack, Status};

use crate::pool::ConnectionPool;

/// Retries attempted after the initial connection failure (so a call makes
/// at most `max_retries + 1` connection attempts in total).
pub const DEFAULT_MAX_RETRIES: u32 = 9;

/// Reusable finished connections kept per client.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Fixed backoff between reconnect attempts.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Default timeout for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration, immutable once the client is constructed.
///
/// # Example
///
/// ```
/// use wirecall_client::ClientConfig;
/// use wirecall_common::transport::Serializer;
/// use wirecall_common::Endpoint;
///
/// let config = ClientConfig::new(Endpoint::tcp("localhost", 7331))
///     .with_token("superdupersecret")
///     .with_serializer(Serializer::Json)
///     .with_fallback_serializer(Serializer::Cbor)
///     .with_max_retries(3);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub token: Option<String>,
    pub serializer: Serializer,
    pub fallback_serializer: Option<Serializer>,
    pub max_retries: u32,
    pub pool_capacity: usize,
    pub tls: Option<wirecall_common::transport::TlsMaterial>,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            token: None,
            serializer: Serializer::default(),
            fallback_serializer: None,
            max_retries: DEFAULT_MAX_RETRIES,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            tls: None,
            connect_timeout: CONNECT_TIMEOUT,
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

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_tls(mut self, material: wirecall_common::transport::TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Immutable connection-attempt descriptor.
///
/// Copied with an incremented counter on each retry, never mutated in place,
/// so concurrent retries cannot alias each other's state.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    tries: u32,
}

impl Attempt {
    fn first() -> Self {
        Self { tries: 0 }
    }

    fn next(self) -> Self {
        Self {
            tries: self.tries + 1,
        }
    }
}

/// Wirecall RPC client.
///
/// Every call resolves exactly once, either to the result value or to a
/// typed failure; structured exceptions coming back from the server are
/// reconstructed into their matching [`WirecallError`] variant rather than
/// returned as values.
pub struct Client {
    config: ClientConfig,
    pool: ConnectionPool,
    tls: Option<Arc<ClientTls>>,
    blocking_runtime: OnceLock<tokio::runtime::Runtime>,
}

impl Client {
    /// Builds a client, loading TLS material eagerly when configured.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let tls = match (&config.tls, &config.endpoint) {
            (Some(material), Endpoint::Tcp { host, .. }) => {
                Some(Arc::new(client_tls(material, host)?))
            }
            (Some(_), Endpoint::Unix { .. }) => {
                return Err(WirecallError::Config(
                    "TLS is not supported over Unix sockets".into(),
                ));
            }
            (None, _) => None,
        };

        Ok(Self {
            pool: ConnectionPool::new(config.pool_capacity),
            config,
            tls,
            blocking_runtime: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Calls a remote method and returns its result.
    ///
    /// `message` is a `handler.method` expression. Transport failures are
    /// retried on a fresh connection with a fixed 200 ms backoff until the
    /// configured retry ceiling; the caller observes only the final outcome.
    pub async fn call(&self, message: &str, args: Vec<RpcValue>) -> Result<RpcValue> {
        let request =
            Request::new(message, args).with_token_opt(self.config.token.clone());

        let mut attempt = Attempt::first();
        loop {
            match self.dispatch(&request).await {
                Ok(response) => return unwrap_response(response),
                Err(err) if err.is_retryable() && attempt.tries < self.config.max_retries => {
                    attempt = attempt.next();
                    tracing::debug!(
                        peer = %self.config.endpoint,
                        tries = attempt.tries,
                        error = %err,
                        "retrying call on a new connection"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`call`](Self::call), but fails with [`WirecallError::Timeout`]
    /// once the deadline elapses, covering connect, retries and the wait for
    /// the response.
    pub async fn call_with_deadline(
        &self,
        message: &str,
        args: Vec<RpcValue>,
        deadline: Duration,
    ) -> Result<RpcValue> {
        tokio::time::timeout(deadline, self.call(message, args))
            .await
            .map_err(|_| WirecallError::Timeout(deadline.as_millis() as u64))?
    }

    /// Blocking variant of [`call`](Self::call).
    ///
    /// Outside a tokio runtime this drives a lazily built single-threaded
    /// runtime owned by the client. Inside a runtime it suspends only the
    /// current worker via `block_in_place`, which requires the multi-thread
    /// flavor; the event loop itself keeps running either way.
    pub fn call_blocking(&self, message: &str, args: Vec<RpcValue>) -> Result<RpcValue> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tokio::task::block_in_place(|| handle.block_on(self.call(message, args)))
            }
            Err(_) => {
                let runtime = self.blocking_runtime()?;
                runtime.block_on(self.call(message, args))
            }
        }
    }

    /// One full attempt: obtain a connection, send, await the response and
    /// recycle the connection on success.
    async fn dispatch(&self, request: &Request) -> Result<Response> {
        let mut conn = match self.pool.checkout().await {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        conn.set_status(Status::Pending);
        conn.send_message(request).await?;
        let response = conn.recv_response().await?;
        conn.set_status(Status::Done);

        self.pool.checkin(conn).await;
        Ok(response)
    }

    async fn connect(&self) -> Result<Connection> {
        Connection::connect(
            &self.config.endpoint,
            self.tls.as_deref(),
            SerializerStack::new(self.config.serializer, self.config.fallback_serializer),
            self.config.connect_timeout,
        )
        .await
    }

    fn blocking_runtime(&self) -> Result<&tokio::runtime::Runtime> {
        if let Some(runtime) = self.blocking_runtime.get() {
            return Ok(runtime);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                WirecallError::Config(format!("failed to build blocking runtime: {e}"))
            })?;

        Ok(self.blocking_runtime.get_or_init(|| runtime))
    }
}

/// Unwraps a response into the caller-visible outcome: results pass through,
/// exception mappings become typed failures.
fn unwrap_response(response: Response) -> Result<RpcValue> {
    match response.exception() {
        Some(exception) => Err(exception.into()),
        None => Ok(response.obj),
    }
}
