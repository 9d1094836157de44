//! End-to-end tests driving a real server with a real client over loopback
//! sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use wirecall_client::{Client, ClientConfig};
use wirecall_common::protocol::WirecallError;
use wirecall_common::transport::Serializer;
use wirecall_common::{Endpoint, RpcValue};
use wirecall_server::{Completion, Handler, HandlerResult, Server, ServerConfig};

/// Echoes its first argument back and counts invocations. Only `foo` is
/// declared public; `bar` is dispatchable internally but not listed.
struct TestHandler {
    calls: AtomicUsize,
}

impl TestHandler {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Handler for TestHandler {
    fn methods(&self) -> Vec<String> {
        vec!["foo".into()]
    }

    fn call(&self, method: &str, args: &[RpcValue]) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            "foo" | "bar" => Ok(args.first().cloned().unwrap_or(RpcValue::Null)),
            other => anyhow::bail!("unhandled method {other}"),
        }
    }
}

/// Fires its completion from a background task after a delay.
struct DeferredHandler {
    delay: Duration,
}

impl Handler for DeferredHandler {
    fn methods(&self) -> Vec<String> {
        vec!["async_echo".into(), "async_never".into(), "plain".into()]
    }

    fn call(&self, _method: &str, _args: &[RpcValue]) -> HandlerResult {
        Ok(json!("plain result"))
    }

    fn call_with_completion(&self, method: &str, args: &[RpcValue], completion: Completion) {
        match method {
            "async_echo" => {
                let delay = self.delay;
                let value = args.first().cloned().unwrap_or(RpcValue::Null);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    completion.value(value);
                });
            }
            // Returns without firing: the response must stay pending.
            "async_never" => drop(completion),
            other => completion.resolve(self.call(other, args)),
        }
    }
}

async fn start_server(config: ServerConfig) -> (std::net::SocketAddr, wirecall_server::ShutdownHandle, Arc<TestHandler>) {
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handler = Arc::new(TestHandler::new());
    server.add_handler("test", handler.clone());
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.run());
    (addr, shutdown, handler)
}

fn client_for(addr: std::net::SocketAddr) -> Client {
    Client::new(ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()))).unwrap()
}

#[tokio::test]
async fn test_dispatch_correctness() {
    let (addr, _shutdown, _handler) =
        start_server(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0))).await;
    let client = client_for(addr);

    // Public method echoes its argument.
    let result = client.call("test.foo", vec![json!({"x": 7})]).await.unwrap();
    assert_eq!(result, json!({"x": 7}));

    // Unlisted method.
    assert!(matches!(
        client.call("test.bar", vec![]).await,
        Err(WirecallError::InvalidMethod(_))
    ));

    // Unknown object.
    assert!(matches!(
        client.call("missing.foo", vec![]).await,
        Err(WirecallError::InvalidObject(_))
    ));

    // Expression without a dot can never match a registration.
    assert!(matches!(
        client.call("bare", vec![]).await,
        Err(WirecallError::InvalidObject(_))
    ));
}

#[tokio::test]
async fn test_auth_gate_keeps_handler_untouched() {
    let config = ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)).with_token("superdupersecret");
    let (addr, _shutdown, handler) = start_server(config).await;

    // Wrong token.
    let client = Client::new(
        ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port())).with_token("guess"),
    )
    .unwrap();
    assert!(matches!(
        client.call("test.foo", vec![json!(1)]).await,
        Err(WirecallError::InvalidToken(_))
    ));

    // Missing token.
    let client = client_for(addr);
    assert!(matches!(
        client.call("test.foo", vec![json!(1)]).await,
        Err(WirecallError::InvalidToken(_))
    ));

    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

    // Correct token reaches the handler.
    let client = Client::new(
        ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()))
            .with_token("superdupersecret"),
    )
    .unwrap();
    assert_eq!(
        client.call("test.foo", vec![json!(1)]).await.unwrap(),
        json!(1)
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_method_responds_when_completion_fires() {
    let server = Server::bind(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    server.add_async_check(|method| method.starts_with("async_"));
    server.add_handler(
        "deferred",
        Arc::new(DeferredHandler {
            delay: Duration::from_millis(300),
        }),
    );
    tokio::spawn(server.run());

    let client = client_for(addr);

    let started = std::time::Instant::now();
    let result = client
        .call("deferred.async_echo", vec![json!("deferred value")])
        .await
        .unwrap();

    assert_eq!(result, json!("deferred value"));
    // The response waited for the completion, not the method return.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_async_method_without_completion_stays_pending() {
    let server = Server::bind(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    server.add_async_check(|method| method.starts_with("async_"));
    server.add_handler(
        "deferred",
        Arc::new(DeferredHandler {
            delay: Duration::ZERO,
        }),
    );
    tokio::spawn(server.run());

    let client = client_for(addr);

    // The handler returns immediately but never fires its completion, so
    // the only way out is the caller's deadline.
    let result = client
        .call_with_deadline("deferred.async_never", vec![], Duration::from_millis(250))
        .await;
    assert!(matches!(result, Err(WirecallError::Timeout(_))));

    // A method not matched by the async check still answers directly.
    let result = client.call("deferred.plain", vec![]).await.unwrap();
    assert_eq!(result, json!("plain result"));
}

#[tokio::test]
async fn test_handler_error_becomes_remote_exception() {
    struct Failing;
    impl Handler for Failing {
        fn methods(&self) -> Vec<String> {
            vec!["explode".into()]
        }
        fn call(&self, _method: &str, _args: &[RpcValue]) -> HandlerResult {
            Err(anyhow::anyhow!("division by zero").context("computing the answer"))
        }
    }

    let server = Server::bind(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    server.add_handler("calc", Arc::new(Failing));
    tokio::spawn(server.run());

    let client = client_for(addr);
    match client.call("calc.explode", vec![]).await {
        Err(WirecallError::Remote(exception)) => {
            assert_eq!(exception.message, "computing the answer");
            assert_eq!(exception.backtrace, vec!["division by zero".to_string()]);
        }
        other => panic!("expected remote exception, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fallback_serializer_answers_cbor_client() {
    let config = ServerConfig::new(Endpoint::tcp("127.0.0.1", 0))
        .with_serializer(Serializer::Json)
        .with_fallback_serializer(Serializer::Cbor);
    let (addr, _shutdown, handler) = start_server(config).await;

    let client = Client::new(
        ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()))
            .with_serializer(Serializer::Cbor),
    )
    .unwrap();

    // Two sequential calls: the second reuses the pooled connection, where
    // the server already switched to the fallback.
    for i in 0..2 {
        let result = client.call("test.foo", vec![json!(i)]).await.unwrap();
        assert_eq!(result, json!(i));
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unix_socket_transport() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirecall.sock");

    let server = Server::bind(ServerConfig::new(Endpoint::unix(&path)))
        .await
        .unwrap();
    server.add_handler("test", Arc::new(TestHandler::new()));
    tokio::spawn(server.run());

    let client = Client::new(ClientConfig::new(Endpoint::unix(&path))).unwrap();
    let result = client.call("test.foo", vec![json!("over unix")]).await.unwrap();
    assert_eq!(result, json!("over unix"));
}

#[tokio::test]
async fn test_clear_handlers_unregisters_objects() {
    let (addr, _shutdown, _handler) =
        start_server(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0))).await;
    let client = client_for(addr);

    assert_eq!(client.call("test.foo", vec![json!(1)]).await.unwrap(), json!(1));

    // The registry is shared with the running server, so clearing takes
    // effect immediately; re-bind a fresh server to exercise it.
    let server = Server::bind(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    server.add_handler("test", Arc::new(TestHandler::new()));
    server.clear_handlers();
    tokio::spawn(server.run());

    let client = client_for(addr);
    assert!(matches!(
        client.call("test.foo", vec![]).await,
        Err(WirecallError::InvalidObject(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_the_accept_loop() {
    let server = Server::bind(ServerConfig::new(Endpoint::tcp("127.0.0.1", 0)))
        .await
        .unwrap();
    let shutdown = server.shutdown_handle();
    let run_task = tokio::spawn(server.run());

    shutdown.shutdown();

    // The grace delay is two seconds; well within five the loop must stop.
    let result = tokio::time::timeout(Duration::from_secs(5), run_task)
        .await
        .expect("server did not stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}
