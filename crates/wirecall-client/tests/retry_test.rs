//! Client-side retry and call-semantics tests against raw loopback servers.
//!
//! These tests speak the wire protocol by hand so the client's behavior is
//! pinned independently of the server crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use wirecall_client::{Client, ClientConfig};
use wirecall_common::protocol::{Request, Response, WirecallError};
use wirecall_common::transport::{FrameBuffer, Serializer};
use wirecall_common::Endpoint;

async fn read_request(stream: &mut tokio::net::TcpStream) -> Request {
    let mut buffer = FrameBuffer::new();
    loop {
        if let Some(frame) = buffer.next_frame().unwrap() {
            let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
            return serde_json::from_value(value).unwrap();
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed while a frame was expected");
        buffer.extend(&chunk[..n]);
    }
}

async fn write_response(stream: &mut tokio::net::TcpStream, response: &Response) {
    let payload = Serializer::Json.dump(response).unwrap();
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&payload).await.unwrap();
}

#[tokio::test]
async fn test_retry_ceiling_counts_connection_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    // Accept and immediately close every connection, so each attempt fails
    // after the request is in flight.
    tokio::spawn(async move {
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        }
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port())).with_max_retries(2);
    let client = Client::new(config).unwrap();

    let result = client.call("test.foo", vec![]).await;
    assert!(matches!(result, Err(WirecallError::Connection(_))));

    // Let the accept loop drain the backlog before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Initial attempt plus exactly two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_refused_connection_fails_after_retries() {
    // Bind and drop to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port())).with_max_retries(1);
    let client = Client::new(config).unwrap();

    let started = std::time::Instant::now();
    let result = client.call("test.foo", vec![]).await;

    assert!(matches!(result, Err(WirecallError::Connection(_))));
    // One retry means one 200 ms backoff was taken.
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_call_resolves_once_with_result() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        assert_eq!(request.message, "echo.reflect");
        assert_eq!(request.token.as_deref(), Some("sekrit"));
        write_response(&mut stream, &Response::success(request.args[0].clone())).await;
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port())).with_token("sekrit");
    let client = Client::new(config).unwrap();

    let result = client
        .call("echo.reflect", vec![json!({"value": 17})])
        .await
        .unwrap();
    assert_eq!(result, json!({"value": 17}));
}

#[tokio::test]
async fn test_exception_response_surfaces_as_typed_failure_without_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let served = Arc::new(AtomicUsize::new(0));
    let served_clone = served.clone();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            served_clone.fetch_add(1, Ordering::SeqCst);
            let _ = read_request(&mut stream).await;
            let exception = wirecall_common::protocol::RpcException::new(
                wirecall_common::protocol::ExceptionKind::InvalidToken,
                "Token missing or invalid",
            );
            write_response(&mut stream, &Response::from_exception(&exception)).await;
        }
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port())).with_max_retries(5);
    let client = Client::new(config).unwrap();

    let result = client.call("test.foo", vec![]).await;
    assert!(matches!(result, Err(WirecallError::InvalidToken(_))));

    // A delivered exception response is a final outcome, not a retry cause.
    assert_eq!(served.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pool_reuses_connection_across_sequential_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_clone = accepts.clone();

    // Serve any number of requests per connection so a reused connection
    // never needs a second accept.
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };
            accepts_clone.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buffer = FrameBuffer::new();
                loop {
                    let frame = loop {
                        if let Some(frame) = buffer.next_frame().unwrap() {
                            break frame;
                        }
                        let mut chunk = [0u8; 4096];
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buffer.extend(&chunk[..n]),
                        }
                    };
                    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
                    let request: Request = serde_json::from_value(value).unwrap();
                    write_response(&mut stream, &Response::success(request.args[0].clone()))
                        .await;
                }
            });
        }
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()));
    let client = Client::new(config).unwrap();

    for i in 0..3 {
        let result = client.call("echo.reflect", vec![json!(i)]).await.unwrap();
        assert_eq!(result, json!(i));
    }

    // One socket carried all three calls.
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_call_with_deadline_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept but never respond.
    tokio::spawn(async move {
        let mut kept = Vec::new();
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                kept.push(stream);
            }
        }
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()));
    let client = Client::new(config).unwrap();

    let result = client
        .call_with_deadline("slow.method", vec![], Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(WirecallError::Timeout(100))));
}

#[test]
fn test_call_blocking_outside_a_runtime() {
    // A plain std test: the client must bring its own runtime.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            listener.set_nonblocking(true).unwrap();
            let listener = TcpListener::from_std(listener).unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            write_response(&mut stream, &Response::success(request.args[0].clone())).await;
        });
    });

    let config = ClientConfig::new(Endpoint::tcp("127.0.0.1", addr.port()));
    let client = Client::new(config).unwrap();

    let result = client
        .call_blocking("echo.reflect", vec![json!("round trip")])
        .unwrap();
    assert_eq!(result, json!("round trip"));

    server.join().unwrap();
}
