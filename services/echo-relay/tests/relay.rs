//! End-to-end tests against a real listener on an ephemeral port

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use echo_relay::{ClientConfig, ConnectionRegistry, Listener, ReconnectingClient, ServerConfig, WsConnector};

const ORIGIN_OK: &str = "http://localhost:3000";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: ServerConfig) -> (SocketAddr, ConnectionRegistry) {
    let listener = Listener::bind_to("127.0.0.1:0".parse().unwrap(), &config)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = listener.registry();
    tokio::spawn(listener.run());
    (addr, registry)
}

async fn open(addr: SocketAddr, origin: Option<&str>, protocol: Option<&str>) -> Result<Client, WsError> {
    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
    }
    if let Some(protocol) = protocol {
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocol).unwrap());
    }
    connect_async(request).await.map(|(stream, _)| stream)
}

async fn open_ok(addr: SocketAddr) -> Client {
    open(addr, Some(ORIGIN_OK), Some("echo-protocol")).await.unwrap()
}

/// Next text or binary frame, skipping control frames
async fn next_data(client: &mut Client) -> Option<Frame> {
    loop {
        match timeout(Duration::from_secs(5), client.next()).await.ok()?? {
            Ok(frame @ (Frame::Text(_) | Frame::Binary(_))) => return Some(frame),
            Ok(Frame::Ping(_) | Frame::Pong(_) | Frame::Frame(_)) => continue,
            Ok(Frame::Close(_)) | Err(_) => return None,
        }
    }
}

async fn wait_for_live(registry: &ConnectionRegistry, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.live() != expected {
        assert!(
            Instant::now() < deadline,
            "expected {} live sessions, found {}",
            expected,
            registry.live()
        );
        sleep(Duration::from_millis(10)).await;
    }
}

fn rejected_status(result: Result<Client, WsError>) -> StatusCode {
    match result {
        Err(WsError::Http(response)) => response.status(),
        Err(other) => panic!("Expected an HTTP rejection, got {:?}", other),
        Ok(_) => panic!("Expected the handshake to be rejected"),
    }
}

#[tokio::test]
async fn test_text_round_trip() {
    let (addr, registry) = start_server(ServerConfig::default()).await;
    let mut client = open_ok(addr).await;
    assert_eq!(registry.live(), 1);

    client.send(Frame::Text("hello".to_string())).await.unwrap();
    assert_eq!(next_data(&mut client).await, Some(Frame::Text("hello".to_string())));
}

#[tokio::test]
async fn test_binary_round_trip() {
    let (addr, _registry) = start_server(ServerConfig::default()).await;
    let mut client = open_ok(addr).await;

    let payload: Vec<u8> = (0u8..10).collect();
    client.send(Frame::Binary(payload.clone())).await.unwrap();
    assert_eq!(next_data(&mut client).await, Some(Frame::Binary(payload)));
}

#[tokio::test]
async fn test_server_negotiates_sub_protocol() {
    let (addr, _registry) = start_server(ServerConfig::default()).await;
    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static(ORIGIN_OK));
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("echo-protocol"));

    let (_stream, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "echo-protocol"
    );
}

#[tokio::test]
async fn test_rejections_leave_counter_unchanged() {
    let (addr, registry) = start_server(ServerConfig::default()).await;

    let bad_origin = open(addr, Some("http://evil.example"), Some("echo-protocol")).await;
    assert_eq!(rejected_status(bad_origin), StatusCode::FORBIDDEN);

    let no_origin = open(addr, None, Some("echo-protocol")).await;
    assert_eq!(rejected_status(no_origin), StatusCode::FORBIDDEN);

    let no_protocol = open(addr, Some(ORIGIN_OK), None).await;
    assert_eq!(rejected_status(no_protocol), StatusCode::BAD_REQUEST);

    assert_eq!(registry.live(), 0);
}

#[tokio::test]
async fn test_plain_http_request_gets_not_found() {
    let (addr, registry) = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{:?}", response);
    assert_eq!(registry.live(), 0);

    // WebSocket clients are still served afterwards
    let mut client = open_ok(addr).await;
    client.send(Frame::Text("after".to_string())).await.unwrap();
    assert_eq!(next_data(&mut client).await, Some(Frame::Text("after".to_string())));
}

#[tokio::test]
async fn test_capacity_limit_and_release() {
    let config = ServerConfig {
        max_connections: 2,
        ..Default::default()
    };
    let (addr, registry) = start_server(config).await;

    let mut first = open_ok(addr).await;
    let mut second = open_ok(addr).await;
    assert_eq!(registry.live(), 2);

    let third = open(addr, Some(ORIGIN_OK), Some("echo-protocol")).await;
    assert_eq!(rejected_status(third), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(registry.live(), 2);

    // The first two are still served
    second.send(Frame::Text("still open".to_string())).await.unwrap();
    assert_eq!(
        next_data(&mut second).await,
        Some(Frame::Text("still open".to_string()))
    );

    first.close(None).await.unwrap();
    wait_for_live(&registry, 1).await;

    let mut third = open_ok(addr).await;
    third.send(Frame::Text("third".to_string())).await.unwrap();
    assert_eq!(next_data(&mut third).await, Some(Frame::Text("third".to_string())));
}

#[tokio::test]
async fn test_message_size_boundary() {
    let (addr, registry) = start_server(ServerConfig::default()).await;

    let mut client = open_ok(addr).await;
    let exact = "a".repeat(1_048_576);
    client.send(Frame::Text(exact.clone())).await.unwrap();
    assert_eq!(next_data(&mut client).await, Some(Frame::Text(exact)));

    let over = vec![7u8; 1_048_577];
    // The server may drop the link before the write finishes
    let _ = client.send(Frame::Binary(over)).await;
    assert_eq!(next_data(&mut client).await, None);
    wait_for_live(&registry, 0).await;
}

#[tokio::test]
async fn test_peer_disconnect_frees_slot() {
    let (addr, registry) = start_server(ServerConfig::default()).await;

    let client = open_ok(addr).await;
    assert_eq!(registry.live(), 1);
    drop(client);
    wait_for_live(&registry, 0).await;
}

#[tokio::test]
async fn test_reconnecting_client_connects_and_shuts_down() {
    let (addr, registry) = start_server(ServerConfig::default()).await;
    let config = ClientConfig {
        url: format!("ws://{}/", addr),
        reconnect_interval_ms: 50,
        send_interval_ms: 20,
        ..Default::default()
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut client = ReconnectingClient::new(&config, WsConnector::from_config(&config));
    let state = client.state_manager();
    let task = tokio::spawn(async move {
        client
            .run_until(async move {
                let _ = stop_rx.await;
            })
            .await;
        client
    });

    wait_for_live(&registry, 1).await;
    assert!(state.is_connected());
    sleep(Duration::from_millis(100)).await;

    stop_tx.send(()).unwrap();
    let client = task.await.unwrap();
    assert!(client.messages_sent() > 0);
    wait_for_live(&registry, 0).await;
}

#[tokio::test]
async fn test_reconnecting_client_waits_for_server() {
    // Reserve a port, then free it so the first attempts fail
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let config = ClientConfig {
        url: format!("ws://{}/", addr),
        reconnect_interval_ms: 50,
        send_interval_ms: 1000,
        ..Default::default()
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut client = ReconnectingClient::new(&config, WsConnector::from_config(&config));
    let state = client.state_manager();
    let task = tokio::spawn(async move {
        client
            .run_until(async move {
                let _ = stop_rx.await;
            })
            .await;
    });

    sleep(Duration::from_millis(200)).await;
    assert!(!state.is_connected());

    let listener = Listener::bind_to(addr, &ServerConfig::default()).await.unwrap();
    let registry = listener.registry();
    tokio::spawn(listener.run());

    wait_for_live(&registry, 1).await;
    assert!(state.is_connected());

    stop_tx.send(()).unwrap();
    task.await.unwrap();
}
