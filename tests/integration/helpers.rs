//! Shared test helpers for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use ticker_core::config::AppConfig;
use ticker_realtime::{MemoryPubSub, RelayEngine};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// A relay served on an ephemeral local port, fed by in-memory pub/sub.
pub struct TestApp {
    pub addr: SocketAddr,
    pub config: Arc<AppConfig>,
    pub engine: Arc<RelayEngine>,
    pub pubsub: Arc<MemoryPubSub>,
    pub router: Router,
}

/// Response from a one-shot HTTP request
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    /// Start a relay on 127.0.0.1 with the default configuration.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Start a relay after adjusting the default configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        configure(&mut config);
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        let config = Arc::new(config);

        let pubsub = Arc::new(MemoryPubSub::new(1024));
        let engine = Arc::new(
            RelayEngine::start(&config, pubsub.clone())
                .await
                .expect("Failed to start relay engine"),
        );

        let state = ticker_api::AppState::new(config.clone(), engine.clone());
        let router = ticker_api::build_router(state);

        let listener = tokio::net::TcpListener::bind(config.bind_address())
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("local addr");

        let app = router.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            config,
            engine,
            pubsub,
            router,
        }
    }

    /// The channel the relay is subscribed to.
    pub fn channel(&self) -> &str {
        &self.config.pubsub.channel
    }

    /// Open a WebSocket client and wait until the relay has registered it.
    pub async fn connect(&self) -> Client {
        let expected = self.engine.registry.len() + 1;
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", self.addr))
            .await
            .expect("WebSocket handshake failed");
        self.wait_for_clients(expected).await;
        ws
    }

    /// Complete a WebSocket handshake over raw TCP and hand back the socket.
    ///
    /// The caller never reads from it, so the relay's writes back up.
    pub async fn connect_stalled(&self) -> TcpStream {
        let expected = self.engine.registry.len() + 1;
        let mut stream = TcpStream::connect(self.addr).await.expect("TCP connect");
        let request = format!(
            "GET / HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut head = Vec::new();
        let mut buf = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed during handshake");
            head.push(buf[0]);
        }
        let head = String::from_utf8_lossy(&head);
        assert!(head.starts_with("HTTP/1.1 101"), "unexpected handshake: {}", head);

        self.wait_for_clients(expected).await;
        stream
    }

    /// Publish on the relayed channel.
    pub async fn publish(&self, payload: impl Into<bytes::Bytes>) {
        self.pubsub.publish(self.channel(), payload).await;
    }

    /// Poll until exactly `n` clients are registered.
    pub async fn wait_for_clients(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.engine.registry.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} clients, registry has {}",
                n,
                self.engine.registry.len()
            )
        });
    }

    /// Send a GET through the router without a socket.
    pub async fn get(&self, uri: &str) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }
}

/// Next data frame from the relay, skipping keepalive traffic.
pub async fn next_data(ws: &mut Client) -> Message {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(msg)) => return msg,
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("WebSocket closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Next text frame from the relay.
pub async fn next_text(ws: &mut Client) -> String {
    match next_data(ws).await {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

/// Asserts nothing arrives on `ws` for a short while.
pub async fn assert_silent(ws: &mut Client) {
    let got = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(got.is_err(), "unexpected frame: {:?}", got);
}
