//! Test helpers for integration tests
//!
//! Provides utilities for spawning a gateway on an ephemeral port, issuing tokens, and
//! driving the WebSocket protocol by hand.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_common::{GatewayConfig, TokenService};
use chat_core::{PushEvent, Snowflake};
use chat_gateway::broadcast::RoutedEvent;
use chat_gateway::protocol::{GatewayMessage, OpCode};
use chat_gateway::GatewayState;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const TEST_SECRET: &str = "integration-test-secret-that-is-long-enough";

/// How long a test waits for any single frame
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway config with the given heartbeat timing
pub fn gateway_config(heartbeat_interval_ms: u64, heartbeat_timeout_ms: u64) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval_ms,
        heartbeat_timeout_ms,
        token_secret: TEST_SECRET.to_string(),
    }
}

/// Mint a gateway token for `user`
pub fn token_for(user: Snowflake) -> String {
    TokenService::new(TEST_SECRET)
        .issue(user, 3600, None)
        .expect("token encoding")
}

/// Gateway instance that manages lifecycle
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: GatewayState,
    pub client: Client,
    _handle: JoinHandle<()>,
}

impl TestGateway {
    /// Start a gateway with default heartbeat timing
    pub async fn start() -> Result<Self> {
        Self::start_with_config(gateway_config(15_000, 30_000)).await
    }

    pub async fn start_with_config(config: GatewayConfig) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let state = GatewayState::new(config);

        let serve_state = state.clone();
        let handle = tokio::spawn(async move {
            chat_gateway::serve(listener, serve_state).await.ok();
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            state,
            client,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    /// Publish an event through the HTTP ingress
    pub async fn publish(&self, recipients: &[Snowflake], event: PushEvent) -> Result<Response> {
        let routed = RoutedEvent::new(recipients.iter().copied(), event);
        Ok(self
            .client
            .post(format!("{}/events", self.base_url()))
            .json(&routed)
            .send()
            .await?)
    }

    /// Open a socket, read Hello, identify as `user` and wait for READY
    pub async fn identify(&self, user: Snowflake) -> Result<GatewayClient> {
        let mut client = GatewayClient::connect(&self.ws_url()).await?;
        client.expect_op(OpCode::Hello).await?;
        client.send_identify(&token_for(user)).await?;
        let ready = client.expect_dispatch("READY").await?;
        client.ready = ready.d;
        Ok(client)
    }

    /// Wait until the gateway's online set satisfies `predicate`
    pub async fn wait_for_online<F>(&self, predicate: F) -> Result<Vec<Snowflake>>
    where
        F: Fn(&[Snowflake]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let online = self.state.presence().online_users();
            if predicate(&online) {
                return Ok(online);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("online set never matched, last seen {online:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Raw WebSocket client speaking the gateway protocol
pub struct GatewayClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// READY payload, once identified
    pub ready: Option<serde_json::Value>,
}

/// How a socket ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closed {
    Code(u16),
    NoFrame,
}

impl GatewayClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .context("WebSocket connect")?;
        Ok(Self {
            socket,
            ready: None,
        })
    }

    pub async fn send(&mut self, message: &GatewayMessage) -> Result<()> {
        self.socket.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send_identify(&mut self, token: &str) -> Result<()> {
        let identify = serde_json::json!({ "op": 2, "d": { "token": token } });
        self.send_raw(&identify.to_string()).await
    }

    pub async fn heartbeat(&mut self) -> Result<()> {
        self.send_raw(r#"{"op":1,"d":null}"#).await
    }

    /// Next protocol frame, skipping control frames
    pub async fn recv(&mut self) -> Result<GatewayMessage> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .context("timed out waiting for a frame")?;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(GatewayMessage::from_json(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("socket closed: {frame:?}")
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("socket ended"),
            }
        }
    }

    pub async fn expect_op(&mut self, op: OpCode) -> Result<GatewayMessage> {
        let message = self.recv().await?;
        anyhow::ensure!(message.op == op, "expected {op}, got {message}");
        Ok(message)
    }

    /// Skip frames until a dispatch of `event_type`
    pub async fn expect_dispatch(&mut self, event_type: &str) -> Result<GatewayMessage> {
        loop {
            let message = self.recv().await?;
            if message.op == OpCode::Dispatch && message.t.as_deref() == Some(event_type) {
                return Ok(message);
            }
        }
    }

    /// Next dispatch decoded as a push event
    pub async fn next_event(&mut self) -> Result<PushEvent> {
        loop {
            let message = self.recv().await?;
            if message.op != OpCode::Dispatch {
                continue;
            }
            let data = message.d.context("dispatch without data")?;
            return Ok(serde_json::from_value(data)?);
        }
    }

    /// Read until the server closes the socket; text frames are discarded
    pub async fn wait_closed(&mut self, within: Duration) -> Result<Closed> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let next = tokio::time::timeout_at(deadline, self.socket.next())
                .await
                .context("socket was not closed in time")?;
            match next {
                Some(Ok(Message::Close(Some(frame)))) => return Ok(Closed::Code(u16::from(frame.code))),
                Some(Ok(Message::Close(None))) | None | Some(Err(_)) => return Ok(Closed::NoFrame),
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}

/// Assert response status and parse JSON body
pub async fn assert_json<T: DeserializeOwned>(response: Response, expected_status: StatusCode) -> Result<T> {
    let status = response.status();
    if status != expected_status {
        let body = response.text().await?;
        anyhow::bail!(
            "Expected status {}, got {}. Body: {}",
            expected_status,
            status,
            body
        );
    }
    Ok(response.json().await?)
}

/// Assert response status without parsing body
pub async fn assert_status(response: Response, expected_status: StatusCode) -> Result<()> {
    let status = response.status();
    if status != expected_status {
        let body = response.text().await?;
        anyhow::bail!(
            "Expected status {}, got {}. Body: {}",
            expected_status,
            status,
            body
        );
    }
    Ok(())
}
