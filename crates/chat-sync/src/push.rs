//! Push channel client
//!
//! Connects to the gateway, identifies with a bearer token, heartbeats at the interval the
//! gateway announces, and feeds every dispatch into the [`SyncSession`]. Each reconnect
//! after the first ready session triggers a full resync to heal the gap.

use std::time::Duration;

use chat_core::{PresenceSnapshotEvent, PushEvent, Snowflake};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::session::SyncSession;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_INVALID_SESSION: u8 = 7;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close code for a rejected token; reconnecting cannot help
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Wire frame `{op, t, s, d}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<Value>,
}

impl Frame {
    fn op(op: u8, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user_id: Snowflake,
    #[serde(default)]
    online: Vec<Snowflake>,
}

/// Connection state published by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Connecting,
    /// Identified; dispatches are flowing
    Ready,
    Disconnected,
    /// Stopped for good (shutdown or rejected token)
    Stopped,
}

/// How one connection ended
enum Exit {
    Shutdown,
    Closed(Option<u16>),
}

pub struct PushClient {
    session: SyncSession,
    url: String,
    token: String,
    backoff: RetryPolicy,
}

impl PushClient {
    pub fn new(
        session: SyncSession,
        url: impl Into<String>,
        token: impl Into<String>,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            session,
            url: url.into(),
            token: token.into(),
            backoff,
        }
    }

    /// Run the connection loop in the background
    pub fn spawn(self) -> PushHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(PushStatus::Connecting);
        let task = tokio::spawn(self.run(shutdown_rx, status_tx));
        PushHandle {
            shutdown: shutdown_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, status: watch::Sender<PushStatus>) {
        let mut ever_ready = false;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            status.send_replace(PushStatus::Connecting);

            let mut ready = false;
            let result = self
                .connect_once(&mut shutdown, &status, ever_ready, &mut ready)
                .await;
            if ready {
                ever_ready = true;
                attempt = 0;
            }

            match result {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Closed(Some(CLOSE_AUTHENTICATION_FAILED))) => {
                    error!(url = %self.url, "Gateway rejected the token, giving up");
                    break;
                }
                Ok(Exit::Closed(code)) => {
                    info!(close_code = ?code, "Push channel closed");
                }
                Err(err) => {
                    warn!(error = %err, "Push channel failed");
                }
            }
            status.send_replace(PushStatus::Disconnected);

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting push channel");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        status.send_replace(PushStatus::Stopped);
        info!("Push client stopped");
    }

    async fn connect_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        status: &watch::Sender<PushStatus>,
        reconnect: bool,
        ready: &mut bool,
    ) -> SyncResult<Exit> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Push(format!("connect to {}: {e}", self.url)))?;
        let (mut sink, mut stream) = socket.split();
        debug!(url = %self.url, "Push channel connected");

        // Re-armed with the announced interval once Hello arrives
        let idle = Duration::from_secs(3600);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + idle, idle);
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return Ok(Exit::Shutdown);
                }
                _ = heartbeat.tick() => {
                    let beat = Frame::op(OP_HEARTBEAT, sequence.map(Value::from));
                    send_frame(&mut sink, &beat).await?;
                    trace!(sequence = ?sequence, "Heartbeat sent");
                }
                message = stream.next() => {
                    let text = match message {
                        None => return Ok(Exit::Closed(None)),
                        Some(Err(e)) => return Err(SyncError::Push(e.to_string())),
                        Some(Ok(Message::Close(frame))) => {
                            return Ok(Exit::Closed(frame.map(|f| u16::from(f.code))));
                        }
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    let frame: Frame = serde_json::from_str(&text)
                        .map_err(|e| SyncError::Push(format!("undecodable frame: {e}")))?;

                    match frame.op {
                        OP_HELLO => {
                            let hello: Hello = decode(frame.d)?;
                            let period = Duration::from_millis(hello.heartbeat_interval.max(1));
                            let start = tokio::time::Instant::now() + period;
                            heartbeat = tokio::time::interval_at(start, period);
                            let identify = Frame::op(
                                OP_IDENTIFY,
                                Some(serde_json::json!({ "token": self.token })),
                            );
                            send_frame(&mut sink, &identify).await?;
                            trace!(heartbeat_interval = hello.heartbeat_interval, "Identify sent");
                        }
                        OP_DISPATCH => {
                            if frame.s.is_some() {
                                sequence = frame.s;
                            }
                            let is_ready = frame.t.as_deref() == Some("READY");
                            if is_ready {
                                let payload: Ready = decode(frame.d)?;
                                self.on_ready(payload, reconnect);
                                *ready = true;
                                status.send_replace(PushStatus::Ready);
                            } else {
                                self.on_dispatch(frame.t.as_deref(), frame.d);
                            }
                        }
                        OP_HEARTBEAT => {
                            let beat = Frame::op(OP_HEARTBEAT, sequence.map(Value::from));
                            send_frame(&mut sink, &beat).await?;
                        }
                        OP_HEARTBEAT_ACK => trace!("Heartbeat acknowledged"),
                        OP_INVALID_SESSION => {
                            warn!("Gateway invalidated the session");
                            return Ok(Exit::Closed(Some(CLOSE_AUTHENTICATION_FAILED)));
                        }
                        op => debug!(op, "Ignoring unexpected op code"),
                    }
                }
            }
        }
    }

    fn on_ready(&self, ready: Ready, reconnect: bool) {
        info!(user_id = %ready.user_id, online = ready.online.len(), reconnect, "Push channel ready");
        self.session
            .apply_push(PushEvent::PresenceSnapshot(PresenceSnapshotEvent {
                online: ready.online,
            }));

        if reconnect {
            let session = self.session.clone();
            tokio::spawn(async move {
                if let Err(err) = session.resync_all().await {
                    warn!(error = %err, "Resync after reconnect failed");
                }
            });
        }
    }

    fn on_dispatch(&self, event_type: Option<&str>, data: Option<Value>) {
        let event = match data.map(serde_json::from_value::<PushEvent>) {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(event_type = ?event_type, error = %e, "Dropping undecodable dispatch");
                return;
            }
            None => {
                debug!(event_type = ?event_type, "Dispatch without payload");
                return;
            }
        };

        let effects = self.session.apply_push(event);
        if effects.is_empty() {
            return;
        }
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(err) = session.run_effects(effects).await {
                warn!(error = %err, "Follow-up of push event failed");
            }
        });
    }
}

/// Handle to a running push client
pub struct PushHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<PushStatus>,
    task: JoinHandle<()>,
}

impl PushHandle {
    pub fn status(&self) -> watch::Receiver<PushStatus> {
        self.status.clone()
    }

    /// Wait until the client is identified, or stopped
    pub async fn ready(&mut self) -> bool {
        self.status
            .wait_for(|s| matches!(s, PushStatus::Ready | PushStatus::Stopped))
            .await
            .is_ok_and(|s| *s == PushStatus::Ready)
    }

    /// Stop the client and wait for it to finish
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Push client task failed");
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> SyncResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| SyncError::Push(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SyncError::Push(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(data: Option<Value>) -> SyncResult<T> {
    serde_json::from_value(data.unwrap_or(Value::Null))
        .map_err(|e| SyncError::Push(format!("malformed payload: {e}")))
}
