//! Tunnel client: the one persistent WebSocket to the broker.
//!
//! Responsibilities:
//! - Connect (idempotent, shared in-flight attempt) and reconnect forever
//! - Writer task fed by an mpsc queue; every frame write is acknowledged
//! - Reader task: reassemble fragments, resolve correlated requests,
//!   forward every decoded message to the listener
//! - Keepalive pings (diagnostic only, never closes the link)
//! - On close/error: drop fragments, reject every in-flight request, reconnect
//!
//! Each established link gets an epoch; events from a stale link are ignored.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::protocol::{codec, Message, Reassembler};

use crate::config::BrokerSection;
use crate::transport::handshake;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Shared<BoxFuture<'static, Result<()>>>;

/// Close code reported when the socket fails without a close frame.
const ABNORMAL_CLOSE: i32 = -1;

/// Receives every decoded inbound message (push notifications and
/// correlated responses alike).
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, client: &TunnelClient, msg: Message);
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub connection_name: String,
    pub api_key: Option<String>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_frame_bytes: usize,
    pub reconnect_delay: Duration,
}

impl ClientOptions {
    pub fn new(url: &str, connection_name: impl Into<String>) -> Self {
        let defaults = BrokerSection::default();
        Self {
            url: handshake::normalize_broker_url(url),
            connection_name: connection_name.into(),
            api_key: None,
            ping_interval: Duration::from_millis(defaults.ping_interval_ms),
            ping_timeout: Duration::from_millis(defaults.ping_timeout_ms),
            max_frame_bytes: defaults.max_frame_bytes,
            reconnect_delay: Duration::ZERO,
        }
    }

    pub fn from_config(broker: &BrokerSection) -> Result<Self> {
        let url = broker.require_url()?;
        Ok(Self {
            api_key: broker.api_key.clone(),
            ping_interval: Duration::from_millis(broker.ping_interval_ms),
            ping_timeout: Duration::from_millis(broker.ping_timeout_ms),
            max_frame_bytes: broker.max_frame_bytes,
            reconnect_delay: Duration::from_millis(broker.reconnect_delay_ms),
            ..Self::new(url, broker.connection_name.clone())
        })
    }
}

/// One queued socket write; `ack` reports the write outcome.
struct Outbound {
    frame: WsMessage,
    ack: Option<oneshot::Sender<Result<()>>>,
}

struct Link {
    epoch: u64,
    out_tx: mpsc::Sender<Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

enum LinkState {
    Disconnected,
    Connecting(ConnectFuture),
    Connected(Link),
}

struct Inner {
    opts: ClientOptions,
    listener: Option<Arc<dyn MessageListener>>,
    state: Mutex<LinkState>,
    in_flight: DashMap<String, oneshot::Sender<Result<Message>>>,
    fragments: Mutex<Reassembler>,
    pong: Mutex<Option<oneshot::Sender<()>>>,
    epoch: AtomicU64,
    connect_timeout_ms: AtomicU64,
    ever_connected: AtomicBool,
    shutdown: AtomicBool,
}

/// Cheap cloneable handle; all clones share one connection.
#[derive(Clone)]
pub struct TunnelClient {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl TunnelClient {
    pub fn new(opts: ClientOptions, listener: Option<Arc<dyn MessageListener>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                opts,
                listener,
                state: Mutex::new(LinkState::Disconnected),
                in_flight: DashMap::new(),
                fragments: Mutex::new(Reassembler::new()),
                pong: Mutex::new(None),
                epoch: AtomicU64::new(0),
                connect_timeout_ms: AtomicU64::new(0),
                ever_connected: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.opts
    }

    pub fn is_connected(&self) -> bool {
        matches!(*lock(&self.inner.state), LinkState::Connected(_))
    }

    /// Number of correlated requests awaiting a response.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Connect to the broker.
    ///
    /// Resolves immediately when connected; joins the pending attempt when
    /// one is already running. `timeout` bounds the handshake and is reused
    /// for every automatic reconnect.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let attempt = {
            let mut state = lock(&self.inner.state);
            match &*state {
                LinkState::Connected(_) => {
                    tracing::debug!(url = %self.inner.opts.url, "already connected to broker");
                    return Ok(());
                }
                LinkState::Connecting(attempt) => attempt.clone(),
                LinkState::Disconnected => {
                    self.inner
                        .connect_timeout_ms
                        .store(millis(timeout), Ordering::Relaxed);
                    tracing::debug!(
                        url = %self.inner.opts.url,
                        connection = %self.inner.opts.connection_name,
                        "connecting to broker"
                    );
                    let task = tokio::spawn(self.clone().establish(timeout));
                    let attempt: ConnectFuture = async move {
                        task.await
                            .map_err(|e| TunnelError::Internal(format!("connect task failed: {e}")))?
                    }
                    .boxed()
                    .shared();
                    *state = LinkState::Connecting(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn establish(self, timeout: Duration) -> Result<()> {
        let opts = &self.inner.opts;
        let outcome = match handshake::build_request(
            &opts.url,
            &opts.connection_name,
            opts.api_key.as_deref(),
        ) {
            Ok(req) => match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(req)).await {
                Ok(Ok((ws, _resp))) => Ok(ws),
                Ok(Err(e)) => Err(TunnelError::Handshake(e.to_string())),
                Err(_) => Err(TunnelError::Handshake(format!(
                    "no handshake response within {} milliseconds",
                    millis(timeout)
                ))),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(ws) => match self.attach(ws) {
                Ok(()) => {
                    tracing::info!(url = %opts.url, "connected to broker");
                    Ok(())
                }
                Err(mut ws) => {
                    tracing::debug!(url = %opts.url, "shut down during handshake, closing new link");
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Cow::Borrowed("shutdown"),
                    };
                    let _ = ws.close(Some(frame)).await;
                    Err(TunnelError::ConnectionClosed {
                        code: i32::from(u16::from(CloseCode::Normal)),
                        reason: "shutdown".into(),
                    })
                }
            },
            Err(e) => {
                tracing::debug!(url = %opts.url, error = %e, "broker connection rejected");
                *lock(&self.inner.state) = LinkState::Disconnected;
                if self.inner.ever_connected.load(Ordering::Relaxed) {
                    self.schedule_reconnect();
                }
                Err(e)
            }
        }
    }

    /// Install a freshly opened socket as the current link. Hands the socket
    /// back when the client was shut down in the meantime.
    fn attach(&self, ws: WsStream) -> std::result::Result<(), WsStream> {
        let mut state = lock(&self.inner.state);
        if self.inner.shutdown.load(Ordering::SeqCst) {
            *state = LinkState::Disconnected;
            return Err(ws);
        }

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::channel::<Outbound>(1024);
        let epoch = self.inner.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let tasks = vec![
            tokio::spawn(write_loop(sink, out_rx, self.clone(), epoch)),
            tokio::spawn(read_loop(stream, self.clone(), epoch)),
            tokio::spawn(keepalive_loop(self.clone())),
        ];
        *state = LinkState::Connected(Link {
            epoch,
            out_tx,
            tasks,
        });
        self.inner.ever_connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn sender(&self) -> Result<mpsc::Sender<Outbound>> {
        match &*lock(&self.inner.state) {
            LinkState::Connected(link) if link.out_tx.is_closed() => Err(TunnelError::NotReady),
            LinkState::Connected(link) => Ok(link.out_tx.clone()),
            _ => Err(TunnelError::NotConnected),
        }
    }

    /// Send a message (fragmenting as needed) and wait for every frame write
    /// to be acknowledged.
    pub async fn send(&self, mut msg: Message, timeout: Option<Duration>) -> Result<()> {
        if msg.id.is_empty() {
            msg.id = Uuid::new_v4().to_string();
        }
        with_timeout(timeout, self.write_message(&msg)).await
    }

    /// Send a message and wait for the broker message whose `responseOf`
    /// matches its id.
    pub async fn send_and_get_response(
        &self,
        mut msg: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        if msg.id.is_empty() {
            msg.id = Uuid::new_v4().to_string();
        }

        let (tx, rx) = oneshot::channel();
        self.inner.in_flight.insert(msg.id.clone(), tx);
        let _entry = InFlightEntry {
            table: &self.inner.in_flight,
            id: msg.id.clone(),
        };

        with_timeout(timeout, async {
            self.write_message(&msg).await?;
            rx.await.map_err(|_| TunnelError::ConnectionClosed {
                code: ABNORMAL_CLOSE,
                reason: "request dropped".into(),
            })?
        })
        .await
    }

    async fn write_message(&self, msg: &Message) -> Result<()> {
        let out_tx = self.sender()?;
        let envelopes = codec::encode(msg, self.inner.opts.max_frame_bytes)?;

        let mut acks = Vec::with_capacity(envelopes.len());
        for env in &envelopes {
            let text = codec::to_frame(env)?;
            tracing::trace!(id = %env.id, fragment = env.fragment_no, frame = %text, "sending frame");
            let (ack_tx, ack_rx) = oneshot::channel();
            out_tx
                .send(Outbound {
                    frame: WsMessage::Text(text),
                    ack: Some(ack_tx),
                })
                .await
                .map_err(|_| TunnelError::NotReady)?;
            acks.push(ack_rx);
        }

        for ack in acks {
            ack.await.map_err(|_| TunnelError::ConnectionClosed {
                code: ABNORMAL_CLOSE,
                reason: "writer stopped".into(),
            })??;
        }
        Ok(())
    }

    /// Send a ping and wait up to `timeout` for the pong. Never closes the
    /// link; the result is for logging only.
    pub async fn ping(&self, timeout: Duration) -> bool {
        let Ok(out_tx) = self.sender() else {
            return false;
        };
        let (tx, rx) = oneshot::channel();
        *lock(&self.inner.pong) = Some(tx);

        tracing::debug!("sending ping to broker");
        let queued = out_tx
            .send(Outbound {
                frame: WsMessage::Ping(Vec::new()),
                ack: None,
            })
            .await;
        if queued.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Graceful local close. No-op when not connected.
    pub async fn close(&self, code: u16, reason: &str) {
        let Ok(out_tx) = self.sender() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let _ = out_tx
            .send(Outbound {
                frame: WsMessage::Close(Some(frame)),
                ack: None,
            })
            .await;
    }

    /// Stop reconnecting, then close. A handshake still in flight is closed
    /// as soon as it completes.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.close(1000, "shutdown").await;
    }

    fn handle_frame(&self, text: &str) {
        tracing::trace!(frame = %text, "received frame");

        let decoded = codec::parse_frame(text).and_then(|env| lock(&self.inner.fragments).push(env));
        let msg = match decoded {
            Ok(Some(msg)) => msg,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        tracing::debug!(id = %msg.id, msg_type = %msg.msg_type, "received message");

        if let Some(request_id) = msg.response_of.as_deref() {
            if let Some((_, waiter)) = self.inner.in_flight.remove(request_id) {
                let _ = waiter.send(Ok(msg.clone()));
            }
        }

        if let Some(listener) = &self.inner.listener {
            let listener = Arc::clone(listener);
            let client = self.clone();
            tokio::spawn(async move { listener.on_message(&client, msg).await });
        }
    }

    fn on_pong(&self) {
        tracing::debug!("received pong from broker");
        if let Some(tx) = lock(&self.inner.pong).take() {
            let _ = tx.send(());
        }
    }

    /// Tear down link `epoch` and schedule a reconnect.
    fn on_disconnect(&self, epoch: u64, code: i32, reason: String) {
        let link = {
            let mut state = lock(&self.inner.state);
            match &*state {
                LinkState::Connected(link) if link.epoch == epoch => {}
                _ => return,
            }
            match std::mem::replace(&mut *state, LinkState::Disconnected) {
                LinkState::Connected(link) => link,
                _ => return,
            }
        };
        for task in &link.tasks {
            task.abort();
        }
        drop(link);

        lock(&self.inner.fragments).clear();
        lock(&self.inner.pong).take();

        let ids: Vec<String> = self.inner.in_flight.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.inner.in_flight.remove(&id) {
                let _ = waiter.send(Err(TunnelError::ConnectionClosed {
                    code,
                    reason: reason.clone(),
                }));
            }
        }

        tracing::info!(code, %reason, url = %self.inner.opts.url, "broker connection closed");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let client = self.clone();
        let delay = self.inner.opts.reconnect_delay;
        let timeout = Duration::from_millis(self.inner.connect_timeout_ms.load(Ordering::Relaxed));
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if client.inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
            tracing::debug!("connection is closed, reconnecting");
            if let Err(e) = client.connect(timeout).await {
                tracing::debug!(error = %e, "reconnect attempt failed");
            }
        });
    }
}

/// Removes the in-flight entry on every exit path (timeout, send failure,
/// caller cancellation).
struct InFlightEntry<'a> {
    table: &'a DashMap<String, oneshot::Sender<Result<Message>>>,
    id: String,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    work: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(t) if !t.is_zero() => tokio::time::timeout(t, work)
            .await
            .map_err(|_| TunnelError::Timeout(millis(t)))?,
        _ => work.await,
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut out_rx: mpsc::Receiver<Outbound>,
    client: TunnelClient,
    epoch: u64,
) {
    while let Some(out) = out_rx.recv().await {
        let result = sink
            .send(out.frame)
            .await
            .map_err(|e| TunnelError::Send(e.to_string()));
        let failure = result.as_ref().err().map(ToString::to_string);
        if let Some(ack) = out.ack {
            let _ = ack.send(result);
        }
        if let Some(reason) = failure {
            client.on_disconnect(epoch, ABNORMAL_CLOSE, reason);
            break;
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, client: TunnelClient, epoch: u64) {
    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => client.handle_frame(&text),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => client.handle_frame(&text),
                Err(_) => tracing::warn!("dropping non-utf8 binary frame"),
            },
            Some(Ok(WsMessage::Pong(_))) => client.on_pong(),
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Frame(_))) => {}
            Some(Ok(WsMessage::Close(frame))) => {
                break match frame {
                    Some(f) => (i32::from(u16::from(f.code)), f.reason.into_owned()),
                    None => (i32::from(u16::from(CloseCode::Status)), String::new()),
                };
            }
            Some(Err(e)) => break (ABNORMAL_CLOSE, e.to_string()),
            None => break (ABNORMAL_CLOSE, "stream ended".to_string()),
        }
    };
    client.on_disconnect(epoch, code, reason);
}

async fn keepalive_loop(client: TunnelClient) {
    let every = client.inner.opts.ping_interval;
    let ping_timeout = client.inner.opts.ping_timeout;
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        if !client.ping(ping_timeout).await {
            tracing::debug!(timeout_ms = millis(ping_timeout), "ping not acknowledged in time");
        }
    }
}
