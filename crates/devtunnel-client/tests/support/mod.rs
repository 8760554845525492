//! Shared integration-test fixtures: an in-process broker, a recording
//! listener and a controllable execution backend.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify, Semaphore};

use devtunnel_client::invoke::{Invoker, InvokerError};
use devtunnel_client::transport::{MessageListener, TunnelClient};
use devtunnel_core::invocation::{InvocationRequest, InvocationResponse};
use devtunnel_core::protocol::types::MAX_FRAME_BYTES;
use devtunnel_core::protocol::{encode, parse_frame, to_frame, Envelope, Message, Reassembler};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Poll `cond` until it holds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    within(what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// broker

enum Control {
    Frame(String),
    Stall,
    Close,
}

#[derive(Clone)]
struct BrokerShared {
    conns: mpsc::UnboundedSender<BrokerConn>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    accepted: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
    stall_ms: Arc<AtomicU64>,
    pings: Arc<AtomicUsize>,
}

pub struct FakeBroker {
    pub url: String,
    conns: mpsc::UnboundedReceiver<BrokerConn>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    accepted: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
    stall_ms: Arc<AtomicU64>,
    pings: Arc<AtomicUsize>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = BrokerShared {
            conns: tx,
            headers: Arc::default(),
            accepted: Arc::default(),
            reject: Arc::default(),
            stall_ms: Arc::default(),
            pings: Arc::default(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/", get(upgrade))
            .with_state(shared.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("ws://{addr}/"),
            conns: rx,
            headers: shared.headers,
            accepted: shared.accepted,
            reject: shared.reject,
            stall_ms: shared.stall_ms,
            pings: shared.pings,
        }
    }

    /// Refuse every upgrade with 401.
    pub fn reject_handshakes(&self, on: bool) {
        self.reject.store(on, Ordering::SeqCst);
    }

    /// Hold every upgrade response back for `delay`.
    pub fn stall_handshakes(&self, delay: Duration) {
        self.stall_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    pub async fn next_conn(&mut self) -> BrokerConn {
        within("broker connection", self.conns.recv())
            .await
            .expect("broker stopped")
    }

    /// Upgrades actually accepted.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Handshake attempts seen, accepted or not.
    pub fn attempts(&self) -> usize {
        self.headers.lock().unwrap().len()
    }

    /// Pings received from clients.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> HeaderMap {
        self.headers.lock().unwrap().last().cloned().expect("no handshake seen")
    }
}

async fn upgrade(
    State(shared): State<BrokerShared>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    shared.headers.lock().unwrap().push(headers.clone());
    if shared.reject.load(Ordering::SeqCst) || headers.get("x-api-key").is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let stall = shared.stall_ms.load(Ordering::SeqCst);
    if stall > 0 {
        tokio::time::sleep(Duration::from_millis(stall)).await;
    }
    ws.on_upgrade(move |socket| serve_conn(socket, shared))
}

async fn serve_conn(socket: WebSocket, shared: BrokerShared) {
    shared.accepted.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let _ = shared.conns.send(BrokerConn {
        frames: in_rx,
        out: out_tx,
        reassembler: Reassembler::new(),
    });

    let mut reading = true;
    loop {
        tokio::select! {
            inbound = stream.next(), if reading => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = in_tx.send(text);
                }
                Some(Ok(WsMessage::Ping(_))) => {
                    shared.pings.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            control = out_rx.recv() => match control {
                Some(Control::Frame(text)) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Control::Stall) => reading = false,
                Some(Control::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// Broker side of one accepted connection. Dropping it closes the socket.
pub struct BrokerConn {
    frames: mpsc::UnboundedReceiver<String>,
    out: mpsc::UnboundedSender<Control>,
    reassembler: Reassembler,
}

impl BrokerConn {
    pub async fn recv_frame(&mut self) -> Envelope {
        let text = within("client frame", self.frames.recv())
            .await
            .expect("connection closed");
        parse_frame(&text).unwrap()
    }

    /// Next complete message, gluing fragments back together.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            let env = self.recv_frame().await;
            if let Some(msg) = self.reassembler.push(env).unwrap() {
                return msg;
            }
        }
    }

    /// Nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(Some(text)) = tokio::time::timeout(quiet, self.frames.recv()).await {
            panic!("unexpected frame: {text}");
        }
    }

    /// The client closes the socket; frames still in flight are skipped.
    pub async fn expect_closed(&mut self) {
        within("client close", async { while self.frames.recv().await.is_some() {} }).await
    }

    pub fn send_message(&self, msg: &Message) {
        for env in encode(msg, MAX_FRAME_BYTES).unwrap() {
            self.send_raw(&to_frame(&env).unwrap());
        }
    }

    pub fn send_raw(&self, text: &str) {
        self.out.send(Control::Frame(text.to_string())).unwrap();
    }

    /// Stop reading the socket: no more pongs, and client writes back up
    /// once the TCP buffers are full.
    pub fn stall_reading(&self) {
        self.out.send(Control::Stall).unwrap();
    }

    pub fn close(self) {
        let _ = self.out.send(Control::Close);
    }
}

// ---------------------------------------------------------------------------
// listener

pub struct Recorder {
    tx: mpsc::UnboundedSender<Message>,
}

pub fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

#[async_trait]
impl MessageListener for Recorder {
    async fn on_message(&self, _client: &TunnelClient, msg: Message) {
        let _ = self.tx.send(msg);
    }
}

// ---------------------------------------------------------------------------
// backend

/// Backend that records lifecycle events and can hold invocations open.
///
/// Request bodies steer it: `{"hold": true}` waits for [`MockInvoker::release`],
/// `{"fail": true}` returns a backend error, `{"panic": true}` panics.
pub struct MockInvoker {
    events: Mutex<Vec<String>>,
    changed: Notify,
    gate: Semaphore,
}

impl MockInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            changed: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn saw(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub async fn wait_for(&self, event: &str) {
        within(event, async {
            loop {
                let notified = self.changed.notified();
                if self.saw(event) {
                    return;
                }
                notified.await;
            }
        })
        .await
    }

    /// Let `n` held invocations finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

pub fn request(function: &str, body: Value) -> InvocationRequest {
    InvocationRequest {
        function_name: function.into(),
        request_id: format!("req-{function}"),
        timeout: 30,
        request: body,
        ..InvocationRequest::default()
    }
}

#[async_trait]
impl Invoker for MockInvoker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn init(&self) -> Result<(), InvokerError> {
        self.push("init".into());
        Ok(())
    }

    async fn invoke(&self, req: &InvocationRequest) -> Result<InvocationResponse, InvokerError> {
        let function = &req.function_name;
        self.push(format!("start:{function}"));
        if req.request["hold"] == json!(true) {
            self.gate.acquire().await.unwrap().forget();
        }
        if req.request["fail"] == json!(true) {
            return Err(InvokerError::new("BOOM", "backend exploded"));
        }
        if req.request["panic"] == json!(true) {
            panic!("backend bug");
        }
        self.push(format!("end:{function}"));
        Ok(InvocationResponse::ok(json!({ "function": function, "echo": req.request })))
    }

    async fn reload(&self) -> Result<(), InvokerError> {
        self.push("reload".into());
        Ok(())
    }

    async fn destroy(&self) -> Result<(), InvokerError> {
        self.push("destroy".into());
        Ok(())
    }
}
