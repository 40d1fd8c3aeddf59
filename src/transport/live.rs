//! Gemini Live websocket link.
//!
//! Each link runs one reader task (handshake, then inbound dispatch) and one
//! writer task draining an unbounded outbound queue, so sends from the
//! session never wait on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, USER_AGENT};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{audio_message, decode_server_message, setup_message, tool_response_message};
use super::{AgentConfig, AgentConnector, AgentLink, EventSink, TransportEvent};
use crate::audio::codec::AudioFrame;
use crate::error::TransportError;
use crate::tools::ToolResult;

/// Public Gemini Live endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outbound {
    Json(Value),
    Close,
}

/// Sink shared between the link handle and its tasks. Detaching waits for
/// any in-flight delivery, so nothing is delivered after `close` returns.
#[derive(Clone)]
struct SharedSink(Arc<Mutex<Option<EventSink>>>);

impl SharedSink {
    fn new(sink: EventSink) -> Self {
        Self(Arc::new(Mutex::new(Some(sink))))
    }

    fn emit(&self, event: TransportEvent) {
        if let Ok(guard) = self.0.lock() {
            if let Some(sink) = guard.as_ref() {
                sink(event);
            }
        }
    }

    fn detach(&self) {
        match self.0.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Opens websocket links on the given runtime.
pub struct GeminiConnector {
    runtime: Handle,
}

impl GeminiConnector {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl AgentConnector for GeminiConnector {
    fn open(
        &mut self,
        config: AgentConfig,
        sink: EventSink,
    ) -> Result<Box<dyn AgentLink>, TransportError> {
        if config.api_key.trim().is_empty() {
            return Err(TransportError::MissingApiKey);
        }

        let url = service_url(&config);
        let setup = setup_message(&config);
        let timeout = config.handshake_timeout;
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SharedSink::new(sink);
        let open = Arc::new(AtomicBool::new(false));

        info!(model = %config.model, voice = %config.voice_name, "Opening agent connection");
        let task = self.runtime.spawn(run_connection(
            url,
            setup,
            timeout,
            rx,
            Arc::clone(&open),
            sink.clone(),
        ));

        Ok(Box::new(GeminiLink {
            outbound: Some(tx),
            open,
            sink,
            task: Some(task),
        }))
    }
}

fn service_url(config: &AgentConfig) -> String {
    let base = config
        .endpoint
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or(DEFAULT_ENDPOINT);
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", base, sep, config.api_key.trim())
}

struct GeminiLink {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    open: Arc<AtomicBool>,
    sink: SharedSink,
    task: Option<JoinHandle<()>>,
}

impl GeminiLink {
    fn send(&self, msg: Value) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Outbound::Json(msg));
        }
    }
}

impl AgentLink for GeminiLink {
    fn send_audio(&mut self, frame: &AudioFrame) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.send(audio_message(frame));
    }

    fn send_tool_result(&mut self, result: ToolResult) {
        debug!(id = %result.id, tool = %result.name, "Sending tool result");
        self.send(tool_response_message(&[result]));
    }

    fn close(&mut self) {
        self.sink.detach();
        self.open.store(false, Ordering::Release);
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Outbound::Close);
        }
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Agent connection closed");
        }
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Connection task ─────────────────────────────────────────────────

async fn run_connection(
    url: String,
    setup: Value,
    handshake_timeout: std::time::Duration,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    sink: SharedSink,
) {
    let ws = match tokio::time::timeout(handshake_timeout, handshake(&url, setup)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("Agent handshake failed: {}", e);
            sink.emit(TransportEvent::Error(e.to_string()));
            return;
        }
        Err(_) => {
            let e = TransportError::Handshake(format!(
                "no response within {:?}",
                handshake_timeout
            ));
            warn!("{}", e);
            sink.emit(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    let (write, mut read) = ws.split();
    let writer = tokio::spawn(write_loop(write, outbound));

    open.store(true, Ordering::Release);
    info!("Agent connection ready");
    sink.emit(TransportEvent::Opened);

    let last = read_loop(&mut read, &sink).await;
    open.store(false, Ordering::Release);
    writer.abort();
    if let Some(event) = last {
        sink.emit(event);
    }
}

/// Connect, send `setup`, and wait for `setupComplete`.
async fn handshake(url: &str, setup: Value) -> Result<WsStream, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Connect(format!("invalid endpoint: {}", e)))?;
    request.headers_mut().insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("astra-voice/", env!("CARGO_PKG_VERSION"))),
    );

    let (mut ws, _response) = connect_async(request)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    ws.send(Message::Text(setup.to_string()))
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        let text = match msg.map_err(|e| TransportError::Handshake(e.to_string()))? {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed during setup".to_string());
                return Err(TransportError::Handshake(reason));
            }
            _ => continue,
        };
        let frame = decode_server_message(&text)?;
        if let Some(TransportEvent::Error(message)) = frame.events.first() {
            return Err(TransportError::Handshake(message.clone()));
        }
        if frame.setup_complete {
            return Ok(ws);
        }
        debug!("Ignoring message received before setupComplete");
    }
    Err(TransportError::Handshake("connection ended during setup".into()))
}

async fn write_loop(
    mut write: futures_util::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(msg) = outbound.recv().await {
        match msg {
            Outbound::Json(value) => {
                if let Err(e) = write.send(Message::Text(value.to_string())).await {
                    debug!("Outbound send failed: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = write.close().await;
}

/// Dispatch inbound frames until the connection ends. Returns the final
/// event to deliver, if it was not already delivered.
async fn read_loop(
    read: &mut futures_util::stream::SplitStream<WsStream>,
    sink: &SharedSink,
) -> Option<TransportEvent> {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(b)) => match String::from_utf8(b) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Dropping non-UTF-8 binary frame: {}", e);
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "Agent closed the connection");
                return Some(TransportEvent::Closed);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Agent connection failed: {}", e);
                return Some(TransportEvent::Error(format!("Connection lost: {}", e)));
            }
        };

        let frame = match decode_server_message(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        if !frame.cancelled.is_empty() {
            debug!(ids = ?frame.cancelled, "Tool calls cancelled by agent");
        }
        if let Some(time_left) = &frame.go_away {
            warn!(time_left = %time_left, "Agent is about to disconnect");
        }
        for event in frame.events {
            let fatal = matches!(event, TransportEvent::Error(_));
            sink.emit(event);
            if fatal {
                return None;
            }
        }
    }
    info!("Agent stream ended");
    Some(TransportEvent::Closed)
}
