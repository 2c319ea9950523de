use kwbridge_core::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::protocol::*;

/// Configuration for connecting to the gateway helper process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketGatewayConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    /// Port the helper is listening on.
    pub port: u16,
    /// TCP connect and handshake timeout in seconds.
    pub connect_timeout_secs: u64,
    /// How long an invocation waits for its immediate reply.
    pub reply_timeout_secs: u64,
}

impl Default for SocketGatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5560,
            connect_timeout_secs: 10,
            reply_timeout_secs: 10,
        }
    }
}

#[derive(Debug)]
struct Reply {
    code: i32,
    text: String,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Reply, String>>>>>;
type SinkSlot = Arc<Mutex<Option<Arc<dyn CallbackSink>>>>;
type PageBuffer = Arc<Mutex<HashMap<String, TransactionRecords>>>;

/// Gateway adapter talking to a helper process that hosts the vendor
/// control, over TCP with length-prefixed JSON frames.
///
/// The synchronous [`Gateway`] methods block the calling thread until the
/// helper replies, so they must be called from outside the async runtime
/// (e.g. `spawn_blocking`). Callbacks are delivered from the reader task.
pub struct SocketGateway {
    handle: Handle,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: PendingReplies,
    sink: SinkSlot,
    pages: PageBuffer,
    next_seq: AtomicU64,
    reply_timeout: Duration,
}

impl SocketGateway {
    /// Connect and wait for the helper's handshake.
    pub async fn connect(config: &SocketGatewayConfig) -> Result<Self, BridgeError> {
        let addr = format!("{}:{}", config.host, config.port);
        info!("Connecting to gateway helper at {}", addr);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BridgeError::Gateway(format!("connect to {addr} timed out")))?
            .map_err(|e| BridgeError::Gateway(format!("TCP connect failed: {}", e)))?;
        let (mut reader, mut writer) = stream.into_split();

        // Wait for Connected message
        let body = tokio::time::timeout(connect_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| BridgeError::Gateway("handshake timed out".to_string()))?
            .map_err(|e| BridgeError::Gateway(format!("Read error: {}", e)))?;
        match serde_json::from_slice::<InboundFrame>(&body) {
            Ok(InboundFrame::Connected { version }) => {
                info!("Connected to gateway helper v{}", version);
            }
            Ok(InboundFrame::Error { message, .. }) => return Err(BridgeError::Gateway(message)),
            Ok(_) => {
                return Err(BridgeError::Gateway(
                    "Unexpected initial message".to_string(),
                ))
            }
            Err(e) => return Err(BridgeError::Gateway(format!("Bad handshake: {}", e))),
        }

        let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(e) = writer.write_all(&bytes).await {
                    error!(error = %e, "Write to gateway helper failed");
                    break;
                }
            }
            let _ = writer.shutdown().await;
            debug!("Gateway writer stopped");
        });

        let gateway = Self {
            handle: Handle::current(),
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sink: Arc::new(Mutex::new(None)),
            pages: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(1),
            reply_timeout: Duration::from_secs(config.reply_timeout_secs),
        };
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&gateway.pending),
            Arc::clone(&gateway.sink),
            Arc::clone(&gateway.pages),
        ));
        Ok(gateway)
    }

    /// Decoder returning the records that arrived with each data frame.
    pub fn decoder(&self) -> SocketDecoder {
        SocketDecoder {
            pages: Arc::clone(&self.pages),
        }
    }

    /// Send one invocation and block until its reply.
    fn invoke(&self, call: Invocation) -> Result<Reply, BridgeError> {
        let name = call.name();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_vec(&OutboundFrame { seq, call })
            .map_err(|e| BridgeError::Gateway(format!("Serialization error: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);
        debug!(seq, op = name, "Invoking gateway helper");

        if self.outbound.blocking_send(frame_message(&json)).is_err() {
            self.pending.lock().remove(&seq);
            return Err(BridgeError::NotConnected);
        }

        let outcome = self
            .handle
            .block_on(async { tokio::time::timeout(self.reply_timeout, rx).await });
        match outcome {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(message))) => Err(BridgeError::Gateway(format!("{name}: {message}"))),
            Ok(Err(_)) => Err(BridgeError::Gateway(format!(
                "{name}: connection closed before reply"
            ))),
            Err(_) => {
                self.pending.lock().remove(&seq);
                Err(BridgeError::Timeout {
                    operation: name.to_string(),
                    after: self.reply_timeout,
                })
            }
        }
    }

    fn invoke_code(&self, call: Invocation) -> Result<i32, BridgeError> {
        self.invoke(call).map(|reply| reply.code)
    }

    fn invoke_text(&self, call: Invocation) -> Result<String, BridgeError> {
        self.invoke(call).map(|reply| reply.text)
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: PendingReplies,
    sink: SinkSlot,
    pages: PageBuffer,
) {
    loop {
        let body = match read_frame(&mut reader).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Gateway helper connection closed");
                break;
            }
        };
        let frame = match serde_json::from_slice::<InboundFrame>(&body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Skipping malformed frame");
                continue;
            }
        };
        match frame {
            InboundFrame::Reply { seq, code, text } => {
                if let Some(tx) = pending.lock().remove(&seq) {
                    let _ = tx.send(Ok(Reply { code, text }));
                } else {
                    debug!(seq, "Reply for an abandoned invocation");
                }
            }
            InboundFrame::Error {
                seq: Some(seq),
                message,
            } => {
                if let Some(tx) = pending.lock().remove(&seq) {
                    let _ = tx.send(Err(message));
                }
            }
            InboundFrame::Error { seq: None, message } => {
                error!("Gateway helper error: {}", message);
            }
            InboundFrame::TrData { ready, records } => {
                pages.lock().insert(ready.screen_no.clone(), records);
                deliver(&sink, GatewayCallback::TransactionData(ready));
            }
            InboundFrame::Callback { callback } => deliver(&sink, callback),
            InboundFrame::Connected { version } => {
                debug!(version = %version, "Repeated handshake ignored");
            }
        }
    }
    // Fail every waiting invocation.
    pending.lock().clear();
}

fn deliver(sink: &SinkSlot, callback: GatewayCallback) {
    let target = sink.lock().clone();
    match target {
        Some(sink) => sink.deliver(callback),
        None => warn!(class = %callback.class(), "Callback dropped, no sink attached"),
    }
}

impl Gateway for SocketGateway {
    fn attach(&self, sink: Arc<dyn CallbackSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn comm_connect(&self) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::CommConnect)
    }

    fn connect_state(&self) -> Result<bool, BridgeError> {
        self.invoke_code(Invocation::GetConnectState).map(|code| code == 1)
    }

    fn login_info(&self, info: LoginInfo) -> Result<String, BridgeError> {
        self.invoke_text(Invocation::GetLoginInfo {
            tag: info.tag().to_string(),
        })
    }

    fn submit_request(&self, request: &TransactionRequest) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::request(request))
    }

    fn submit_multi_quote(&self, request: &MultiQuoteRequest) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::multi_quote(request))
    }

    fn set_live_subscription(&self, subscription: &LiveSubscription) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::live(subscription))
    }

    fn remove_live_subscription(&self, screen_no: &str, code: &str) -> Result<(), BridgeError> {
        self.invoke(Invocation::SetRealRemove {
            screen_no: screen_no.to_string(),
            code: code.to_string(),
        })
        .map(|_| ())
    }

    fn submit_order(&self, order: &OrderRequest) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::order(order))
    }

    fn condition_load(&self) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::GetConditionLoad)
    }

    fn send_condition(
        &self,
        screen_no: &str,
        name: &str,
        index: i32,
        mode: ConditionSearchMode,
    ) -> Result<i32, BridgeError> {
        self.invoke_code(Invocation::condition(screen_no, name, index, mode))
    }

    fn send_condition_stop(&self, screen_no: &str, name: &str, index: i32) -> Result<(), BridgeError> {
        self.invoke(Invocation::SendConditionStop {
            screen_no: screen_no.to_string(),
            name: name.to_string(),
            index,
        })
        .map(|_| ())
    }

    fn query_metadata(&self, query: &MetadataQuery) -> Result<String, BridgeError> {
        self.invoke_text(Invocation::Metadata {
            query: query.clone(),
        })
    }
}

/// Hands out the records carried by the last data frame for a screen.
#[derive(Clone)]
pub struct SocketDecoder {
    pages: PageBuffer,
}

impl TransactionDecoder for SocketDecoder {
    fn decode(&self, ready: &TransactionDataReady) -> Result<TransactionRecords, BridgeError> {
        self.pages.lock().remove(&ready.screen_no).ok_or_else(|| {
            BridgeError::DecodeFailed(format!(
                "no records received for screen {}",
                ready.screen_no
            ))
        })
    }
}
