//! CDP WebSocket client with request/response correlation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::BrowserError;

use super::page::CdpPage;
use super::protocol::{BrowserVersion, CdpRequest, CdpResponse};

/// How long one CDP call may stay unanswered before the client gives up.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of the outbound frame queue feeding the writer task.
const OUTBOUND_DEPTH: usize = 64;

type CallResult = Result<Value, BrowserError>;

/// Matches outgoing request ids to the oneshot each caller waits on.
#[derive(Default)]
struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
}

impl Correlator {
    /// Claim an id and the channel its response will arrive on.
    fn register(&self) -> (u64, oneshot::Receiver<CallResult>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        (id, rx)
    }

    /// Route one inbound message to its caller. Events (no id) and replies
    /// to abandoned calls are dropped; the gateway polls page state rather
    /// than subscribing to CDP events.
    fn resolve(&self, response: CdpResponse) {
        let Some(id) = response.id else {
            return;
        };
        let Some(tx) = self.pending.lock().remove(&id) else {
            return;
        };
        let result = match response.error {
            Some(error) => Err(BrowserError::Protocol {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    /// Forget a call whose caller stopped waiting.
    fn abandon(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Transport is gone: wake every waiting caller empty-handed.
    fn poison(&self) {
        self.pending.lock().clear();
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// CDP client speaking to one browser over its debugger WebSocket.
///
/// The socket is owned by two background tasks: a writer draining the
/// outbound queue and a reader feeding the [`Correlator`]. Calls never
/// touch the socket directly.
pub struct CdpClient {
    outbound: mpsc::Sender<Message>,
    correlator: Arc<Correlator>,
    io_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl CdpClient {
    /// Connect to a browser at the given debugging endpoint
    /// (e.g. `http://localhost:9222`).
    pub async fn connect(endpoint: &str) -> Result<Self, BrowserError> {
        let ws_url = discover_debugger_url(endpoint).await?;
        let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| BrowserError::ConnectionFailed(format!("WebSocket: {}", e)))?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_DEPTH);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    error!("CDP send failed: {}", e);
                    break;
                }
            }
        });

        let correlator = Arc::new(Correlator::default());
        let reader = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            trace!("CDP recv: {}", text);
                            match serde_json::from_str::<CdpResponse>(&text) {
                                Ok(response) => correlator.resolve(response),
                                Err(e) => warn!("Unparseable CDP message: {}", e),
                            }
                        }
                        Ok(Message::Close(_)) => {
                            debug!("CDP WebSocket closed");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("CDP WebSocket error: {}", e);
                            break;
                        }
                    }
                }
                correlator.poison();
            })
        };

        Ok(Self {
            outbound,
            correlator,
            io_tasks: vec![writer, reader],
        })
    }

    /// Send a CDP command and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> CallResult {
        let (id, rx) = self.correlator.register();
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(|s| s.to_string()),
        };
        let json = serde_json::to_string(&request)?;
        trace!("CDP send: {}", json);

        self.outbound
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| BrowserError::ConnectionClosed)?;

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the reader poisoned the correlator.
            Ok(Err(_)) => Err(BrowserError::ConnectionClosed),
            Err(_) => {
                self.correlator.abandon(id);
                Err(BrowserError::Timeout(format!(
                    "{} unanswered after {:?}",
                    method, CALL_TIMEOUT
                )))
            }
        }
    }

    /// Create an isolated browser context.
    pub async fn create_browser_context(&self) -> Result<String, BrowserError> {
        let result = self
            .call(
                "Target.createBrowserContext",
                Some(json!({"disposeOnDetach": true})),
                None,
            )
            .await?;
        result["browserContextId"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::InvalidResponse("Missing browserContextId".to_string()))
    }

    /// Dispose an isolated browser context and everything in it.
    pub async fn dispose_browser_context(&self, context_id: &str) -> Result<(), BrowserError> {
        self.call(
            "Target.disposeBrowserContext",
            Some(json!({"browserContextId": context_id})),
            None,
        )
        .await?;
        Ok(())
    }

    /// List live browser context ids.
    pub async fn browser_context_ids(&self) -> Result<Vec<String>, BrowserError> {
        let result = self.call("Target.getBrowserContexts", None, None).await?;
        let ids = result["browserContextIds"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// Open a blank page inside a context and attach to it.
    pub async fn open_page(self: &Arc<Self>, context_id: &str) -> Result<CdpPage, BrowserError> {
        let result = self
            .call(
                "Target.createTarget",
                Some(json!({
                    "url": "about:blank",
                    "browserContextId": context_id,
                })),
                None,
            )
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("Missing targetId".to_string()))?
            .to_string();

        let result = self
            .call(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("Missing sessionId".to_string()))?
            .to_string();

        debug!("Attached page {} (cdp session {})", target_id, session_id);

        let page = CdpPage::new(Arc::clone(self), target_id, session_id);
        page.enable_domains().await?;
        Ok(page)
    }

    /// Close a page target.
    pub async fn close_target(&self, target_id: &str) -> Result<(), BrowserError> {
        self.call(
            "Target.closeTarget",
            Some(json!({"targetId": target_id})),
            None,
        )
        .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        for task in &self.io_tasks {
            task.abort();
        }
    }
}

/// Resolve the browser's debugger WebSocket URL from its HTTP endpoint.
async fn discover_debugger_url(endpoint: &str) -> Result<String, BrowserError> {
    let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    debug!("Fetching browser version from {}", version_url);

    let version: BrowserVersion = reqwest::get(&version_url)
        .await
        .map_err(|e| BrowserError::ConnectionFailed(format!("{}: {}", endpoint, e)))?
        .json()
        .await
        .map_err(|e| BrowserError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

    debug!("Connected to browser: {}", version.browser);
    Ok(version.web_socket_debugger_url)
}
