// 🌉 Spreadsheet host bridge
//
// The spreadsheet host runs in another task (or process, behind whatever
// carries the JSON). Calls are REQUEST/RESPONSE messages matched by a
// correlation id:
//
//   {"type":"REQUEST","correlationId":"…","functionName":"appendRows","args":[…]}
//   {"type":"RESPONSE","correlationId":"…","result":…}
//   {"type":"RESPONSE","correlationId":"…","error":"…"}
//
// Every call resolves to a HostOutcome: the host answered, the host failed,
// nobody answered in time, the client was cancelled, or the channel is gone.
// A call never waits longer than the configured timeout.

use crate::error::{SyncError, SyncResult};
use crate::sheet::{Row, SheetHost};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffered messages per direction.
pub const CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// WIRE MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostFunction {
    ClearSheet,
    WriteHeader,
    AppendRows,
    ReadAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    Request {
        correlation_id: Uuid,
        function_name: HostFunction,
        #[serde(default)]
        args: Value,
    },

    #[serde(rename_all = "camelCase")]
    Response {
        correlation_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            HostMessage::Request { correlation_id, .. } => *correlation_id,
            HostMessage::Response { correlation_id, .. } => *correlation_id,
        }
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Success(Value),
    Failed(String),
    TimedOut(Duration),
    Cancelled,
    /// Host side of the channel is gone
    Disconnected,
}

impl HostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HostOutcome::Success(_))
    }

    pub fn into_result(self) -> SyncResult<Value> {
        match self {
            HostOutcome::Success(value) => Ok(value),
            HostOutcome::Failed(message) => Err(SyncError::Host(message)),
            HostOutcome::TimedOut(after) => Err(SyncError::Timeout(after)),
            HostOutcome::Cancelled => Err(SyncError::Cancelled),
            HostOutcome::Disconnected => Err(SyncError::ChannelClosed),
        }
    }

    fn from_response(message: HostMessage) -> Self {
        match message {
            HostMessage::Response { error: Some(error), .. } => HostOutcome::Failed(error),
            HostMessage::Response { result, .. } => {
                HostOutcome::Success(result.unwrap_or(Value::Null))
            }
            HostMessage::Request { .. } => {
                HostOutcome::Failed("host answered with a request".to_string())
            }
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<HostMessage>>>>;

/// Host end of the bridge: requests come in, responses go out.
pub struct HostEndpoint {
    pub requests: mpsc::Receiver<HostMessage>,
    pub responses: mpsc::Sender<HostMessage>,
}

#[derive(Debug, Clone)]
pub struct BridgeClient {
    requests: mpsc::Sender<HostMessage>,
    pending: PendingMap,
    timeout: Duration,
    cancel: CancellationToken,
}

impl BridgeClient {
    /// Create a connected client/host pair. Must run inside a tokio runtime:
    /// a task routing responses to waiting callers is spawned here.
    pub fn connect(timeout: Duration) -> (BridgeClient, HostEndpoint) {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(route_responses(response_rx, pending.clone(), cancel.clone()));

        let client = BridgeClient {
            requests: request_tx,
            pending,
            timeout,
            cancel,
        };
        let endpoint = HostEndpoint {
            requests: request_rx,
            responses: response_tx,
        };
        (client, endpoint)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve every in-flight and future call to `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn call(&self, function: HostFunction, args: Value) -> HostOutcome {
        if self.cancel.is_cancelled() {
            return HostOutcome::Cancelled;
        }

        let correlation_id = Uuid::new_v4();
        let (slot_tx, slot_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(correlation_id, slot_tx);

        let request = HostMessage::Request {
            correlation_id,
            function_name: function,
            args,
        };
        debug!(%correlation_id, ?function, "bridge request");

        // The send counts against the timeout too: a wedged host can fill the channel
        let exchange = async {
            if self.requests.send(request).await.is_err() {
                return HostOutcome::Disconnected;
            }
            match slot_rx.await {
                Ok(message) => HostOutcome::from_response(message),
                Err(_) => HostOutcome::Disconnected,
            }
        };

        // Cancellation also stops the router, which drops every slot; check it first
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => HostOutcome::Cancelled,
            waited = tokio::time::timeout(self.timeout, exchange) => match waited {
                Err(_) => {
                    warn!(%correlation_id, ?function, timeout = ?self.timeout, "spreadsheet host timed out");
                    HostOutcome::TimedOut(self.timeout)
                }
                Ok(HostOutcome::Disconnected) if self.cancel.is_cancelled() => HostOutcome::Cancelled,
                Ok(outcome) => outcome,
            },
        };

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&correlation_id);
        outcome
    }
}

async fn route_responses(
    mut responses: mpsc::Receiver<HostMessage>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = responses.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if !matches!(message, HostMessage::Response { .. }) {
            warn!("request received on the response channel, dropped");
            continue;
        }

        let correlation_id = message.correlation_id();
        let slot = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&correlation_id);

        match slot {
            Some(slot) => {
                let _ = slot.send(message);
            }
            None => debug!(%correlation_id, "late or unknown response dropped"),
        }
    }

    // Waiting callers see Disconnected instead of waiting for the timeout
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

// ============================================================================
// HOST SIDE
// ============================================================================

/// Answer requests with `host` until the client side goes away.
pub async fn serve_host<H>(mut endpoint: HostEndpoint, host: &H)
where
    H: SheetHost + ?Sized,
{
    while let Some(message) = endpoint.requests.recv().await {
        let HostMessage::Request {
            correlation_id,
            function_name,
            args,
        } = message
        else {
            warn!("response received on the request channel, dropped");
            continue;
        };

        let response = match dispatch(host, function_name, args).await {
            Ok(result) => HostMessage::Response {
                correlation_id,
                result: Some(result),
                error: None,
            },
            Err(e) => HostMessage::Response {
                correlation_id,
                result: None,
                error: Some(e.to_string()),
            },
        };

        if endpoint.responses.send(response).await.is_err() {
            break;
        }
    }
}

pub fn spawn_host(endpoint: HostEndpoint, host: Arc<dyn SheetHost>) -> JoinHandle<()> {
    tokio::spawn(async move { serve_host(endpoint, host.as_ref()).await })
}

async fn dispatch<H>(host: &H, function: HostFunction, args: Value) -> SyncResult<Value>
where
    H: SheetHost + ?Sized,
{
    match function {
        HostFunction::ClearSheet => {
            host.clear().await?;
            Ok(Value::Null)
        }
        HostFunction::WriteHeader => {
            let header: Vec<String> = serde_json::from_value(args)?;
            host.write_header(&header).await?;
            Ok(Value::Null)
        }
        HostFunction::AppendRows => {
            let rows: Vec<Row> = serde_json::from_value(args)?;
            host.append_rows(&rows).await?;
            Ok(Value::Null)
        }
        HostFunction::ReadAll => Ok(serde_json::to_value(host.read_all().await?)?),
    }
}

// ============================================================================
// REMOTE SHEET
// ============================================================================

/// A SheetHost whose every operation is a bridge call.
#[derive(Debug, Clone)]
pub struct RemoteSheet {
    client: BridgeClient,
}

impl RemoteSheet {
    pub fn new(client: BridgeClient) -> Self {
        RemoteSheet { client }
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }
}

#[async_trait]
impl SheetHost for RemoteSheet {
    async fn clear(&self) -> SyncResult<()> {
        self.client
            .call(HostFunction::ClearSheet, Value::Null)
            .await
            .into_result()?;
        Ok(())
    }

    async fn write_header(&self, header: &[String]) -> SyncResult<()> {
        self.client
            .call(HostFunction::WriteHeader, serde_json::to_value(header)?)
            .await
            .into_result()?;
        Ok(())
    }

    async fn append_rows(&self, rows: &[Row]) -> SyncResult<()> {
        self.client
            .call(HostFunction::AppendRows, serde_json::to_value(rows)?)
            .await
            .into_result()?;
        Ok(())
    }

    async fn read_all(&self) -> SyncResult<Vec<Row>> {
        let value = self
            .client
            .call(HostFunction::ReadAll, Value::Null)
            .await
            .into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
