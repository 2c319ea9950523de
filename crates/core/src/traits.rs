use crate::codes::describe_return_code;
use crate::events::*;
use crate::models::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the bridge and its gateway adapters.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Gateway is in scheduled maintenance ({window}), code {code}")]
    MaintenanceWindow { code: i32, window: String },
    #[error("{operation} rejected by gateway: {code} ({})", describe(.code))]
    RequestRejected { operation: String, code: i32 },
    #[error("Bridge already has an outstanding request: {0}")]
    BridgeBusy(String),
    #[error("Condition catalog load refused by gateway (code {0})")]
    LoadRejected(i32),
    #[error("Condition catalog load failed (code {0})")]
    ConditionLoadFailed(i32),
    #[error("Unknown condition '{name}' (index {index})")]
    UnknownCondition { name: String, index: i32 },
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("Pagination did not advance past cursor {cursor}")]
    PaginationStalled { cursor: DateTime<Utc> },
    #[error("Pagination exceeded {0} pages")]
    PageLimitExceeded(usize),
    #[error("Not connected to the gateway")]
    NotConnected,
    #[error("Gateway transport error: {0}")]
    Gateway(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Callback handler failed: {0}")]
    Handler(String),
}

fn describe(code: &i32) -> &'static str {
    describe_return_code(*code)
}

impl BridgeError {
    pub fn rejected(operation: &str, code: i32) -> Self {
        BridgeError::RequestRejected {
            operation: operation.to_string(),
            code,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway capability
// ---------------------------------------------------------------------------

/// Receiver of the gateway's callback stream.
pub trait CallbackSink: Send + Sync {
    /// Hand one callback over. Must not block.
    fn deliver(&self, callback: GatewayCallback);
}

/// Typed surface of the vendor gateway.
///
/// Every invocation returns the gateway's immediate code; results of
/// asynchronous operations arrive later through the attached
/// [`CallbackSink`], possibly on another thread.
pub trait Gateway: Send + Sync {
    /// Register the receiver of all callbacks. Called once before any other
    /// operation.
    fn attach(&self, sink: Arc<dyn CallbackSink>);

    /// Begin login. The outcome arrives as [`GatewayCallback::Login`].
    fn comm_connect(&self) -> Result<i32, BridgeError>;

    fn connect_state(&self) -> Result<bool, BridgeError>;

    fn login_info(&self, info: LoginInfo) -> Result<String, BridgeError>;

    /// Send a transaction request. 0 means accepted.
    fn submit_request(&self, request: &TransactionRequest) -> Result<i32, BridgeError>;

    /// Send an interest-quote request for several codes. 0 means accepted.
    fn submit_multi_quote(&self, request: &MultiQuoteRequest) -> Result<i32, BridgeError>;

    fn set_live_subscription(&self, subscription: &LiveSubscription) -> Result<i32, BridgeError>;

    fn remove_live_subscription(&self, screen_no: &str, code: &str) -> Result<(), BridgeError>;

    /// Send an order. 0 means accepted.
    fn submit_order(&self, order: &OrderRequest) -> Result<i32, BridgeError>;

    /// Ask for the stored condition catalog. 1 means accepted.
    fn condition_load(&self) -> Result<i32, BridgeError>;

    /// Run a condition search. Non-zero means accepted.
    fn send_condition(
        &self,
        screen_no: &str,
        name: &str,
        index: i32,
        mode: ConditionSearchMode,
    ) -> Result<i32, BridgeError>;

    fn send_condition_stop(&self, screen_no: &str, name: &str, index: i32)
        -> Result<(), BridgeError>;

    fn query_metadata(&self, query: &MetadataQuery) -> Result<String, BridgeError>;
}

/// Turns a transaction-data callback into records. Only valid while the
/// callback is being handled.
pub trait TransactionDecoder: Send + Sync {
    fn decode(&self, ready: &TransactionDataReady) -> Result<TransactionRecords, BridgeError>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
