//! Single-slot suspend/resume primitive.
//!
//! A caller arms the bridge with [`SuspensionBridge::issue`], fires its
//! gateway request and parks in [`SuspensionBridge::wait`]. The callback
//! router hands the result over with [`SuspensionBridge::resolve`] from
//! whatever thread the gateway calls back on. A result that arrives before
//! the caller parks is kept in the slot, so arming before dispatching never
//! loses a wakeup.

use chrono::{DateTime, Utc};
use kwbridge_core::{BridgeError, CallbackClass};
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identity a callback must echo, beyond its key, to answer a request.
///
/// The gateway reuses screen numbers, so a callback that arrives after its
/// request timed out would otherwise be taken for the answer to the next
/// request on that screen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Correlation {
    #[default]
    Any,
    Transaction {
        rq_name: String,
        /// `None` when the gateway picks the code, as for multi quotes.
        tr_code: Option<String>,
    },
    Condition {
        name: String,
        index: i32,
    },
}

impl Correlation {
    pub fn transaction(rq_name: &str, tr_code: &str) -> Self {
        Correlation::Transaction {
            rq_name: rq_name.to_string(),
            tr_code: Some(tr_code.to_string()),
        }
    }

    pub fn condition(name: &str, index: i32) -> Self {
        Correlation::Condition {
            name: name.to_string(),
            index,
        }
    }

    pub fn accepts_transaction(&self, rq_name: &str, tr_code: &str) -> bool {
        match self {
            Correlation::Any => true,
            Correlation::Transaction {
                rq_name: expected,
                tr_code: code,
            } => expected == rq_name && code.as_deref().map_or(true, |c| c == tr_code),
            Correlation::Condition { .. } => false,
        }
    }

    pub fn accepts_condition(&self, name: &str, index: i32) -> bool {
        match self {
            Correlation::Any => true,
            Correlation::Condition {
                name: expected,
                index: expected_index,
            } => expected == name && *expected_index == index,
            Correlation::Transaction { .. } => false,
        }
    }
}

/// The request a bridge is currently armed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Screen/session key correlating the request with its callback.
    pub key: String,
    pub class: CallbackClass,
    pub correlation: Correlation,
    pub issued_at: DateTime<Utc>,
}

/// Handle returned by [`SuspensionBridge::issue`]; consumed by `wait` or `cancel`.
#[derive(Debug)]
#[must_use = "an issued ticket must be waited on or cancelled"]
pub struct Ticket {
    id: u64,
}

enum Slot<T> {
    Idle,
    Armed {
        id: u64,
        request: PendingRequest,
    },
    Resolved {
        id: u64,
        request: PendingRequest,
        payload: T,
    },
}

impl<T> Slot<T> {
    fn id(&self) -> Option<u64> {
        match self {
            Slot::Idle => None,
            Slot::Armed { id, .. } | Slot::Resolved { id, .. } => Some(*id),
        }
    }
}

struct State<T> {
    slot: Slot<T>,
    next_id: u64,
}

pub struct SuspensionBridge<T> {
    name: &'static str,
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> SuspensionBridge<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State {
                slot: Slot::Idle,
                next_id: 1,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arm the bridge for one request. Fails with `BridgeBusy` while another
    /// request is outstanding or its result has not been collected.
    pub fn issue(&self, key: &str, class: CallbackClass) -> Result<Ticket, BridgeError> {
        self.issue_correlated(key, class, Correlation::Any)
    }

    /// Like [`SuspensionBridge::issue`], additionally recording what the
    /// answering callback must carry.
    pub fn issue_correlated(
        &self,
        key: &str,
        class: CallbackClass,
        correlation: Correlation,
    ) -> Result<Ticket, BridgeError> {
        let mut state = self.state.lock();
        match &state.slot {
            Slot::Idle => {}
            Slot::Armed { request, .. } | Slot::Resolved { request, .. } => {
                return Err(BridgeError::BridgeBusy(format!(
                    "{} bridge is still serving {} for '{}'",
                    self.name, request.class, request.key
                )));
            }
        }
        let id = state.next_id;
        state.next_id += 1;
        state.slot = Slot::Armed {
            id,
            request: PendingRequest {
                key: key.to_string(),
                class,
                correlation,
                issued_at: Utc::now(),
            },
        };
        debug!(bridge = self.name, key, %class, "Bridge armed");
        Ok(Ticket { id })
    }

    /// Park the calling thread until the ticket's request is resolved.
    ///
    /// With a timeout, the bridge is disarmed when it elapses and a late
    /// callback is ignored.
    pub fn wait(&self, ticket: Ticket, timeout: Option<Duration>) -> Result<T, BridgeError> {
        // A timeout too large to represent waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        loop {
            match &state.slot {
                Slot::Resolved { id, .. } if *id == ticket.id => {
                    if let Slot::Resolved { payload, .. } = mem::replace(&mut state.slot, Slot::Idle) {
                        return Ok(payload);
                    }
                }
                Slot::Armed { id, request } if *id == ticket.id => {
                    let Some(deadline) = deadline else {
                        self.ready.wait(&mut state);
                        continue;
                    };
                    if Instant::now() >= deadline {
                        let operation = format!("{} {} '{}'", self.name, request.class, request.key);
                        warn!(bridge = self.name, key = %request.key, "Bridge wait timed out");
                        state.slot = Slot::Idle;
                        return Err(BridgeError::Timeout {
                            operation,
                            after: timeout.unwrap_or_default(),
                        });
                    }
                    self.ready.wait_until(&mut state, deadline);
                }
                _ => {
                    return Err(BridgeError::Handler(format!(
                        "{} bridge ticket {} is no longer pending",
                        self.name, ticket.id
                    )));
                }
            }
        }
    }

    /// Disarm the bridge without waiting, e.g. when dispatch failed.
    pub fn cancel(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        if state.slot.id() == Some(ticket.id) {
            state.slot = Slot::Idle;
            debug!(bridge = self.name, "Bridge disarmed");
        }
    }

    /// Hand `payload` to the waiting caller. No-op returning `false` when
    /// nothing is pending.
    pub fn resolve(&self, payload: T) -> bool {
        self.resolve_if(|_| true, payload)
    }

    /// Resolve only when `accept` approves the pending request.
    pub fn resolve_if(&self, accept: impl FnOnce(&PendingRequest) -> bool, payload: T) -> bool {
        let mut state = self.state.lock();
        let accepted = match &state.slot {
            Slot::Armed { request, .. } => accept(request),
            _ => false,
        };
        if !accepted {
            debug!(bridge = self.name, "Ignoring resolution with no matching pending request");
            return false;
        }
        if let Slot::Armed { id, request } = mem::replace(&mut state.slot, Slot::Idle) {
            state.slot = Slot::Resolved {
                id,
                request,
                payload,
            };
        }
        drop(state);
        self.ready.notify_all();
        true
    }

    pub fn pending(&self) -> Option<PendingRequest> {
        match &self.state.lock().slot {
            Slot::Armed { request, .. } => Some(request.clone()),
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Armed { .. })
    }

    /// Arm, run `dispatch`, then wait. When `dispatch` fails the bridge is
    /// disarmed and its error returned without blocking.
    pub fn call<F>(
        &self,
        key: &str,
        class: CallbackClass,
        correlation: Correlation,
        timeout: Option<Duration>,
        dispatch: F,
    ) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Result<(), BridgeError>,
    {
        let ticket = self.issue_correlated(key, class, correlation)?;
        if let Err(e) = dispatch() {
            self.cancel(ticket);
            return Err(e);
        }
        self.wait(ticket, timeout)
    }
}
