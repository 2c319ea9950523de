use kwbridge_core::{
    BridgeError, CallbackClass, ConditionCatalog, ConditionSearchMode, ConditionState, Gateway,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::Correlation;
use crate::router::{Channels, ConditionReply};
use crate::transaction::Admission;

const CATALOG_KEY: &str = "catalog";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveSearch {
    screen_no: String,
    index: i32,
}

struct Inner {
    state: ConditionState,
    catalog: Option<ConditionCatalog>,
    active: BTreeMap<String, ActiveSearch>,
}

impl Inner {
    /// State to settle in once nothing is in flight.
    fn idle_state(&self) -> ConditionState {
        if self.catalog.is_none() {
            ConditionState::Unloaded
        } else if self.active.is_empty() {
            ConditionState::Loaded
        } else {
            ConditionState::RealtimeActive
        }
    }
}

/// Condition-search protocol over its own bridge.
///
/// ```text
/// Unloaded -> Loading -> Loaded -> Searching -> Loaded | RealtimeActive
/// ```
///
/// Searches are validated against the loaded catalog before anything is
/// sent; live searches stay subscribed until stopped.
pub struct ConditionSearch {
    gateway: Arc<dyn Gateway>,
    channels: Arc<Channels>,
    admission: Arc<Admission>,
    serial: Mutex<()>,
    timeout: Option<Duration>,
    inner: Mutex<Inner>,
}

impl ConditionSearch {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        channels: Arc<Channels>,
        admission: Arc<Admission>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            gateway,
            channels,
            admission,
            serial: Mutex::new(()),
            timeout,
            inner: Mutex::new(Inner {
                state: ConditionState::Unloaded,
                catalog: None,
                active: BTreeMap::new(),
            }),
        }
    }

    pub fn state(&self) -> ConditionState {
        self.inner.lock().state
    }

    pub fn catalog(&self) -> Option<ConditionCatalog> {
        self.inner.lock().catalog.clone()
    }

    /// Names of conditions with a live subscription.
    pub fn active_realtime(&self) -> Vec<String> {
        self.inner.lock().active.keys().cloned().collect()
    }

    /// Ask the gateway for the stored catalog and wait for it.
    pub fn load(&self) -> Result<ConditionCatalog, BridgeError> {
        let _serial = self.serial.lock();
        self.admission.admit()?;

        let result = self.channels.condition.call(
            CATALOG_KEY,
            CallbackClass::ConditionCatalog,
            Correlation::Any,
            self.timeout,
            || {
                let code = self.gateway.condition_load()?;
                if code != 1 {
                    warn!(code, "Condition catalog load refused");
                    return Err(BridgeError::LoadRejected(code));
                }
                self.inner.lock().state = ConditionState::Loading;
                Ok(())
            },
        );

        let mut inner = self.inner.lock();
        match result {
            Ok(Ok(ConditionReply::Catalog(catalog))) => {
                info!(conditions = catalog.len(), "Condition catalog loaded");
                inner.catalog = Some(catalog.clone());
                inner.state = inner.idle_state();
                Ok(catalog)
            }
            Ok(Ok(ConditionReply::Codes(_))) => {
                inner.catalog = None;
                inner.active.clear();
                inner.state = ConditionState::Unloaded;
                Err(BridgeError::DecodeFailed(
                    "catalog load answered with a search result".into(),
                ))
            }
            Ok(Err(e)) => {
                inner.catalog = None;
                inner.active.clear();
                inner.state = ConditionState::Unloaded;
                Err(e)
            }
            Err(e) => {
                if inner.state == ConditionState::Loading {
                    inner.catalog = None;
                    inner.active.clear();
                    inner.state = ConditionState::Unloaded;
                }
                Err(e)
            }
        }
    }

    /// Run a search and return the matching codes. A live search keeps
    /// delivering membership changes to the `RealCondition` observer.
    pub fn send(
        &self,
        screen_no: &str,
        name: &str,
        index: i32,
        mode: ConditionSearchMode,
    ) -> Result<Vec<String>, BridgeError> {
        self.ensure_known(name, index)?;
        let _serial = self.serial.lock();
        self.admission.admit()?;

        debug!(screen = screen_no, condition = name, index, ?mode, "Sending condition search");
        let result = self.channels.condition.call(
            screen_no,
            CallbackClass::ConditionResult,
            Correlation::condition(name, index),
            self.timeout,
            || {
                let code = self.gateway.send_condition(screen_no, name, index, mode)?;
                if code == 0 {
                    warn!(condition = name, "Condition search refused");
                    return Err(BridgeError::rejected("send condition", code));
                }
                let mut inner = self.inner.lock();
                // Once accepted, a live search stays subscribed at the gateway
                // whatever happens to the first result.
                if mode == ConditionSearchMode::Realtime {
                    inner.active.insert(
                        name.to_string(),
                        ActiveSearch {
                            screen_no: screen_no.to_string(),
                            index,
                        },
                    );
                }
                inner.state = ConditionState::Searching;
                Ok(())
            },
        );

        let mut inner = self.inner.lock();
        let outcome = match result {
            Ok(Ok(ConditionReply::Codes(codes))) => {
                info!(condition = name, count = codes.len(), "Condition search done");
                Ok(codes)
            }
            Ok(Ok(ConditionReply::Catalog(_))) => Err(BridgeError::DecodeFailed(
                "condition search answered with a catalog".into(),
            )),
            Ok(Err(e)) | Err(e) => {
                if inner.active.contains_key(name) && mode == ConditionSearchMode::Realtime {
                    warn!(condition = name, error = %e, "Live condition search left subscribed");
                }
                Err(e)
            }
        };
        inner.state = inner.idle_state();
        outcome
    }

    /// End a live search started with [`ConditionSearch::send`].
    pub fn stop(&self, screen_no: &str, name: &str, index: i32) -> Result<(), BridgeError> {
        {
            let inner = self.inner.lock();
            match inner.active.get(name) {
                Some(active) if active.index == index => {}
                _ => {
                    return Err(BridgeError::UnknownCondition {
                        name: name.to_string(),
                        index,
                    })
                }
            }
        }
        let _serial = self.serial.lock();
        self.admission.admit()?;
        self.gateway.send_condition_stop(screen_no, name, index)?;

        let mut inner = self.inner.lock();
        if let Some(active) = inner.active.remove(name) {
            if active.screen_no != screen_no {
                debug!(condition = name, registered = %active.screen_no, "Stopped on another screen");
            }
        }
        inner.state = inner.idle_state();
        info!(condition = name, "Live condition search stopped");
        Ok(())
    }

    fn ensure_known(&self, name: &str, index: i32) -> Result<(), BridgeError> {
        let inner = self.inner.lock();
        match &inner.catalog {
            Some(catalog) if catalog.contains(name, index) => Ok(()),
            _ => {
                warn!(condition = name, index, "Unknown condition");
                Err(BridgeError::UnknownCondition {
                    name: name.to_string(),
                    index,
                })
            }
        }
    }
}
