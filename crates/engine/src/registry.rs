use kwbridge_core::Notification;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What an observer is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    RealCondition,
    RealData,
    Chejan,
    Message,
    /// Results addressed to one screen number.
    Screen(String),
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::RealCondition => write!(f, "real_condition"),
            RoutingKey::RealData => write!(f, "real_data"),
            RoutingKey::Chejan => write!(f, "chejan"),
            RoutingKey::Message => write!(f, "message"),
            RoutingKey::Screen(screen) => write!(f, "screen:{screen}"),
        }
    }
}

pub type Observer = Arc<dyn Fn(&Notification) -> anyhow::Result<()> + Send + Sync>;

/// Routing table from event kind to a single observer.
#[derive(Default)]
pub struct NotificationRegistry {
    observers: RwLock<HashMap<RoutingKey, Observer>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `observer` for `key`. Returns `true` when it replaced one.
    pub fn register<F>(&self, key: RoutingKey, observer: F) -> bool
    where
        F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        debug!(%key, "Registering observer");
        self.observers.write().insert(key, Arc::new(observer)).is_some()
    }

    /// Remove the observer for `key`. Returns `true` when one was registered.
    pub fn unregister(&self, key: &RoutingKey) -> bool {
        self.observers.write().remove(key).is_some()
    }

    pub fn is_registered(&self, key: &RoutingKey) -> bool {
        self.observers.read().contains_key(key)
    }

    /// Hand `notification` to the observer for `key`.
    ///
    /// Returns `false` when no observer is registered. A failing or
    /// panicking observer is logged and does not affect the caller.
    pub fn dispatch(&self, key: &RoutingKey, notification: &Notification) -> bool {
        // Clone out so the observer runs without the lock held.
        let observer = self.observers.read().get(key).cloned();
        let Some(observer) = observer else {
            debug!(%key, "No observer registered");
            return false;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| observer(notification))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%key, error = %e, "Observer failed"),
            Err(_) => error!(%key, "Observer panicked"),
        }
        true
    }
}
