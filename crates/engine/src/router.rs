use kwbridge_core::{
    split_list, BridgeError, CallbackClass, CallbackSink, ChejanKind, ChejanNotice, Clock,
    ConditionCatalog, ConditionEvent, ConditionEventType, ConditionResultEvent, GatewayCallback,
    Notification, PrevNext, Session, TransactionDataReady, TransactionDecoder, TransactionPage,
};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bridge::{PendingRequest, SuspensionBridge};
use crate::registry::{NotificationRegistry, RoutingKey};

/// What the condition channel resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionReply {
    Catalog(ConditionCatalog),
    Codes(Vec<String>),
}

/// One bridge per independent request channel, plus the session they share.
pub struct Channels {
    pub login: SuspensionBridge<i32>,
    pub transaction: SuspensionBridge<Result<TransactionPage, BridgeError>>,
    pub condition: SuspensionBridge<Result<ConditionReply, BridgeError>>,
    pub session: RwLock<Session>,
}

impl Channels {
    pub fn new() -> Self {
        Self {
            login: SuspensionBridge::new("login"),
            transaction: SuspensionBridge::new("transaction"),
            condition: SuspensionBridge::new("condition"),
            session: RwLock::new(Session::new()),
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives every gateway callback and either resolves the bridge waiting
/// for it or hands it to the registered observer.
pub struct CallbackRouter {
    channels: Arc<Channels>,
    registry: Arc<NotificationRegistry>,
    decoder: Arc<dyn TransactionDecoder>,
    clock: Arc<dyn Clock>,
}

impl CallbackRouter {
    pub fn new(
        channels: Arc<Channels>,
        registry: Arc<NotificationRegistry>,
        decoder: Arc<dyn TransactionDecoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channels,
            registry,
            decoder,
            clock,
        }
    }

    pub fn route(&self, callback: GatewayCallback) {
        let class = callback.class();
        debug!(%class, "Routing gateway callback");
        match callback {
            GatewayCallback::Login { code } => self.on_login(code),
            GatewayCallback::TransactionData(ready) => self.on_transaction_data(&ready),
            GatewayCallback::ConditionCatalogSaved { ret_code, catalog } => {
                self.on_catalog_saved(ret_code, &catalog)
            }
            GatewayCallback::ConditionResult {
                screen_no,
                code_list,
                condition_name,
                condition_index,
                next,
            } => self.on_condition_result(ConditionResultEvent {
                screen_no,
                codes: split_list(&code_list),
                condition_name,
                condition_index,
                has_more: next == PrevNext::Next.code(),
            }),
            GatewayCallback::RealCondition {
                code,
                event_type,
                condition_name,
                condition_index,
            } => self.on_real_condition(code, &event_type, condition_name, &condition_index),
            GatewayCallback::RealData(tick) => {
                self.registry
                    .dispatch(&RoutingKey::RealData, &Notification::RealData(tick));
            }
            GatewayCallback::Chejan {
                gubun,
                item_count,
                fid_list,
            } => {
                let notice = ChejanNotice {
                    kind: ChejanKind::from_raw(&gubun),
                    item_count,
                    fids: split_list(&fid_list),
                };
                self.registry
                    .dispatch(&RoutingKey::Chejan, &Notification::Chejan(notice));
            }
            GatewayCallback::Message(message) => {
                info!(
                    screen = %message.screen_no,
                    rq_name = %message.rq_name,
                    "Server message: {}",
                    message.message
                );
                self.registry
                    .dispatch(&RoutingKey::Message, &Notification::Message(message));
            }
        }
    }

    fn on_login(&self, code: i32) {
        self.channels
            .session
            .write()
            .apply_login_result(code, self.clock.now());
        if code == 0 {
            info!("Login succeeded");
        } else {
            warn!(code, "Login failed");
        }
        self.channels.login.resolve(code);
    }

    fn on_transaction_data(&self, ready: &TransactionDataReady) {
        let bridge = &self.channels.transaction;
        let is_ours = |p: &PendingRequest| {
            p.class == CallbackClass::TransactionData
                && p.key == ready.screen_no
                && p.correlation.accepts_transaction(&ready.rq_name, &ready.tr_code)
        };
        match bridge.pending() {
            Some(p) if is_ours(&p) => {}
            Some(p) => {
                warn!(
                    screen = %ready.screen_no,
                    rq_name = %ready.rq_name,
                    tr_code = %ready.tr_code,
                    pending = %p.key,
                    "Declining transaction data that does not answer the pending request"
                );
                return;
            }
            None => {
                debug!(
                    screen = %ready.screen_no,
                    rq_name = %ready.rq_name,
                    "Transaction data with nothing pending"
                );
                return;
            }
        }

        let decoded = panic::catch_unwind(AssertUnwindSafe(|| self.decoder.decode(ready)))
            .unwrap_or_else(|_| {
                error!(tr_code = %ready.tr_code, "Transaction decoder panicked");
                Err(BridgeError::DecodeFailed(format!(
                    "decoder panicked on {}",
                    ready.tr_code
                )))
            });
        let payload = match decoded {
            Ok(records) => Ok(TransactionPage {
                rq_name: ready.rq_name.clone(),
                tr_code: ready.tr_code.clone(),
                screen_no: ready.screen_no.clone(),
                records,
                has_more: ready.prev_next == PrevNext::Next,
            }),
            Err(e) => {
                warn!(tr_code = %ready.tr_code, error = %e, "Transaction decode failed");
                Err(e)
            }
        };
        bridge.resolve_if(is_ours, payload);
    }

    fn on_catalog_saved(&self, ret_code: i32, catalog: &str) {
        let payload = if ret_code == 1 {
            ConditionCatalog::parse(catalog)
                .map(ConditionReply::Catalog)
                .map_err(|e| {
                    warn!(error = %e, "Unparseable condition catalog");
                    BridgeError::ConditionLoadFailed(ret_code)
                })
        } else {
            warn!(ret_code, "Condition catalog load failed");
            Err(BridgeError::ConditionLoadFailed(ret_code))
        };
        let resolved = self
            .channels
            .condition
            .resolve_if(|p| p.class == CallbackClass::ConditionCatalog, payload);
        if !resolved {
            debug!(ret_code, "Catalog callback with no load pending");
        }
    }

    fn on_condition_result(&self, event: ConditionResultEvent) {
        let screen = event.screen_no.clone();
        let name = event.condition_name.clone();
        let index = event.condition_index;
        let codes = event.codes.clone();
        info!(
            screen = %screen,
            condition = %name,
            count = codes.len(),
            "Condition search result"
        );
        self.registry.dispatch(
            &RoutingKey::Screen(screen.clone()),
            &Notification::ConditionResult(event),
        );
        let resolved = self.channels.condition.resolve_if(
            |p| {
                p.class == CallbackClass::ConditionResult
                    && p.key == screen
                    && p.correlation.accepts_condition(&name, index)
            },
            Ok(ConditionReply::Codes(codes)),
        );
        if !resolved {
            warn!(
                screen = %screen,
                condition = %name,
                index,
                "Condition result does not answer the pending search"
            );
        }
    }

    fn on_real_condition(
        &self,
        code: String,
        event_type: &str,
        condition_name: String,
        condition_index: &str,
    ) {
        let Some(event_type) = ConditionEventType::from_raw(event_type) else {
            warn!(code = %code, event_type, "Unknown condition event type");
            return;
        };
        let Ok(condition_index) = condition_index.trim().parse::<i32>() else {
            warn!(code = %code, condition_index, "Malformed condition index");
            return;
        };
        let event = ConditionEvent {
            code,
            event_type,
            condition_name,
            condition_index,
        };
        self.registry
            .dispatch(&RoutingKey::RealCondition, &Notification::Condition(event));
    }
}

impl CallbackSink for CallbackRouter {
    fn deliver(&self, callback: GatewayCallback) {
        let class = callback.class();
        if panic::catch_unwind(AssertUnwindSafe(|| self.route(callback))).is_err() {
            error!(%class, "Callback handler panicked");
            let fault = format!("{class} handler panicked");
            // Release the waiter of the faulted class.
            match class {
                CallbackClass::TransactionData => {
                    self.channels
                        .transaction
                        .resolve_if(|p| p.class == class, Err(BridgeError::Handler(fault)));
                }
                CallbackClass::ConditionCatalog | CallbackClass::ConditionResult => {
                    self.channels
                        .condition
                        .resolve_if(|p| p.class == class, Err(BridgeError::Handler(fault)));
                }
                _ => {}
            }
        }
    }
}
