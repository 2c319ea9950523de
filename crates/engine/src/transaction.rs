use kwbridge_core::{
    BridgeError, CallbackClass, Clock, Gateway, MultiQuoteRequest, TransactionPage,
    TransactionRequest,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bridge::Correlation;
use crate::maintenance::MaintenanceGuard;
use crate::router::Channels;
use crate::throttle::RequestThrottle;

/// Gate every gateway request passes: maintenance check, then spacing.
pub struct Admission {
    guard: MaintenanceGuard,
    throttle: RequestThrottle,
    clock: Arc<dyn Clock>,
}

impl Admission {
    pub fn new(guard: MaintenanceGuard, throttle: RequestThrottle, clock: Arc<dyn Clock>) -> Self {
        Self {
            guard,
            throttle,
            clock,
        }
    }

    /// Maintenance check only, for passthroughs that are not rate limited.
    pub fn check(&self) -> Result<(), BridgeError> {
        self.guard.check(self.clock.now())
    }

    /// Maintenance check followed by the throttle wait.
    pub fn admit(&self) -> Result<(), BridgeError> {
        self.check()?;
        self.throttle.acquire();
        Ok(())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Sends transaction requests and blocks until their data callback.
pub struct TransactionCycle {
    gateway: Arc<dyn Gateway>,
    channels: Arc<Channels>,
    admission: Arc<Admission>,
    serial: Mutex<()>,
    timeout: Option<Duration>,
}

impl TransactionCycle {
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
        }
    }

    /// Run one request to completion.
    ///
    /// A non-zero immediate code fails with `RequestRejected` without
    /// waiting on the bridge.
    pub fn request(&self, request: &TransactionRequest) -> Result<TransactionPage, BridgeError> {
        let _serial = self.serial.lock();
        self.admission.admit()?;
        debug!(
            tr_code = %request.tr_code,
            rq_name = %request.rq_name,
            screen = %request.screen_no,
            prev_next = ?request.prev_next,
            "Submitting transaction request"
        );
        self.channels.transaction.call(
            &request.screen_no,
            CallbackClass::TransactionData,
            Correlation::transaction(&request.rq_name, &request.tr_code),
            self.timeout,
            || {
                let code = self.gateway.submit_request(request)?;
                if code != 0 {
                    warn!(tr_code = %request.tr_code, code, "Transaction request rejected");
                    return Err(BridgeError::rejected(&format!("transaction {}", request.tr_code), code));
                }
                Ok(())
            },
        )?
    }

    /// Interest quotes for up to 100 codes in one round trip.
    pub fn request_multi_quote(
        &self,
        request: &MultiQuoteRequest,
    ) -> Result<TransactionPage, BridgeError> {
        request.validate()?;
        let _serial = self.serial.lock();
        self.admission.admit()?;
        debug!(
            screen = %request.screen_no,
            count = request.codes.len(),
            "Submitting multi quote request"
        );
        // The gateway names the reply's transaction code itself.
        let correlation = Correlation::Transaction {
            rq_name: request.rq_name.clone(),
            tr_code: None,
        };
        self.channels.transaction.call(
            &request.screen_no,
            CallbackClass::TransactionData,
            correlation,
            self.timeout,
            || {
                let code = self.gateway.submit_multi_quote(request)?;
                if code != 0 {
                    warn!(code, "Multi quote request rejected");
                    return Err(BridgeError::rejected("multi quote", code));
                }
                Ok(())
            },
        )?
    }
}
