use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use kwbridge_core::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Chart input names understood by the simulated chart requests.
const INPUT_CODE: &str = "종목코드";
const INPUT_BASE_DATE: &str = "기준일자";
const MULTI_QUOTE_TR: &str = "OPTKWFID";

/// Configuration for the simulated gateway.
#[derive(Debug, Clone)]
pub struct SimulatedGatewayConfig {
    /// Bars served per chart page.
    pub page_size: usize,
    /// Pause before each callback is delivered.
    pub callback_delay: Duration,
    /// Offset used to read and write exchange-local timestamps.
    pub exchange_offset: FixedOffset,
    /// Serve every chart page from the newest bar whatever base date the
    /// request carries.
    pub ignore_base_date: bool,
}

impl Default for SimulatedGatewayConfig {
    fn default() -> Self {
        Self {
            page_size: 600,
            callback_delay: Duration::ZERO,
            exchange_offset: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
            ignore_base_date: false,
        }
    }
}

/// Operations whose immediate return code can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CommConnect,
    SubmitRequest,
    SubmitMultiQuote,
    SetLiveSubscription,
    SubmitOrder,
    ConditionLoad,
    SendCondition,
}

impl Operation {
    /// Code returned when nothing was scripted.
    fn default_code(&self) -> i32 {
        match self {
            Operation::ConditionLoad | Operation::SendCondition => 1,
            _ => 0,
        }
    }
}

/// One invocation seen by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    CommConnect,
    ConnectState,
    LoginInfo(LoginInfo),
    Request {
        tr_code: String,
        screen_no: String,
        inputs: Vec<(String, String)>,
    },
    MultiQuote {
        screen_no: String,
        codes: Vec<String>,
    },
    SetLive {
        screen_no: String,
        codes: Vec<String>,
    },
    RemoveLive {
        screen_no: String,
        code: String,
    },
    Order {
        kind: OrderKind,
        code: String,
        quantity: u32,
    },
    ConditionLoad,
    SendCondition {
        screen_no: String,
        name: String,
        index: i32,
        mode: ConditionSearchMode,
    },
    ConditionStop {
        screen_no: String,
        name: String,
        index: i32,
    },
    Metadata(MetadataQuery),
}

struct State {
    return_codes: HashMap<Operation, i32>,
    login_code: i32,
    connected: bool,
    login_info: HashMap<LoginInfo, String>,
    /// Bars per (code, chart tr code), newest first.
    series: HashMap<(String, &'static str), Vec<Bar>>,
    responses: HashMap<String, TransactionRecords>,
    decode_failures: HashSet<String>,
    catalog: String,
    catalog_ret_code: i32,
    condition_results: HashMap<String, Vec<String>>,
    metadata: HashMap<MetadataQuery, String>,
    muted: bool,
    holding: bool,
    held: Vec<GatewayCallback>,
    calls: Vec<SimCall>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            return_codes: HashMap::new(),
            login_code: 0,
            connected: false,
            login_info: HashMap::new(),
            series: HashMap::new(),
            responses: HashMap::new(),
            decode_failures: HashSet::new(),
            catalog: String::new(),
            catalog_ret_code: 1,
            condition_results: HashMap::new(),
            metadata: HashMap::new(),
            muted: false,
            holding: false,
            held: Vec::new(),
            calls: Vec::new(),
        }
    }
}

impl State {
    fn code(&self, op: Operation) -> i32 {
        self.return_codes
            .get(&op)
            .copied()
            .unwrap_or_else(|| op.default_code())
    }
}

type PageBuffer = Arc<Mutex<HashMap<String, Result<TransactionRecords, String>>>>;

/// An in-process gateway driven by scripted data.
///
/// Immediate return codes come from the script; asynchronous results are
/// queued to a delivery thread that calls the attached sink, so callers see
/// the same cross-thread callback pattern as with the real control.
pub struct SimulatedGateway {
    config: SimulatedGatewayConfig,
    state: Mutex<State>,
    pages: PageBuffer,
    outbox: Mutex<Option<mpsc::Sender<GatewayCallback>>>,
}

impl SimulatedGateway {
    pub fn new(config: SimulatedGatewayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            pages: Arc::new(Mutex::new(HashMap::new())),
            outbox: Mutex::new(None),
        }
    }

    /// Decoder reading the records buffered for each delivered page.
    pub fn decoder(&self) -> SimulatedDecoder {
        SimulatedDecoder {
            pages: Arc::clone(&self.pages),
        }
    }

    // -- scripting --------------------------------------------------------

    pub fn set_return_code(&self, op: Operation, code: i32) {
        self.state.lock().return_codes.insert(op, code);
    }

    /// Code carried by the login callback.
    pub fn set_login_code(&self, code: i32) {
        self.state.lock().login_code = code;
    }

    pub fn set_login_info(&self, info: LoginInfo, value: &str) {
        self.state.lock().login_info.insert(info, value.to_string());
    }

    /// Install the bars served by the chart request of `granularity`.
    pub fn set_series(&self, code: &str, granularity: Granularity, mut bars: Vec<Bar>) {
        bars.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.state
            .lock()
            .series
            .insert((code.to_string(), granularity.tr_code()), bars);
    }

    /// Records returned for any request with `tr_code`.
    pub fn set_response(&self, tr_code: &str, records: TransactionRecords) {
        self.state.lock().responses.insert(tr_code.to_string(), records);
    }

    /// Make decoding of `tr_code` responses fail.
    pub fn fail_decoding(&self, tr_code: &str) {
        self.state.lock().decode_failures.insert(tr_code.to_string());
    }

    pub fn set_catalog(&self, catalog: &str, ret_code: i32) {
        let mut state = self.state.lock();
        state.catalog = catalog.to_string();
        state.catalog_ret_code = ret_code;
    }

    pub fn set_condition_result(&self, name: &str, codes: &[&str]) {
        self.state.lock().condition_results.insert(
            name.to_string(),
            codes.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn set_metadata(&self, query: MetadataQuery, value: &str) {
        self.state.lock().metadata.insert(query, value.to_string());
    }

    /// Swallow asynchronous results instead of delivering them.
    pub fn mute_callbacks(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    /// Queue asynchronous results until [`SimulatedGateway::release_held`].
    pub fn hold_callbacks(&self, holding: bool) {
        self.state.lock().holding = holding;
    }

    /// Deliver every held callback in the order it was produced. Returns
    /// how many were released.
    pub fn release_held(&self) -> usize {
        let held = std::mem::take(&mut self.state.lock().held);
        let count = held.len();
        for callback in held {
            self.send(callback);
        }
        count
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    // -- unsolicited events -----------------------------------------------

    /// Deliver an arbitrary callback.
    pub fn push(&self, callback: GatewayCallback) {
        self.emit(callback);
    }

    pub fn push_real_condition(&self, code: &str, event: ConditionEventType, name: &str, index: i32) {
        let event_type = match event {
            ConditionEventType::Entered => "I",
            ConditionEventType::Left => "D",
        };
        self.emit(GatewayCallback::RealCondition {
            code: code.to_string(),
            event_type: event_type.to_string(),
            condition_name: name.to_string(),
            condition_index: format!("{index:03}"),
        });
    }

    pub fn push_real_data(&self, code: &str, real_type: &str, raw: &str) {
        self.emit(GatewayCallback::RealData(RealTick {
            code: code.to_string(),
            real_type: real_type.to_string(),
            raw: raw.to_string(),
        }));
    }

    pub fn push_message(&self, screen_no: &str, message: &str) {
        self.emit(GatewayCallback::Message(ServerMessage {
            screen_no: screen_no.to_string(),
            rq_name: String::new(),
            tr_code: String::new(),
            message: message.to_string(),
        }));
    }

    // -- internals ----------------------------------------------------------

    fn record(&self, call: SimCall) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        debug!(?call, "Simulated gateway call");
        state.calls.push(call);
        state
    }

    fn emit(&self, callback: GatewayCallback) {
        {
            let mut state = self.state.lock();
            if state.muted {
                debug!(class = %callback.class(), "Callback muted");
                return;
            }
            if state.holding {
                debug!(class = %callback.class(), "Callback held");
                state.held.push(callback);
                return;
            }
        }
        self.send(callback);
    }

    fn send(&self, callback: GatewayCallback) {
        match self.outbox.lock().as_ref() {
            Some(tx) => {
                if tx.send(callback).is_err() {
                    warn!("Callback delivery thread has stopped");
                }
            }
            None => warn!("No callback sink attached"),
        }
    }

    fn emit_page(&self, ready: TransactionDataReady, records: Result<TransactionRecords, String>) {
        self.pages.lock().insert(ready.screen_no.clone(), records);
        self.emit(GatewayCallback::TransactionData(ready));
    }

    /// One chart page: bars at or before the base date, newest first.
    fn chart_page(
        &self,
        bars: &[Bar],
        tr_code: &str,
        request: &TransactionRequest,
    ) -> (TransactionRecords, bool) {
        let offset = self.config.exchange_offset;
        let cursor = request
            .input_value(INPUT_BASE_DATE)
            .filter(|_| !self.config.ignore_base_date)
            .and_then(|raw| parse_base_date(raw, offset));
        let eligible: Vec<&Bar> = bars
            .iter()
            .filter(|b| cursor.map_or(true, |c| b.timestamp <= c))
            .collect();
        let has_more = eligible.len() > self.config.page_size;
        let minute = tr_code == Granularity::Minute(1).tr_code();
        let rows = eligible
            .into_iter()
            .take(self.config.page_size)
            .map(|bar| chart_row(bar, minute, offset))
            .collect();
        (
            TransactionRecords {
                single: Default::default(),
                rows,
            },
            has_more,
        )
    }

    fn multi_quote_records(&self, state: &State, codes: &[String]) -> TransactionRecords {
        if let Some(records) = state.responses.get(MULTI_QUOTE_TR) {
            return records.clone();
        }
        let rows = codes
            .iter()
            .map(|code| {
                let name = state
                    .metadata
                    .get(&MetadataQuery::StockName(code.clone()))
                    .cloned()
                    .unwrap_or_default();
                let price = state
                    .metadata
                    .get(&MetadataQuery::LastPrice(code.clone()))
                    .cloned()
                    .unwrap_or_default();
                [
                    ("종목코드".to_string(), code.clone()),
                    ("종목명".to_string(), name),
                    ("현재가".to_string(), price),
                ]
                .into_iter()
                .collect()
            })
            .collect();
        TransactionRecords {
            single: Default::default(),
            rows,
        }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(SimulatedGatewayConfig::default())
    }
}

fn parse_base_date(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let naive = if raw.len() == 14 {
        NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S").ok()?
    } else {
        // A bare date covers the whole day.
        let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
        date.and_time(NaiveTime::from_hms_opt(23, 59, 59)?)
    };
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

fn chart_row(
    bar: &Bar,
    minute: bool,
    offset: FixedOffset,
) -> std::collections::BTreeMap<String, String> {
    let local = bar.timestamp.with_timezone(&offset);
    let (field, time) = if minute {
        ("체결시간", local.format("%Y%m%d%H%M%S").to_string())
    } else {
        ("일자", local.format("%Y%m%d").to_string())
    };
    // Minute charts carry a direction sign on prices.
    let sign = if !minute {
        ""
    } else if bar.close < bar.open {
        "-"
    } else {
        "+"
    };
    [
        (field.to_string(), time),
        ("시가".to_string(), format!("{sign}{}", bar.open)),
        ("고가".to_string(), format!("{sign}{}", bar.high)),
        ("저가".to_string(), format!("{sign}{}", bar.low)),
        ("현재가".to_string(), format!("{sign}{}", bar.close)),
        ("거래량".to_string(), bar.volume.to_string()),
    ]
    .into_iter()
    .collect()
}

fn is_chart(tr_code: &str) -> Option<&'static str> {
    [
        Granularity::Minute(1),
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ]
    .into_iter()
    .map(|g| g.tr_code())
    .find(|code| *code == tr_code)
}

impl Gateway for SimulatedGateway {
    fn attach(&self, sink: Arc<dyn CallbackSink>) {
        let (tx, rx) = mpsc::channel::<GatewayCallback>();
        let delay = self.config.callback_delay;
        let spawned = thread::Builder::new()
            .name("sim-callbacks".to_string())
            .spawn(move || {
                for callback in rx {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    sink.deliver(callback);
                }
            });
        match spawned {
            Ok(_) => *self.outbox.lock() = Some(tx),
            Err(e) => error!(error = %e, "Failed to start callback delivery thread"),
        }
    }

    fn comm_connect(&self) -> Result<i32, BridgeError> {
        let (code, login_code) = {
            let mut state = self.record(SimCall::CommConnect);
            let code = state.code(Operation::CommConnect);
            if code == 0 {
                state.connected = state.login_code == 0;
            }
            (code, state.login_code)
        };
        if code == 0 {
            self.emit(GatewayCallback::Login { code: login_code });
        }
        Ok(code)
    }

    fn connect_state(&self) -> Result<bool, BridgeError> {
        Ok(self.record(SimCall::ConnectState).connected)
    }

    fn login_info(&self, info: LoginInfo) -> Result<String, BridgeError> {
        let state = self.record(SimCall::LoginInfo(info));
        Ok(state.login_info.get(&info).cloned().unwrap_or_default())
    }

    fn submit_request(&self, request: &TransactionRequest) -> Result<i32, BridgeError> {
        let (code, page) = {
            let state = self.record(SimCall::Request {
                tr_code: request.tr_code.clone(),
                screen_no: request.screen_no.clone(),
                inputs: request.inputs.clone(),
            });
            let code = state.code(Operation::SubmitRequest);
            if code != 0 {
                return Ok(code);
            }
            let page = if state.decode_failures.contains(&request.tr_code) {
                (
                    Err(format!("no output layout for {}", request.tr_code)),
                    false,
                )
            } else if let Some(chart) = is_chart(&request.tr_code) {
                let code = request.input_value(INPUT_CODE).unwrap_or_default();
                let bars = state
                    .series
                    .get(&(code.to_string(), chart))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let (records, has_more) = self.chart_page(bars, chart, request);
                (Ok(records), has_more)
            } else {
                (
                    Ok(state
                        .responses
                        .get(&request.tr_code)
                        .cloned()
                        .unwrap_or_default()),
                    false,
                )
            };
            (code, page)
        };

        let (records, has_more) = page;
        self.emit_page(
            TransactionDataReady {
                screen_no: request.screen_no.clone(),
                rq_name: request.rq_name.clone(),
                tr_code: request.tr_code.clone(),
                record_name: String::new(),
                prev_next: if has_more { PrevNext::Next } else { PrevNext::First },
            },
            records,
        );
        Ok(code)
    }

    fn submit_multi_quote(&self, request: &MultiQuoteRequest) -> Result<i32, BridgeError> {
        let (code, records) = {
            let state = self.record(SimCall::MultiQuote {
                screen_no: request.screen_no.clone(),
                codes: request.codes.clone(),
            });
            let code = state.code(Operation::SubmitMultiQuote);
            if code != 0 {
                return Ok(code);
            }
            (code, self.multi_quote_records(&state, &request.codes))
        };
        self.emit_page(
            TransactionDataReady {
                screen_no: request.screen_no.clone(),
                rq_name: request.rq_name.clone(),
                tr_code: MULTI_QUOTE_TR.to_string(),
                record_name: String::new(),
                prev_next: PrevNext::First,
            },
            Ok(records),
        );
        Ok(code)
    }

    fn set_live_subscription(&self, subscription: &LiveSubscription) -> Result<i32, BridgeError> {
        let state = self.record(SimCall::SetLive {
            screen_no: subscription.screen_no.clone(),
            codes: subscription.codes.clone(),
        });
        Ok(state.code(Operation::SetLiveSubscription))
    }

    fn remove_live_subscription(&self, screen_no: &str, code: &str) -> Result<(), BridgeError> {
        self.record(SimCall::RemoveLive {
            screen_no: screen_no.to_string(),
            code: code.to_string(),
        });
        Ok(())
    }

    fn submit_order(&self, order: &OrderRequest) -> Result<i32, BridgeError> {
        let code = self
            .record(SimCall::Order {
                kind: order.kind,
                code: order.code.clone(),
                quantity: order.quantity,
            })
            .code(Operation::SubmitOrder);
        if code == 0 {
            // Accepted orders are reported as immediately filled.
            self.emit(GatewayCallback::Chejan {
                gubun: "0".to_string(),
                item_count: 6,
                fid_list: "9201;9203;9001;302;900;901".to_string(),
            });
        }
        Ok(code)
    }

    fn condition_load(&self) -> Result<i32, BridgeError> {
        let (code, ret_code, catalog) = {
            let state = self.record(SimCall::ConditionLoad);
            (
                state.code(Operation::ConditionLoad),
                state.catalog_ret_code,
                state.catalog.clone(),
            )
        };
        if code == 1 {
            self.emit(GatewayCallback::ConditionCatalogSaved { ret_code, catalog });
        }
        Ok(code)
    }

    fn send_condition(
        &self,
        screen_no: &str,
        name: &str,
        index: i32,
        mode: ConditionSearchMode,
    ) -> Result<i32, BridgeError> {
        let (code, codes) = {
            let state = self.record(SimCall::SendCondition {
                screen_no: screen_no.to_string(),
                name: name.to_string(),
                index,
                mode,
            });
            (
                state.code(Operation::SendCondition),
                state.condition_results.get(name).cloned().unwrap_or_default(),
            )
        };
        if code != 0 {
            let mut code_list = codes.join(";");
            if !code_list.is_empty() {
                code_list.push(';');
            }
            self.emit(GatewayCallback::ConditionResult {
                screen_no: screen_no.to_string(),
                code_list,
                condition_name: name.to_string(),
                condition_index: index,
                next: 0,
            });
        }
        Ok(code)
    }

    fn send_condition_stop(&self, screen_no: &str, name: &str, index: i32) -> Result<(), BridgeError> {
        self.record(SimCall::ConditionStop {
            screen_no: screen_no.to_string(),
            name: name.to_string(),
            index,
        });
        Ok(())
    }

    fn query_metadata(&self, query: &MetadataQuery) -> Result<String, BridgeError> {
        let state = self.record(SimCall::Metadata(query.clone()));
        Ok(state.metadata.get(query).cloned().unwrap_or_default())
    }
}

/// Hands out the records buffered for the page just delivered on a screen.
#[derive(Clone)]
pub struct SimulatedDecoder {
    pages: PageBuffer,
}

impl TransactionDecoder for SimulatedDecoder {
    fn decode(&self, ready: &TransactionDataReady) -> Result<TransactionRecords, BridgeError> {
        match self.pages.lock().remove(&ready.screen_no) {
            Some(Ok(records)) => Ok(records),
            Some(Err(reason)) => Err(BridgeError::DecodeFailed(reason)),
            None => Err(BridgeError::DecodeFailed(format!(
                "no data buffered for screen {}",
                ready.screen_no
            ))),
        }
    }
}
