//! End-to-end behaviour of the client against the simulated gateway.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use kwbridge_core::*;
use kwbridge_engine::config::ThrottleConfig;
use kwbridge_engine::{BalanceView, BridgeClient, BridgeConfig, PerRanking, RoutingKey};
use kwbridge_gateway_sim::{demo, Operation, SimCall, SimulatedGateway, SimulatedGatewayConfig};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

fn kst(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap() - ChronoDuration::hours(9)
}

/// Wednesday noon in Seoul, outside every maintenance window.
fn weekday_noon() -> DateTime<Utc> {
    kst(2024, 1, 3, 12, 0)
}

fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.throttle = ThrottleConfig {
        min_interval_ms: 0,
        burst_limit: None,
    };
    config.pagination.page_delay_ms = 0;
    config.timeouts.login_secs = 5;
    config.timeouts.request_secs = 5;
    config.timeouts.condition_secs = 5;
    config
}

fn setup_with(config: BridgeConfig, now: DateTime<Utc>) -> (Arc<SimulatedGateway>, BridgeClient) {
    setup_gateway(SimulatedGatewayConfig::default(), config, now)
}

fn setup_gateway(
    gateway_config: SimulatedGatewayConfig,
    config: BridgeConfig,
    now: DateTime<Utc>,
) -> (Arc<SimulatedGateway>, BridgeClient) {
    let gateway = Arc::new(SimulatedGateway::new(gateway_config));
    let decoder = Arc::new(gateway.decoder());
    let client = BridgeClient::with_clock(gateway.clone(), decoder, config, FixedClock::at(now)).unwrap();
    (gateway, client)
}

fn setup() -> (Arc<SimulatedGateway>, BridgeClient) {
    setup_with(fast_config(), weekday_noon())
}

fn single(field: &str, value: &str) -> TransactionRecords {
    let mut single = BTreeMap::new();
    single.insert(field.to_string(), value.to_string());
    TransactionRecords {
        single,
        rows: Vec::new(),
    }
}

fn request_count(gateway: &SimulatedGateway) -> usize {
    gateway
        .calls()
        .iter()
        .filter(|c| matches!(c, SimCall::Request { .. }))
        .count()
}

#[test]
fn test_login_success_reads_environment() {
    let (gateway, client) = setup();
    gateway.set_login_info(LoginInfo::ServerKind, "1");
    gateway.set_login_info(LoginInfo::AccountNumbers, "8012345611;8012345612;");

    assert_eq!(client.login().unwrap(), 0);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.session().environment, Some(ServerEnvironment::Simulated));
    assert_eq!(client.account_numbers().unwrap(), vec!["8012345611", "8012345612"]);
    assert!(client.is_connected().unwrap());
}

#[test]
fn test_login_failure_code_is_returned() {
    let (gateway, client) = setup();
    gateway.set_login_code(-100);

    assert_eq!(client.login().unwrap(), -100);
    assert_eq!(client.connection_state(), ConnectionState::Failed(-100));
}

#[test]
fn test_login_refused_immediately() {
    let (gateway, client) = setup();
    gateway.set_return_code(Operation::CommConnect, -101);

    assert_eq!(client.login().unwrap(), -101);
    assert_eq!(client.connection_state(), ConnectionState::Failed(-101));
}

#[test]
fn test_minute_series_pages_back_to_range_start() {
    let (gateway, client) = setup();
    let newest = kst(2024, 1, 1, 23, 59);
    gateway.set_series(
        "005930",
        Granularity::Minute(1),
        demo::series("005930", Granularity::Minute(1), newest, 1_240, 71_000),
    );

    let range = DateRange::new(kst(2024, 1, 1, 0, 0), kst(2024, 1, 2, 0, 0)).unwrap();
    let bars = client.minute_bars("005930", 1, range).unwrap();

    assert_eq!(bars.len(), 1_240);
    assert_eq!(bars[0].timestamp, newest);
    assert!(bars.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    assert!(bars.iter().all(|b| range.contains(b.timestamp)));
    // Three pages of data, then one that came back empty.
    assert_eq!(request_count(&gateway), 4);

    let first_inputs = gateway
        .calls()
        .into_iter()
        .find_map(|c| match c {
            SimCall::Request { tr_code, inputs, .. } => Some((tr_code, inputs)),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_inputs.0, "opt10080");
    assert_eq!(
        first_inputs.1,
        vec![
            ("종목코드".to_string(), "005930".to_string()),
            ("틱범위".to_string(), "1".to_string()),
            ("기준일자".to_string(), "20240102000000".to_string()),
            ("수정주가구분".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn test_daily_series_stops_at_range_start() {
    let (gateway, client) = setup();
    let newest = kst(2024, 3, 29, 0, 0);
    gateway.set_series(
        "000660",
        Granularity::Day,
        demo::series("000660", Granularity::Day, newest, 750, 135_000),
    );

    let range = DateRange::new(kst(2023, 1, 1, 0, 0), newest).unwrap();
    let bars = client.daily_bars("000660", range).unwrap();

    let expected = (newest - range.start).num_days() as usize + 1;
    assert_eq!(bars.len(), expected);
    assert_eq!(bars.last().unwrap().timestamp, range.start);
    // 454 bars fit in one page; the cursor then steps past the start.
    assert_eq!(request_count(&gateway), 1);
}

#[test]
fn test_page_limit_is_enforced() {
    let mut config = fast_config();
    config.pagination.max_pages = Some(2);
    let (gateway, client) = setup_with(config, weekday_noon());
    let newest = kst(2024, 1, 1, 23, 59);
    gateway.set_series(
        "005930",
        Granularity::Minute(1),
        demo::series("005930", Granularity::Minute(1), newest, 1_240, 71_000),
    );

    let range = DateRange::new(kst(2024, 1, 1, 0, 0), kst(2024, 1, 2, 0, 0)).unwrap();
    let err = client.minute_bars("005930", 1, range).unwrap_err();
    assert!(matches!(err, BridgeError::PageLimitExceeded(2)));
}

#[test]
fn test_maintenance_window_blocks_every_call() {
    // Wednesday 04:50 in Seoul.
    let (gateway, client) = setup_with(fast_config(), kst(2024, 1, 3, 4, 50));

    let err = client.login().unwrap_err();
    assert!(matches!(err, BridgeError::MaintenanceWindow { code: -100, .. }));
    let range = DateRange::new(kst(2024, 1, 1, 0, 0), kst(2024, 1, 2, 0, 0)).unwrap();
    assert!(matches!(
        client.daily_bars("005930", range),
        Err(BridgeError::MaintenanceWindow { .. })
    ));
    assert!(matches!(
        client.stock_name("005930"),
        Err(BridgeError::MaintenanceWindow { .. })
    ));
    assert!(gateway.calls().is_empty());
}

#[test]
fn test_sunday_maintenance_window() {
    // Sunday 04:00 in Seoul.
    let (gateway, client) = setup_with(fast_config(), kst(2024, 1, 7, 4, 0));

    let err = client.load_conditions().unwrap_err();
    assert!(matches!(err, BridgeError::MaintenanceWindow { code: -101, .. }));
    assert!(gateway.calls().is_empty());
}

#[test]
fn test_rejected_request_leaves_bridge_usable() {
    let (gateway, client) = setup();
    let mut single = BTreeMap::new();
    single.insert("종목명".to_string(), "삼성전자".to_string());
    gateway.set_response(
        "opt10001",
        TransactionRecords {
            single,
            rows: Vec::new(),
        },
    );
    let request = TransactionRequest::new("주식기본정보", "opt10001", "0101").input("종목코드", "005930");

    gateway.set_return_code(Operation::SubmitRequest, -200);
    let err = client.request(&request).unwrap_err();
    assert!(matches!(err, BridgeError::RequestRejected { code: -200, .. }));

    gateway.set_return_code(Operation::SubmitRequest, 0);
    let page = client.request(&request).unwrap();
    assert_eq!(page.records.single["종목명"], "삼성전자");
    assert!(!page.has_more);
}

#[test]
fn test_decode_failure_is_reported() {
    let (gateway, client) = setup();
    gateway.fail_decoding("opt10001");
    let request = TransactionRequest::new("주식기본정보", "opt10001", "0101");

    let err = client.request(&request).unwrap_err();
    assert!(matches!(err, BridgeError::DecodeFailed(_)));
}

#[test]
fn test_request_timeout_then_recovery() {
    let mut config = fast_config();
    config.timeouts.request_secs = 1;
    let (gateway, client) = setup_with(config, weekday_noon());
    let request = TransactionRequest::new("주식기본정보", "opt10001", "0101");

    gateway.mute_callbacks(true);
    let err = client.request(&request).unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));

    gateway.mute_callbacks(false);
    assert!(client.request(&request).is_ok());
}

#[test]
fn test_multi_quote_rows() {
    let (gateway, client) = setup();
    demo::seed(&gateway, weekday_noon());

    let page = client.multi_quote(&["005930", "000660"]).unwrap();
    assert_eq!(page.records.rows.len(), 2);
    assert_eq!(page.records.rows[0]["종목명"], "삼성전자");
    assert!(matches!(
        client.multi_quote(&[]),
        Err(BridgeError::InvalidInput(_))
    ));
}

#[test]
fn test_condition_search_flow() {
    let (gateway, client) = setup();
    gateway.set_catalog("000^조건A;", 1);
    gateway.set_condition_result("조건A", &["005930", "000660"]);

    assert_eq!(client.condition_state(), ConditionState::Unloaded);
    let catalog = client.load_conditions().unwrap();
    assert_eq!(catalog.index_of("조건A"), Some(0));
    assert_eq!(client.condition_state(), ConditionState::Loaded);

    let codes = client
        .send_condition("0150", "조건A", 0, ConditionSearchMode::OneShot)
        .unwrap();
    assert_eq!(codes, vec!["005930", "000660"]);
    assert_eq!(client.condition_state(), ConditionState::Loaded);

    gateway.clear_calls();
    let err = client
        .send_condition("0150", "없는조건", 0, ConditionSearchMode::OneShot)
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownCondition { .. }));
    assert!(gateway.calls().is_empty());
}

#[test]
fn test_condition_send_before_load() {
    let (gateway, client) = setup();
    let err = client
        .send_condition("0150", "조건A", 0, ConditionSearchMode::OneShot)
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownCondition { .. }));
    assert!(gateway.calls().is_empty());
}

#[test]
fn test_condition_load_refused_and_failed() {
    let (gateway, client) = setup();
    gateway.set_return_code(Operation::ConditionLoad, 0);
    assert!(matches!(client.load_conditions(), Err(BridgeError::LoadRejected(0))));
    assert_eq!(client.condition_state(), ConditionState::Unloaded);

    gateway.set_return_code(Operation::ConditionLoad, 1);
    gateway.set_catalog("", 0);
    assert!(matches!(
        client.load_conditions(),
        Err(BridgeError::ConditionLoadFailed(0))
    ));
    assert_eq!(client.condition_state(), ConditionState::Unloaded);
}

#[test]
fn test_realtime_condition_delivers_events_until_stopped() {
    let (gateway, client) = setup();
    gateway.set_catalog("000^조건A;001^거래량급증;", 1);
    gateway.set_condition_result("거래량급증", &["000660"]);
    client.load_conditions().unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    client.register_observer(RoutingKey::RealCondition, move |notification| {
        if let Notification::Condition(event) = notification {
            tx.lock().send(event.clone())?;
        }
        Ok(())
    });

    let codes = client
        .send_condition("0151", "거래량급증", 1, ConditionSearchMode::Realtime)
        .unwrap();
    assert_eq!(codes, vec!["000660"]);
    assert_eq!(client.condition_state(), ConditionState::RealtimeActive);

    gateway.push_real_condition("005930", ConditionEventType::Entered, "거래량급증", 1);
    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.code, "005930");
    assert_eq!(event.event_type, ConditionEventType::Entered);
    assert_eq!(event.condition_index, 1);

    assert!(matches!(
        client.stop_condition("0151", "거래량급증", 0),
        Err(BridgeError::UnknownCondition { .. })
    ));
    client.stop_condition("0151", "거래량급증", 1).unwrap();
    assert_eq!(client.condition_state(), ConditionState::Loaded);
}

#[test]
fn test_order_fill_reaches_chejan_observer() {
    let (gateway, client) = setup();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    client.register_observer(RoutingKey::Chejan, move |notification| {
        if let Notification::Chejan(notice) = notification {
            tx.lock().send(notice.clone())?;
        }
        Ok(())
    });

    let order = OrderRequest::new(
        "8012345611",
        OrderKind::NewBuy,
        "005930",
        10,
        PriceType::Limit,
        Some(dec!(71000)),
    );
    client.submit_order(&order).unwrap();
    let notice = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(notice.kind, ChejanKind::OrderFill);
    assert!(gateway.calls().contains(&SimCall::Order {
        kind: OrderKind::NewBuy,
        code: "005930".into(),
        quantity: 10,
    }));

    gateway.set_return_code(Operation::SubmitOrder, -308);
    assert!(matches!(
        client.submit_order(&order),
        Err(BridgeError::RequestRejected { code: -308, .. })
    ));
}

#[test]
fn test_live_subscription_and_real_data() {
    let (gateway, client) = setup();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    client.register_observer(RoutingKey::RealData, move |notification| {
        if let Notification::RealData(tick) = notification {
            tx.lock().send(tick.code.clone())?;
        }
        Ok(())
    });

    let subscription = LiveSubscription {
        screen_no: "0200".into(),
        codes: vec!["005930".into()],
        fids: vec![10, 15],
        append: false,
    };
    client.register_live(&subscription).unwrap();
    gateway.push_real_data("005930", "주식체결", "+71100");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "005930");

    client.remove_live("0200", "005930").unwrap();
    assert!(gateway.calls().contains(&SimCall::RemoveLive {
        screen_no: "0200".into(),
        code: "005930".into(),
    }));
}

#[test]
fn test_metadata_passthroughs() {
    let (gateway, client) = setup();
    demo::seed(&gateway, weekday_noon());

    assert_eq!(client.stock_name("005930").unwrap(), "삼성전자");
    assert_eq!(client.listed_stock_count("005930").unwrap(), 5_969_782_550);
    assert_eq!(
        client.listed_date("005930").unwrap(),
        chrono::NaiveDate::from_ymd_opt(1975, 6, 11).unwrap()
    );
    assert_eq!(client.last_price("005930").unwrap(), dec!(71000));
    assert_eq!(client.stock_state("005930").unwrap().len(), 3);
    assert_eq!(client.codes_by_market(Market::Kospi).unwrap(), vec!["005930", "000660"]);
    assert_eq!(client.theme_members("141").unwrap(), vec!["005930", "000660"]);
    assert_eq!(client.theme_groups(true).unwrap()[0].name, "반도체");
    assert_eq!(client.branch_codes().unwrap().len(), 2);
    assert_eq!(client.module_path().unwrap(), "/opt/kwbridge/sim");
}

#[test]
fn test_late_transaction_data_never_answers_the_next_request() {
    let mut config = fast_config();
    config.timeouts.request_secs = 1;
    let (gateway, client) = setup_with(config, weekday_noon());
    gateway.set_response("opt10001", single("종목명", "삼성전자"));
    gateway.set_response("opt10002", single("거래원명", "키움증권"));
    let first = TransactionRequest::new("요청A", "opt10001", "0101");
    let second = TransactionRequest::new("요청B", "opt10002", "0101");

    gateway.hold_callbacks(true);
    assert!(matches!(client.request(&first), Err(BridgeError::Timeout { .. })));

    // Deliver the stale page first, once the second request is out.
    let releaser = {
        let gateway = Arc::clone(&gateway);
        thread::spawn(move || {
            let mut released = 0;
            while released < 2 {
                if request_count(&gateway) == 2 {
                    released += gateway.release_held();
                }
                thread::sleep(Duration::from_millis(5));
            }
            released
        })
    };
    let page = client.request(&second).unwrap();
    assert_eq!(releaser.join().unwrap(), 2);
    assert_eq!(page.rq_name, "요청B");
    assert_eq!(page.tr_code, "opt10002");
    assert_eq!(page.records.single["거래원명"], "키움증권");
}

#[test]
fn test_live_condition_timeout_can_still_be_stopped() {
    let mut config = fast_config();
    config.timeouts.condition_secs = 1;
    let (gateway, client) = setup_with(config, weekday_noon());
    gateway.set_catalog("000^조건A;001^거래량급증;", 1);
    client.load_conditions().unwrap();

    gateway.mute_callbacks(true);
    let err = client
        .send_condition("0151", "거래량급증", 1, ConditionSearchMode::Realtime)
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(client.condition_state(), ConditionState::RealtimeActive);

    client.stop_condition("0151", "거래량급증", 1).unwrap();
    assert!(gateway.calls().contains(&SimCall::ConditionStop {
        screen_no: "0151".into(),
        name: "거래량급증".into(),
        index: 1,
    }));
    assert_eq!(client.condition_state(), ConditionState::Loaded);
}

#[test]
fn test_refused_live_condition_is_not_tracked() {
    let (gateway, client) = setup();
    gateway.set_catalog("001^거래량급증;", 1);
    client.load_conditions().unwrap();

    gateway.set_return_code(Operation::SendCondition, 0);
    assert!(matches!(
        client.send_condition("0151", "거래량급증", 1, ConditionSearchMode::Realtime),
        Err(BridgeError::RequestRejected { code: 0, .. })
    ));
    assert_eq!(client.condition_state(), ConditionState::Loaded);
    assert!(matches!(
        client.stop_condition("0151", "거래량급증", 1),
        Err(BridgeError::UnknownCondition { .. })
    ));
}

#[test]
fn test_gateway_ignoring_base_date_stalls_pagination() {
    let gateway_config = SimulatedGatewayConfig {
        ignore_base_date: true,
        ..Default::default()
    };
    let (gateway, client) = setup_gateway(gateway_config, fast_config(), weekday_noon());
    let newest = kst(2024, 1, 1, 23, 59);
    gateway.set_series(
        "005930",
        Granularity::Minute(1),
        demo::series("005930", Granularity::Minute(1), newest, 1_240, 71_000),
    );

    let range = DateRange::new(kst(2024, 1, 1, 0, 0), kst(2024, 1, 2, 0, 0)).unwrap();
    let err = client.minute_bars("005930", 1, range).unwrap_err();
    assert!(matches!(err, BridgeError::PaginationStalled { .. }));
    // The repeated second page is where the walk stops.
    assert_eq!(request_count(&gateway), 2);
}

#[test]
fn test_account_and_screening_requests() {
    let (gateway, client) = setup();
    gateway.set_response(
        "opw00018",
        TransactionRecords {
            single: single("총평가금액", "000000071000000").single,
            rows: vec![[
                ("종목번호".to_string(), "A005930".to_string()),
                ("보유수량".to_string(), "000000000001000".to_string()),
            ]
            .into_iter()
            .collect()],
        },
    );
    gateway.set_response("opt10085", single("계좌번호", "8012345611"));

    let balance = client
        .account_balance("8012345611", "", BalanceView::Combined)
        .unwrap();
    assert_eq!(balance.tr_code, "opw00018");
    assert_eq!(balance.records.rows.len(), 1);
    assert_eq!(balance.records.single["총평가금액"], "000000071000000");
    assert!(gateway.calls().contains(&SimCall::Request {
        tr_code: "opw00018".into(),
        screen_no: "0103".into(),
        inputs: vec![
            ("계좌번호".to_string(), "8012345611".to_string()),
            ("비밀번호".to_string(), String::new()),
            ("비밀번호입력매체구분".to_string(), "00".to_string()),
            ("조회구분".to_string(), "1".to_string()),
        ],
    }));

    assert_eq!(
        client.account_return("8012345611").unwrap().records.single["계좌번호"],
        "8012345611"
    );
    assert_eq!(
        client
            .realized_profit_detail("8012345611", "", "005930")
            .unwrap()
            .tr_code,
        "opt10077"
    );
    assert_eq!(
        client
            .account_evaluation("8012345611", "", kwbridge_engine::DelistingFilter::All)
            .unwrap()
            .tr_code,
        "opw00004"
    );

    let ranking = client.per_ranking(PerRanking::KospiLow).unwrap();
    assert_eq!(ranking.rq_name, "고저PER");
    assert_eq!(request_count(&gateway), 5);

    assert!(matches!(
        client.account_return(""),
        Err(BridgeError::InvalidInput(_))
    ));
    assert_eq!(request_count(&gateway), 5);
}
