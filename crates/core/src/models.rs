use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::traits::BridgeError;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Connection state of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Login callback reported a negative code.
    Failed(i32),
}

/// Which server the session is logged in to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEnvironment {
    Live,
    Simulated,
}

impl ServerEnvironment {
    /// The gateway reports `"1"` for the paper-trading server and anything
    /// else for the live one.
    pub fn from_server_kind(raw: &str) -> Self {
        if raw.trim() == "1" {
            ServerEnvironment::Simulated
        } else {
            ServerEnvironment::Live
        }
    }
}

/// One authenticated connection to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub state: ConnectionState,
    pub environment: Option<ServerEnvironment>,
    pub login_started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            environment: None,
            login_started_at: None,
            connected_at: None,
        }
    }

    pub fn begin_login(&mut self, now: DateTime<Utc>) {
        self.state = ConnectionState::Connecting;
        self.login_started_at = Some(now);
        self.connected_at = None;
    }

    /// Apply the code carried by the login callback: 0 connects, anything
    /// else is a failure.
    pub fn apply_login_result(&mut self, code: i32, now: DateTime<Utc>) {
        if code == 0 {
            self.state = ConnectionState::Connected;
            self.connected_at = Some(now);
        } else {
            self.state = ConnectionState::Failed(code);
            self.connected_at = None;
        }
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.environment = None;
        self.connected_at = None;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Granularity of a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Minute bars with the given tick range.
    Minute(u32),
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Tick ranges accepted by the minute chart request.
    pub const MINUTE_TICKS: [u32; 8] = [1, 3, 5, 10, 15, 30, 45, 60];

    pub fn minute(tick: u32) -> Result<Self, BridgeError> {
        if Self::MINUTE_TICKS.contains(&tick) {
            Ok(Granularity::Minute(tick))
        } else {
            Err(BridgeError::InvalidInput(format!(
                "unsupported minute tick range {tick}, expected one of {:?}",
                Self::MINUTE_TICKS
            )))
        }
    }

    /// Transaction code of the chart request for this granularity.
    pub fn tr_code(&self) -> &'static str {
        match self {
            Granularity::Minute(_) => "opt10080",
            Granularity::Day => "opt10081",
            Granularity::Week => "opt10082",
            Granularity::Month => "opt10083",
        }
    }

    pub fn request_name(&self) -> &'static str {
        match self {
            Granularity::Minute(_) => "주식분봉",
            Granularity::Day => "주식일봉",
            Granularity::Week => "주식주봉",
            Granularity::Month => "주식월봉",
        }
    }

    /// Output field holding the bar timestamp.
    pub fn time_field(&self) -> &'static str {
        match self {
            Granularity::Minute(_) => "체결시간",
            _ => "일자",
        }
    }

    /// Move `ts` back by exactly one unit of this granularity.
    pub fn step_back(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Minute(tick) => ts.checked_sub_signed(Duration::minutes(i64::from(*tick))),
            Granularity::Day => ts.checked_sub_signed(Duration::days(1)),
            Granularity::Week => ts.checked_sub_signed(Duration::weeks(1)),
            Granularity::Month => ts.checked_sub_months(Months::new(1)),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Minute(tick) => write!(f, "{tick}min"),
            Granularity::Day => write!(f, "day"),
            Granularity::Week => write!(f, "week"),
            Granularity::Month => write!(f, "month"),
        }
    }
}

/// Inclusive time range of a historical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BridgeError> {
        if start > end {
            return Err(BridgeError::InvalidInput(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

// ---------------------------------------------------------------------------
// Condition search
// ---------------------------------------------------------------------------

/// Server-stored condition definitions, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCatalog {
    entries: BTreeMap<String, i32>,
}

impl ConditionCatalog {
    /// Parse the gateway's `"index^name;index^name;"` listing.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let mut entries = BTreeMap::new();
        for item in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (index, name) = item.split_once('^').ok_or_else(|| {
                BridgeError::DecodeFailed(format!("malformed condition entry '{item}'"))
            })?;
            let index = index.trim().parse::<i32>().map_err(|e| {
                BridgeError::DecodeFailed(format!("bad condition index in '{item}': {e}"))
            })?;
            entries.insert(name.to_string(), index);
        }
        Ok(Self { entries })
    }

    pub fn index_of(&self, name: &str) -> Option<i32> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str, index: i32) -> bool {
        self.index_of(name) == Some(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.entries.iter().map(|(name, index)| (name.as_str(), *index))
    }
}

/// One-shot search or a search that stays subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSearchMode {
    OneShot,
    Realtime,
}

impl ConditionSearchMode {
    pub fn code(&self) -> i32 {
        match self {
            ConditionSearchMode::OneShot => 0,
            ConditionSearchMode::Realtime => 1,
        }
    }
}

/// Where the condition-search protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionState {
    Unloaded,
    Loading,
    Loaded,
    Searching,
    RealtimeActive,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order instruction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    NewBuy,
    NewSell,
    CancelBuy,
    CancelSell,
    ModifyBuy,
    ModifySell,
}

impl OrderKind {
    pub fn code(&self) -> i32 {
        match self {
            OrderKind::NewBuy => 1,
            OrderKind::NewSell => 2,
            OrderKind::CancelBuy => 3,
            OrderKind::CancelSell => 4,
            OrderKind::ModifyBuy => 5,
            OrderKind::ModifySell => 6,
        }
    }

    /// Cancels and modifications refer to an existing order.
    pub fn needs_original(&self) -> bool {
        !matches!(self, OrderKind::NewBuy | OrderKind::NewSell)
    }
}

/// Price condition ("hoga") of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Limit,
    Market,
    ConditionalLimit,
    BestLimit,
    PriorityLimit,
    LimitIoc,
    MarketIoc,
    BestIoc,
    LimitFok,
    MarketFok,
    BestFok,
    PreMarketClose,
    AfterHoursSingle,
    PostMarketClose,
}

impl PriceType {
    pub fn code(&self) -> &'static str {
        match self {
            PriceType::Limit => "00",
            PriceType::Market => "03",
            PriceType::ConditionalLimit => "05",
            PriceType::BestLimit => "06",
            PriceType::PriorityLimit => "07",
            PriceType::LimitIoc => "10",
            PriceType::MarketIoc => "13",
            PriceType::BestIoc => "16",
            PriceType::LimitFok => "20",
            PriceType::MarketFok => "23",
            PriceType::BestFok => "26",
            PriceType::PreMarketClose => "61",
            PriceType::AfterHoursSingle => "62",
            PriceType::PostMarketClose => "81",
        }
    }

    /// Market-like and after-hours types are sent without a price.
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            PriceType::Limit
                | PriceType::ConditionalLimit
                | PriceType::LimitIoc
                | PriceType::LimitFok
                | PriceType::AfterHoursSingle
        )
    }
}

/// An order to be submitted through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub rq_name: String,
    pub screen_no: String,
    pub account_no: String,
    pub kind: OrderKind,
    pub code: String,
    pub quantity: u32,
    pub price: Option<Decimal>,
    pub price_type: PriceType,
    /// Order number being cancelled or modified.
    pub original_order_no: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn new(
        account_no: &str,
        kind: OrderKind,
        code: &str,
        quantity: u32,
        price_type: PriceType,
        price: Option<Decimal>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            rq_name: format!("order-{}", id.simple()),
            screen_no: "0101".to_string(),
            account_no: account_no.to_string(),
            kind,
            code: code.to_string(),
            quantity,
            price,
            price_type,
            original_order_no: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_original(mut self, order_no: &str) -> Self {
        self.original_order_no = Some(order_no.to_string());
        self
    }

    pub fn with_screen(mut self, screen_no: &str) -> Self {
        self.screen_no = screen_no.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.account_no.trim().is_empty() {
            return Err(BridgeError::InvalidInput("account number is empty".into()));
        }
        if self.code.trim().is_empty() {
            return Err(BridgeError::InvalidInput("stock code is empty".into()));
        }
        if self.quantity == 0 && !matches!(self.kind, OrderKind::CancelBuy | OrderKind::CancelSell) {
            return Err(BridgeError::InvalidInput("order quantity must be positive".into()));
        }
        if self.price_type.requires_price() {
            match self.price {
                Some(p) if p > Decimal::ZERO => {}
                _ => {
                    return Err(BridgeError::InvalidInput(format!(
                        "price type {:?} requires a positive price",
                        self.price_type
                    )))
                }
            }
        }
        if self.kind.needs_original() && self.original_order_no.is_none() {
            return Err(BridgeError::InvalidInput(format!(
                "{:?} needs the original order number",
                self.kind
            )));
        }
        Ok(())
    }

    /// Price as sent on the wire; zero for types that carry no price.
    pub fn wire_price(&self) -> Decimal {
        if self.price_type.requires_price() {
            self.price.unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Continuation flag of a transaction request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrevNext {
    First,
    Next,
}

impl PrevNext {
    pub fn code(&self) -> i32 {
        match self {
            PrevNext::First => 0,
            PrevNext::Next => 2,
        }
    }

    /// The gateway signals "more data" with `"2"`.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim() == "2" {
            PrevNext::Next
        } else {
            PrevNext::First
        }
    }
}

/// A single transaction (TR) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub rq_name: String,
    pub tr_code: String,
    pub screen_no: String,
    pub prev_next: PrevNext,
    /// Input values set before the request is sent, in order.
    pub inputs: Vec<(String, String)>,
}

impl TransactionRequest {
    pub fn new(rq_name: &str, tr_code: &str, screen_no: &str) -> Self {
        Self {
            rq_name: rq_name.to_string(),
            tr_code: tr_code.to_string(),
            screen_no: screen_no.to_string(),
            prev_next: PrevNext::First,
            inputs: Vec::new(),
        }
    }

    pub fn input(mut self, id: &str, value: impl Into<String>) -> Self {
        self.inputs.push((id.to_string(), value.into()));
        self
    }

    pub fn continued(mut self, prev_next: PrevNext) -> Self {
        self.prev_next = prev_next;
        self
    }

    pub fn input_value(&self, id: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.as_str())
    }
}

/// Interest-quote request for several codes at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiQuoteRequest {
    pub rq_name: String,
    pub screen_no: String,
    pub codes: Vec<String>,
    /// Futures/options interest instead of stock interest.
    pub futures: bool,
    pub prev_next: PrevNext,
}

impl MultiQuoteRequest {
    pub const MAX_CODES: usize = 100;

    pub fn new(rq_name: &str, screen_no: &str, codes: &[&str]) -> Self {
        Self {
            rq_name: rq_name.to_string(),
            screen_no: screen_no.to_string(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
            futures: false,
            prev_next: PrevNext::First,
        }
    }

    pub fn code_list(&self) -> String {
        self.codes.join(";")
    }

    pub fn type_flag(&self) -> i32 {
        if self.futures {
            3
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.codes.is_empty() || self.codes.len() > Self::MAX_CODES {
            return Err(BridgeError::InvalidInput(format!(
                "multi quote accepts 1..={} codes, got {}",
                Self::MAX_CODES,
                self.codes.len()
            )));
        }
        Ok(())
    }
}

/// Decoded output of a transaction: single-valued fields and repeated rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecords {
    pub single: BTreeMap<String, String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl TransactionRecords {
    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.rows.is_empty()
    }
}

/// One decoded response page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub rq_name: String,
    pub tr_code: String,
    pub screen_no: String,
    pub records: TransactionRecords,
    pub has_more: bool,
}

/// Registration of real-time quote delivery for a set of codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSubscription {
    pub screen_no: String,
    pub codes: Vec<String>,
    pub fids: Vec<u32>,
    /// Add to the screen's existing registrations instead of replacing them.
    pub append: bool,
}

impl LiveSubscription {
    pub const MAX_ITEMS: usize = 100;

    pub fn code_list(&self) -> String {
        self.codes.join(";")
    }

    pub fn fid_list(&self) -> String {
        self.fids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn reg_type(&self) -> &'static str {
        if self.append {
            "1"
        } else {
            "0"
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.codes.is_empty() || self.codes.len() > Self::MAX_ITEMS {
            return Err(BridgeError::InvalidInput(format!(
                "live subscription accepts 1..={} codes",
                Self::MAX_ITEMS
            )));
        }
        if self.fids.len() > Self::MAX_ITEMS {
            return Err(BridgeError::InvalidInput(format!(
                "live subscription accepts at most {} fids",
                Self::MAX_ITEMS
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Static metadata
// ---------------------------------------------------------------------------

/// Login-scoped information the gateway can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginInfo {
    AccountCount,
    AccountNumbers,
    UserId,
    UserName,
    KeyboardSecurity,
    Firewall,
    ServerKind,
}

impl LoginInfo {
    pub fn tag(&self) -> &'static str {
        match self {
            LoginInfo::AccountCount => "ACCOUNT_CNT",
            LoginInfo::AccountNumbers => "ACCNO",
            LoginInfo::UserId => "USER_ID",
            LoginInfo::UserName => "USER_NAME",
            LoginInfo::KeyboardSecurity => "KEY_BSECGB",
            LoginInfo::Firewall => "FIREW_SECGB",
            LoginInfo::ServerKind => "GetServerGubun",
        }
    }
}

/// Market segment used by the code-list lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Kospi,
    Kosdaq,
    Elw,
    MutualFund,
    NewStockRights,
    Reits,
    Etf,
    HighYieldFund,
    ThirdMarket,
    Konex,
}

impl Market {
    pub fn code(&self) -> &'static str {
        match self {
            Market::Kospi => "0",
            Market::Elw => "3",
            Market::MutualFund => "4",
            Market::NewStockRights => "5",
            Market::Reits => "6",
            Market::Etf => "8",
            Market::HighYieldFund => "9",
            Market::Kosdaq => "10",
            Market::ThirdMarket => "30",
            Market::Konex => "50",
        }
    }
}

impl FromStr for Market {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kospi" | "0" => Ok(Market::Kospi),
            "kosdaq" | "10" => Ok(Market::Kosdaq),
            "elw" | "3" => Ok(Market::Elw),
            "mutual_fund" | "4" => Ok(Market::MutualFund),
            "new_stock_rights" | "5" => Ok(Market::NewStockRights),
            "reits" | "6" => Ok(Market::Reits),
            "etf" | "8" => Ok(Market::Etf),
            "high_yield_fund" | "9" => Ok(Market::HighYieldFund),
            "third_market" | "30" => Ok(Market::ThirdMarket),
            "konex" | "50" => Ok(Market::Konex),
            other => Err(BridgeError::InvalidInput(format!("unknown market '{other}'"))),
        }
    }
}

/// Static lookups answered synchronously by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "query", content = "arg", rename_all = "snake_case")]
pub enum MetadataQuery {
    StockName(String),
    ListedStockCount(String),
    Construction(String),
    ListedDate(String),
    LastPrice(String),
    StockState(String),
    CodesByMarket(Market),
    /// Theme groups sorted by theme name when `true`, by code otherwise.
    ThemeGroups(bool),
    ThemeMembers(String),
    BranchCodes,
    ModulePath,
}

/// A stock theme as listed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeGroup {
    pub code: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Parsing helpers for gateway strings
// ---------------------------------------------------------------------------

/// Split a `;`-delimited gateway list, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a `code|name;code|name` listing into pairs.
pub fn split_pairs(raw: &str) -> Vec<(String, String)> {
    split_list(raw)
        .into_iter()
        .filter_map(|item| {
            item.split_once('|')
                .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
        })
        .collect()
}

/// Parse a gateway numeric field. Prices carry a `+`/`-` direction marker
/// relative to the previous close; the magnitude is the price.
pub fn parse_unsigned_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim().trim_start_matches(|c| c == '+' || c == '-');
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_catalog_parse() {
        let catalog = ConditionCatalog::parse("000^골든크로스;001^거래량급증;").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.index_of("거래량급증"), Some(1));
        assert!(catalog.contains("골든크로스", 0));
        assert!(!catalog.contains("골든크로스", 1));
    }

    #[test]
    fn test_catalog_parse_rejects_garbage() {
        assert!(ConditionCatalog::parse("abc").is_err());
        assert!(ConditionCatalog::parse("x^name;").is_err());
        assert!(ConditionCatalog::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_step_back_month_clamps_day() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let prev = Granularity::Month.step_back(ts).unwrap();
        assert_eq!(prev, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_step_back_minute_uses_tick() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap();
        let prev = Granularity::Minute(5).step_back(ts).unwrap();
        assert_eq!(prev, Utc.with_ymd_and_hms(2024, 1, 2, 6, 25, 0).unwrap());
    }

    #[test]
    fn test_minute_tick_validation() {
        assert!(Granularity::minute(3).is_ok());
        assert!(Granularity::minute(7).is_err());
    }

    #[test]
    fn test_session_transitions() {
        let now = Utc::now();
        let mut session = Session::new();
        session.begin_login(now);
        assert_eq!(session.state, ConnectionState::Connecting);
        session.apply_login_result(-100, now);
        assert_eq!(session.state, ConnectionState::Failed(-100));
        session.apply_login_result(0, now);
        assert!(session.is_connected());
    }

    #[test]
    fn test_order_validation() {
        let order = OrderRequest::new("8012345611", OrderKind::NewBuy, "005930", 10, PriceType::Limit, None);
        assert!(order.validate().is_err());

        let order = OrderRequest::new("8012345611", OrderKind::NewBuy, "005930", 10, PriceType::Market, None);
        assert!(order.validate().is_ok());
        assert_eq!(order.wire_price(), Decimal::ZERO);

        let cancel = OrderRequest::new("8012345611", OrderKind::CancelBuy, "005930", 0, PriceType::Limit, Some(dec!(70000)));
        assert!(cancel.validate().is_err());
        assert!(cancel.with_original("0012345").validate().is_ok());
    }

    #[test]
    fn test_parse_unsigned_decimal_strips_direction() {
        assert_eq!(parse_unsigned_decimal("-71200"), Some(dec!(71200)));
        assert_eq!(parse_unsigned_decimal(" +500 "), Some(dec!(500)));
        assert_eq!(parse_unsigned_decimal(""), None);
    }

    #[test]
    fn test_split_helpers() {
        assert_eq!(split_list(";005930;000660;"), vec!["005930", "000660"]);
        assert_eq!(
            split_pairs("100|태양광;152|합성섬유"),
            vec![
                ("100".to_string(), "태양광".to_string()),
                ("152".to_string(), "합성섬유".to_string())
            ]
        );
    }

    #[test]
    fn test_market_from_str() {
        assert_eq!("kosdaq".parse::<Market>().unwrap(), Market::Kosdaq);
        assert_eq!("0".parse::<Market>().unwrap(), Market::Kospi);
        assert!("nasdaq".parse::<Market>().is_err());
    }
}
