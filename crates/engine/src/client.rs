use chrono::NaiveDate;
use kwbridge_core::{
    parse_unsigned_decimal, split_list, split_pairs, Bar, BridgeError, CallbackClass, Clock,
    ConditionCatalog, ConditionSearchMode, ConditionState, ConnectionState, DateRange, Gateway,
    Granularity, LiveSubscription, LoginInfo, Market, MetadataQuery, MultiQuoteRequest,
    Notification, OrderRequest, ServerEnvironment, Session, SystemClock, ThemeGroup,
    TransactionDecoder, TransactionPage, TransactionRequest,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::account::{self, BalanceView, DelistingFilter, PerRanking};
use crate::bridge::Correlation;
use crate::condition::ConditionSearch;
use crate::config::{BridgeConfig, ConfigError};
use crate::maintenance::MaintenanceGuard;
use crate::pagination::{Paginator, SeriesRequest};
use crate::registry::{NotificationRegistry, RoutingKey};
use crate::router::{CallbackRouter, Channels};
use crate::throttle::RequestThrottle;
use crate::transaction::{Admission, TransactionCycle};

pub const CHART_SCREEN: &str = "0101";
pub const QUOTE_SCREEN: &str = "0102";
const LOGIN_KEY: &str = "login";
const MULTI_QUOTE_NAME: &str = "관심종목조회";

/// Synchronous facade over a callback-driven gateway.
///
/// Every operation that reaches the gateway is refused up front during
/// scheduled maintenance.
pub struct BridgeClient {
    gateway: Arc<dyn Gateway>,
    config: BridgeConfig,
    channels: Arc<Channels>,
    registry: Arc<NotificationRegistry>,
    admission: Arc<Admission>,
    transactions: Arc<TransactionCycle>,
    paginator: Paginator,
    conditions: ConditionSearch,
    login_serial: Mutex<()>,
}

impl BridgeClient {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        decoder: Arc<dyn TransactionDecoder>,
        config: BridgeConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(gateway, decoder, config, Arc::new(SystemClock))
    }

    /// Build a client that reads wall-clock time from `clock`.
    pub fn with_clock(
        gateway: Arc<dyn Gateway>,
        decoder: Arc<dyn TransactionDecoder>,
        config: BridgeConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let guard = MaintenanceGuard::new(&config.maintenance)?;
        let throttle = RequestThrottle::new(&config.throttle);
        let admission = Arc::new(Admission::new(guard, throttle, Arc::clone(&clock)));

        let channels = Arc::new(Channels::new());
        let registry = Arc::new(NotificationRegistry::new());
        let router = CallbackRouter::new(
            Arc::clone(&channels),
            Arc::clone(&registry),
            decoder,
            clock,
        );
        gateway.attach(Arc::new(router));

        let transactions = Arc::new(TransactionCycle::new(
            Arc::clone(&gateway),
            Arc::clone(&channels),
            Arc::clone(&admission),
            config.timeouts.request(),
        ));
        let paginator = Paginator::new(
            Arc::clone(&transactions),
            &config.pagination,
            config.exchange.offset()?,
        );
        let conditions = ConditionSearch::new(
            Arc::clone(&gateway),
            Arc::clone(&channels),
            Arc::clone(&admission),
            config.timeouts.condition(),
        );

        Ok(Self {
            gateway,
            config,
            channels,
            registry,
            admission,
            transactions,
            paginator,
            conditions,
            login_serial: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Log in and return the gateway's result code: 0 on success, negative
    /// on failure. The session state follows the code either way.
    pub fn login(&self) -> Result<i32, BridgeError> {
        let _serial = self.login_serial.lock();
        self.admission.check()?;
        let now = self.admission.clock().now();
        self.channels.session.write().begin_login(now);
        info!("Logging in");

        let result = self
            .channels
            .login
            .call(
                LOGIN_KEY,
                CallbackClass::Login,
                Correlation::Any,
                self.config.timeouts.login(),
                || {
                    let code = self.gateway.comm_connect()?;
                    if code != 0 {
                        return Err(BridgeError::rejected("login", code));
                    }
                    Ok(())
                },
            );

        let code = match result {
            Ok(code) => code,
            Err(BridgeError::RequestRejected { code, .. }) => {
                warn!(code, "Login refused");
                self.channels.session.write().apply_login_result(code, now);
                return Ok(code);
            }
            Err(e) => {
                self.channels.session.write().disconnect();
                return Err(e);
            }
        };

        if code == 0 {
            match self.gateway.login_info(LoginInfo::ServerKind) {
                Ok(raw) => {
                    let environment = ServerEnvironment::from_server_kind(&raw);
                    info!(?environment, "Connected");
                    self.channels.session.write().environment = Some(environment);
                }
                Err(e) => warn!(error = %e, "Could not read server kind"),
            }
        }
        Ok(code)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channels.session.read().state
    }

    pub fn session(&self) -> Session {
        self.channels.session.read().clone()
    }

    /// Ask the gateway whether the connection is still up.
    pub fn is_connected(&self) -> Result<bool, BridgeError> {
        self.admission.check()?;
        self.gateway.connect_state()
    }

    pub fn login_info(&self, info: LoginInfo) -> Result<String, BridgeError> {
        self.admission.check()?;
        self.gateway.login_info(info)
    }

    pub fn server_environment(&self) -> Result<ServerEnvironment, BridgeError> {
        self.login_info(LoginInfo::ServerKind)
            .map(|raw| ServerEnvironment::from_server_kind(&raw))
    }

    pub fn account_numbers(&self) -> Result<Vec<String>, BridgeError> {
        self.login_info(LoginInfo::AccountNumbers)
            .map(|raw| split_list(&raw))
    }

    // -----------------------------------------------------------------------
    // Transactions and series
    // -----------------------------------------------------------------------

    /// Run an arbitrary transaction request.
    pub fn request(&self, request: &TransactionRequest) -> Result<TransactionPage, BridgeError> {
        self.transactions.request(request)
    }

    pub fn bars(
        &self,
        code: &str,
        granularity: Granularity,
        range: DateRange,
    ) -> Result<Vec<Bar>, BridgeError> {
        self.paginator.fetch(&SeriesRequest {
            code: code.to_string(),
            granularity,
            range,
            screen_no: CHART_SCREEN.to_string(),
        })
    }

    pub fn minute_bars(&self, code: &str, tick: u32, range: DateRange) -> Result<Vec<Bar>, BridgeError> {
        self.bars(code, Granularity::minute(tick)?, range)
    }

    pub fn daily_bars(&self, code: &str, range: DateRange) -> Result<Vec<Bar>, BridgeError> {
        self.bars(code, Granularity::Day, range)
    }

    pub fn weekly_bars(&self, code: &str, range: DateRange) -> Result<Vec<Bar>, BridgeError> {
        self.bars(code, Granularity::Week, range)
    }

    pub fn monthly_bars(&self, code: &str, range: DateRange) -> Result<Vec<Bar>, BridgeError> {
        self.bars(code, Granularity::Month, range)
    }

    /// Interest quotes for several stock codes at once.
    pub fn multi_quote(&self, codes: &[&str]) -> Result<TransactionPage, BridgeError> {
        let request = MultiQuoteRequest::new(MULTI_QUOTE_NAME, QUOTE_SCREEN, codes);
        self.transactions.request_multi_quote(&request)
    }

    // -----------------------------------------------------------------------
    // Account and screening requests
    // -----------------------------------------------------------------------

    /// Return on the account's holdings.
    pub fn account_return(&self, account: &str) -> Result<TransactionPage, BridgeError> {
        self.transactions.request(&account::account_return(account)?)
    }

    /// Today's realised profit on one stock.
    pub fn realized_profit_detail(
        &self,
        account: &str,
        password: &str,
        code: &str,
    ) -> Result<TransactionPage, BridgeError> {
        self.transactions
            .request(&account::realized_profit_detail(account, password, code)?)
    }

    pub fn account_evaluation(
        &self,
        account: &str,
        password: &str,
        delisting: DelistingFilter,
    ) -> Result<TransactionPage, BridgeError> {
        self.transactions
            .request(&account::account_evaluation(account, password, delisting)?)
    }

    /// Holdings with evaluation and profit per position.
    pub fn account_balance(
        &self,
        account: &str,
        password: &str,
        view: BalanceView,
    ) -> Result<TransactionPage, BridgeError> {
        self.transactions
            .request(&account::account_balance(account, password, view)?)
    }

    pub fn per_ranking(&self, kind: PerRanking) -> Result<TransactionPage, BridgeError> {
        self.transactions.request(&account::per_ranking(kind))
    }

    // -----------------------------------------------------------------------
    // Condition search
    // -----------------------------------------------------------------------

    pub fn load_conditions(&self) -> Result<ConditionCatalog, BridgeError> {
        self.conditions.load()
    }

    pub fn send_condition(
        &self,
        screen_no: &str,
        name: &str,
        index: i32,
        mode: ConditionSearchMode,
    ) -> Result<Vec<String>, BridgeError> {
        self.conditions.send(screen_no, name, index, mode)
    }

    pub fn stop_condition(&self, screen_no: &str, name: &str, index: i32) -> Result<(), BridgeError> {
        self.conditions.stop(screen_no, name, index)
    }

    pub fn condition_state(&self) -> ConditionState {
        self.conditions.state()
    }

    pub fn condition_catalog(&self) -> Option<ConditionCatalog> {
        self.conditions.catalog()
    }

    // -----------------------------------------------------------------------
    // Orders and live data
    // -----------------------------------------------------------------------

    /// Send an order. Fills arrive on the `Chejan` observer.
    pub fn submit_order(&self, order: &OrderRequest) -> Result<(), BridgeError> {
        order.validate()?;
        self.admission.admit()?;
        let code = self.gateway.submit_order(order)?;
        if code != 0 {
            warn!(order_id = %order.id, code, "Order rejected");
            return Err(BridgeError::rejected("order", code));
        }
        info!(
            order_id = %order.id,
            kind = ?order.kind,
            code = %order.code,
            quantity = order.quantity,
            "Order submitted"
        );
        Ok(())
    }

    /// Start real-time delivery for the subscription's codes.
    pub fn register_live(&self, subscription: &LiveSubscription) -> Result<(), BridgeError> {
        subscription.validate()?;
        self.admission.check()?;
        let code = self.gateway.set_live_subscription(subscription)?;
        if code != 0 {
            return Err(BridgeError::rejected("live subscription", code));
        }
        info!(
            screen = %subscription.screen_no,
            codes = subscription.codes.len(),
            "Live subscription registered"
        );
        Ok(())
    }

    pub fn remove_live(&self, screen_no: &str, code: &str) -> Result<(), BridgeError> {
        self.admission.check()?;
        self.gateway.remove_live_subscription(screen_no, code)
    }

    // -----------------------------------------------------------------------
    // Static metadata
    // -----------------------------------------------------------------------

    pub fn metadata(&self, query: &MetadataQuery) -> Result<String, BridgeError> {
        self.admission.check()?;
        self.gateway.query_metadata(query)
    }

    pub fn stock_name(&self, code: &str) -> Result<String, BridgeError> {
        self.metadata(&MetadataQuery::StockName(code.to_string()))
    }

    pub fn listed_stock_count(&self, code: &str) -> Result<u64, BridgeError> {
        let raw = self.metadata(&MetadataQuery::ListedStockCount(code.to_string()))?;
        raw.trim()
            .parse()
            .map_err(|e| BridgeError::DecodeFailed(format!("bad listed stock count '{raw}': {e}")))
    }

    /// Supervision label such as "정상" or "투자주의".
    pub fn construction(&self, code: &str) -> Result<String, BridgeError> {
        self.metadata(&MetadataQuery::Construction(code.to_string()))
    }

    pub fn listed_date(&self, code: &str) -> Result<NaiveDate, BridgeError> {
        let raw = self.metadata(&MetadataQuery::ListedDate(code.to_string()))?;
        NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
            .map_err(|e| BridgeError::DecodeFailed(format!("bad listing date '{raw}': {e}")))
    }

    /// Previous close.
    pub fn last_price(&self, code: &str) -> Result<Decimal, BridgeError> {
        let raw = self.metadata(&MetadataQuery::LastPrice(code.to_string()))?;
        parse_unsigned_decimal(&raw)
            .ok_or_else(|| BridgeError::DecodeFailed(format!("bad last price '{raw}'")))
    }

    /// `|`-separated state flags, e.g. "증거금100%|담보대출불가".
    pub fn stock_state(&self, code: &str) -> Result<Vec<String>, BridgeError> {
        let raw = self.metadata(&MetadataQuery::StockState(code.to_string()))?;
        Ok(raw
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn codes_by_market(&self, market: Market) -> Result<Vec<String>, BridgeError> {
        self.metadata(&MetadataQuery::CodesByMarket(market))
            .map(|raw| split_list(&raw))
    }

    pub fn theme_groups(&self, by_name: bool) -> Result<Vec<ThemeGroup>, BridgeError> {
        let raw = self.metadata(&MetadataQuery::ThemeGroups(by_name))?;
        Ok(split_pairs(&raw)
            .into_iter()
            .map(|(code, name)| ThemeGroup { code, name })
            .collect())
    }

    /// Stock codes in a theme, without the gateway's `A` prefix.
    pub fn theme_members(&self, theme_code: &str) -> Result<Vec<String>, BridgeError> {
        let raw = self.metadata(&MetadataQuery::ThemeMembers(theme_code.to_string()))?;
        Ok(split_list(&raw)
            .into_iter()
            .map(|code| code.strip_prefix('A').map(str::to_string).unwrap_or(code))
            .collect())
    }

    /// Member firm codes and names.
    pub fn branch_codes(&self) -> Result<Vec<(String, String)>, BridgeError> {
        self.metadata(&MetadataQuery::BranchCodes)
            .map(|raw| split_pairs(&raw))
    }

    pub fn module_path(&self) -> Result<String, BridgeError> {
        self.metadata(&MetadataQuery::ModulePath)
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Route notifications for `key` to `observer`, replacing any previous
    /// one. Returns `true` when an observer was replaced.
    pub fn register_observer<F>(&self, key: RoutingKey, observer: F) -> bool
    where
        F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register(key, observer)
    }

    pub fn unregister_observer(&self, key: &RoutingKey) -> bool {
        self.registry.unregister(key)
    }
}
