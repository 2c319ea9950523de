use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use kwbridge_core::*;
use kwbridge_engine::{BridgeClient, BridgeConfig, RoutingKey};
use kwbridge_gateway_sim::{demo, SimulatedGateway, SimulatedGatewayConfig};
use kwbridge_gateway_socket::{SocketGateway, SocketGatewayConfig};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "kwbridge")]
#[command(about = "Synchronous bridge to a callback-driven brokerage gateway")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bridge configuration file (TOML)
    #[arg(short, long, env = "KWBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway backend
    #[arg(long, value_enum, default_value = "sim")]
    gateway: GatewayKind,

    /// Helper host for the socket gateway
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Helper port for the socket gateway
    #[arg(long, default_value = "5560")]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GatewayKind {
    Sim,
    Socket,
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    Minute,
    Day,
    Week,
    Month,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the session
    Login,

    /// Fetch a historical bar series, newest first
    Bars {
        /// Stock code (e.g. "005930")
        code: String,

        #[arg(short, long, value_enum, default_value = "day")]
        granularity: GranularityArg,

        /// Minute tick range (minute bars only)
        #[arg(long, default_value = "1")]
        tick: u32,

        /// Range start, exchange-local (YYYY-MM-DD or "YYYY-MM-DD HH:MM")
        #[arg(long)]
        from: String,

        /// Range end, exchange-local; defaults to now
        #[arg(long)]
        to: Option<String>,
    },

    /// Load and list the stored condition catalog
    Conditions,

    /// Run a condition search
    Search {
        /// Condition name
        name: String,

        /// Condition index
        index: i32,

        #[arg(long, default_value = "0150")]
        screen: String,

        /// Stay subscribed and print entries/exits
        #[arg(long)]
        realtime: bool,

        /// How long to watch real-time events before stopping
        #[arg(long, default_value = "30")]
        watch_secs: u64,
    },

    /// Static information about a stock
    Info {
        code: String,
    },

    /// List codes of a market (kospi, kosdaq, etf, ...)
    Market {
        market: Market,
    },

    /// Quote several codes at once
    Quote {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Send a new order
    Order {
        /// Account number; defaults to the first account of the session
        #[arg(long)]
        account: Option<String>,

        #[arg(value_enum)]
        side: SideArg,

        code: String,

        quantity: u32,

        /// Limit price; omit for a market order
        #[arg(long)]
        price: Option<Decimal>,
    },
}

#[derive(Serialize)]
struct StockInfo {
    code: String,
    name: String,
    listed_stock_count: u64,
    listed_date: NaiveDate,
    last_price: Decimal,
    construction: String,
    state: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    let client = match cli.gateway {
        GatewayKind::Sim => {
            let offset = config.exchange.offset()?;
            let gateway = Arc::new(SimulatedGateway::new(SimulatedGatewayConfig {
                exchange_offset: offset,
                ..Default::default()
            }));
            demo::seed(&gateway, Utc::now());
            let decoder = Arc::new(gateway.decoder());
            BridgeClient::new(gateway, decoder, config)?
        }
        GatewayKind::Socket => {
            let gateway = Arc::new(
                SocketGateway::connect(&SocketGatewayConfig {
                    host: cli.host.clone(),
                    port: cli.port,
                    ..Default::default()
                })
                .await?,
            );
            let decoder = Arc::new(gateway.decoder());
            BridgeClient::new(gateway, decoder, config)?
        }
    };

    // Bridge calls block until the gateway calls back.
    let command = cli.command;
    tokio::task::spawn_blocking(move || run(&client, command)).await?
}

fn run(client: &BridgeClient, command: Commands) -> Result<()> {
    let code = client.login()?;
    if code != 0 {
        anyhow::bail!("Login failed: {} ({})", code, describe_return_code(code));
    }

    match command {
        Commands::Login => {
            print_json(&client.session())?;
            print_json(&client.account_numbers()?)?;
        }
        Commands::Bars {
            code,
            granularity,
            tick,
            from,
            to,
        } => {
            let offset = client.config().exchange.offset()?;
            let start = parse_local(&from, offset)?;
            let end = match to {
                Some(to) => parse_local(&to, offset)?,
                None => Utc::now(),
            };
            let range = DateRange::new(start, end)?;
            let bars = match granularity {
                GranularityArg::Minute => client.minute_bars(&code, tick, range)?,
                GranularityArg::Day => client.daily_bars(&code, range)?,
                GranularityArg::Week => client.weekly_bars(&code, range)?,
                GranularityArg::Month => client.monthly_bars(&code, range)?,
            };
            tracing::info!(code = %code, bars = bars.len(), "Series fetched");
            print_json(&bars)?;
        }
        Commands::Conditions => {
            let catalog = client.load_conditions()?;
            let listing: Vec<_> = catalog
                .iter()
                .map(|(name, index)| serde_json::json!({ "index": index, "name": name }))
                .collect();
            print_json(&listing)?;
        }
        Commands::Search {
            name,
            index,
            screen,
            realtime,
            watch_secs,
        } => {
            client.load_conditions()?;
            if !realtime {
                let codes = client.send_condition(&screen, &name, index, ConditionSearchMode::OneShot)?;
                print_json(&codes)?;
                return Ok(());
            }

            client.register_observer(RoutingKey::RealCondition, |notification| {
                print_json(notification)
            });
            let codes = client.send_condition(&screen, &name, index, ConditionSearchMode::Realtime)?;
            print_json(&codes)?;
            tracing::info!(condition = %name, secs = watch_secs, "Watching real-time condition");
            std::thread::sleep(Duration::from_secs(watch_secs));
            client.stop_condition(&screen, &name, index)?;
            client.unregister_observer(&RoutingKey::RealCondition);
        }
        Commands::Info { code } => {
            let info = StockInfo {
                name: client.stock_name(&code)?,
                listed_stock_count: client.listed_stock_count(&code)?,
                listed_date: client.listed_date(&code)?,
                last_price: client.last_price(&code)?,
                construction: client.construction(&code)?,
                state: client.stock_state(&code)?,
                code,
            };
            print_json(&info)?;
        }
        Commands::Market { market } => {
            print_json(&client.codes_by_market(market)?)?;
        }
        Commands::Quote { codes } => {
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            let page = client.multi_quote(&codes)?;
            tracing::debug!(rows = page.records.rows.len(), "Quote page");
            print_json(&page.records.rows)?;
        }
        Commands::Order {
            account,
            side,
            code,
            quantity,
            price,
        } => {
            let account = match account {
                Some(account) => account,
                None => client
                    .account_numbers()?
                    .into_iter()
                    .next()
                    .context("session has no accounts")?,
            };
            let kind = match side {
                SideArg::Buy => OrderKind::NewBuy,
                SideArg::Sell => OrderKind::NewSell,
            };
            let price_type = if price.is_some() {
                PriceType::Limit
            } else {
                PriceType::Market
            };
            let order = OrderRequest::new(&account, kind, &code, quantity, price_type, price);
            client.submit_order(&order)?;
            print_json(&order)?;
        }
    }

    Ok(())
}

/// Parse an exchange-local date or date-time.
fn parse_local(raw: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let naive = match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        Ok(ts) => ts,
        Err(_) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{raw}'"))?
            .and_time(NaiveTime::MIN),
    };
    let local = offset
        .from_local_datetime(&naive)
        .single()
        .with_context(|| format!("ambiguous local time '{raw}'"))?;
    Ok(local.with_timezone(&Utc))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
