//! Zenith Client - Command Line Entry Point
//!
//! Connects, runs one request and prints the JSON result.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use zenith_client::config::loader::{load_config, load_from_env};
use zenith_client::{OrderDetails, OrderRoute, OrderSide, Response, TopicUpdate, ZenithClient};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; flat ZENITH_* variables are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the configured level
    #[arg(long)]
    log_level: Option<String>,

    /// Use the staging environment
    #[arg(long)]
    staging: bool,

    /// Print every frame sent and received
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    Identify,
    ServerInfo,
    Accounts,
    Orders {
        account: String,
    },
    Holdings {
        account: String,
    },
    Balances {
        account: String,
    },
    Markets,
    Security {
        code: String,
        market: String,
    },
    Place {
        account: String,
        code: String,
        market: String,
        #[arg(value_parser = parse_side)]
        side: OrderSide,
        quantity: Decimal,
        #[arg(long)]
        limit_price: Option<Decimal>,
    },
    Cancel {
        account: String,
        order_id: String,
    },
    /// Print updates of a trades subscription for a while
    Watch {
        code: String,
        market: String,
        #[arg(long, default_value = "30")]
        seconds: u64,
    },
}

fn parse_side(value: &str) -> std::result::Result<OrderSide, String> {
    match value.to_lowercase().as_str() {
        "bid" | "buy" => Ok(OrderSide::Bid),
        "ask" | "sell" => Ok(OrderSide::Ask),
        other => Err(format!("unknown side: {}", other)),
    }
}

/// Level from the command line if given, else from configuration
fn log_level(requested: Option<&str>, configured: &str) -> Level {
    match requested.unwrap_or(configured).to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    dotenvy::dotenv().ok();

    let mut config = match &args.config {
        Some(path) => load_config(Some(path.as_str())).context("loading configuration file")?,
        None => load_from_env().context("loading configuration from environment")?,
    };
    config.staging |= args.staging;
    config.debug |= args.debug;

    // Initialize logging
    let level = log_level(args.log_level.as_deref(), &config.settings.log_level);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut client = ZenithClient::new(config)?;
    if args.debug {
        let mut frames = client.frames();
        tokio::spawn(async move {
            while let Ok(frame) = frames.recv().await {
                println!("{:?}: {}", frame.direction, frame.text);
            }
        });
    }

    client
        .connect(|reason| error!("Connection lost: {}", reason))
        .await?;

    let outcome = run(&client, args.action).await;
    client.disconnect().await;

    let response = outcome?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Some(code) = response.result.as_deref().filter(|code| *code != "Success") {
        bail!("request returned {}", code);
    }
    Ok(())
}

async fn run(client: &ZenithClient, action: Action) -> Result<Response> {
    let response = match action {
        Action::Identify => client.identify().await?,
        Action::ServerInfo => client.server_info().await?,
        Action::Accounts => client.query_accounts().await?,
        Action::Orders { account } => client.query_orders(&account).await?,
        Action::Holdings { account } => client.query_holdings(&account).await?,
        Action::Balances { account } => client.query_balances(&account).await?,
        Action::Markets => client.query_markets().await?,
        Action::Security { code, market } => client.query_security(&code, &market).await?,
        Action::Place {
            account,
            code,
            market,
            side,
            quantity,
            limit_price,
        } => {
            let details = OrderDetails {
                side,
                code,
                exchange: None,
                quantity,
                limit_price,
                style: Some(if limit_price.is_some() { "Limit" } else { "Market" }.to_string()),
                validity: None,
            };
            client
                .place_order(&account, &details, &OrderRoute::market(market))
                .await?
        }
        Action::Cancel { account, order_id } => client.cancel_order(&account, &order_id).await?,
        Action::Watch {
            code,
            market,
            seconds,
        } => {
            let confirmation = client
                .subscribe_trades(&code, &market, |update: &TopicUpdate| {
                    info!("{} {}", update.topic, update.data);
                })
                .await?;
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            confirmation
        }
    };
    Ok(response)
}
