// Martingale Grid Bot - CLI
// Single entry point for planning, paper trading and history

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use martingale_grid_bot::{
    Config, Database, EventSink, ExchangeGateway, GridBotError, GridPlanner, GridStatistics, LogSink,
    OrderRepository, PaperExchange, RestTickerClient, Scheduler, SqliteOrderRepository,
};

#[derive(Parser)]
#[command(name = "grid-bot")]
#[command(version)]
#[command(about = "Martingale grid trading bot", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the ladder a cycle would place at a given price
    Plan {
        #[arg(short, long)]
        symbol: String,

        /// Reference price
        #[arg(short, long)]
        price: f64,

        /// Override the configured deposit
        #[arg(short, long)]
        deposit: Option<f64>,
    },

    /// Paper trade until Ctrl-C
    Run {
        /// Comma separated symbols (defaults to the configured list)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },

    /// Show open orders recorded for a symbol
    Orders {
        #[arg(short, long)]
        symbol: String,
    },

    /// Show cycle history for a symbol
    History {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, None);
        return init_config(&cli.config, force);
    }

    let config = load_config_or_exit(&cli.config);
    init_logging(cli.verbose, Some(&config));

    info!("🚀 Martingale Grid Bot v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Config: {}", cli.config);

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Plan { symbol, price, deposit } => show_plan(&config, &symbol, price, deposit)?,
        Commands::Run { symbols } => run_paper(config, symbols).await?,
        Commands::Orders { symbol } => show_orders(&config, &symbol)?,
        Commands::History { symbol, limit } => show_history(&config, &symbol, limit)?,
    }

    Ok(())
}

fn init_logging(verbose: bool, config: Option<&Config>) {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Load config or exit with helpful error message
fn load_config_or_exit(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration Error");
            eprintln!("{}", e.user_message());
            if matches!(e, GridBotError::ConfigFile(_)) {
                eprintln!();
                eprintln!("💡 Quick fix:");
                eprintln!("   1. Run: grid-bot init");
                eprintln!("   2. Edit {} with your symbols and deposit", path);
                eprintln!("   3. Try again");
            }
            std::process::exit(1);
        }
    }
}

fn init_config(path: &str, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if std::path::Path::new(path).exists() && !force {
        warn!("⚠️  {} already exists, skipping (use --force to overwrite)", path);
        return Ok(());
    }

    Config::default().to_file(path)?;
    info!("📝 Created {}", path);
    info!("💡 Next steps:");
    info!("   1. Edit {} (symbols, deposit, leverage)", path);
    info!("   2. Run: grid-bot plan --symbol XRPUSDT --price 0.5");
    info!("   3. Run: grid-bot run");
    Ok(())
}

fn show_plan(config: &Config, symbol: &str, price: f64, deposit: Option<f64>) -> Result<(), Box<dyn std::error::Error>> {
    let mut grid = config.grid_config();
    if let Some(deposit) = deposit {
        grid.deposit_amount = deposit;
    }
    grid.validate()?;

    let plan = GridPlanner::plan(price, &grid)?;
    println!("📐 {} ladder at {:.5}", symbol, plan.reference_price);
    println!(
        "   capital {:.2}, total multiplier {:.4}, base quantity {:.5}",
        plan.available_capital, plan.total_multiplier, plan.base_quantity
    );
    println!("{:>5}  {:>7}  {:>12}  {:>14}", "level", "kind", "price", "quantity");
    for level in &plan.levels {
        println!(
            "{:>5}  {:>7}  {:>12.5}  {:>14.5}",
            level.index,
            level.kind.as_str(),
            grid.precision.floor_price(level.target_price),
            grid.precision.floor_quantity(level.quantity)
        );
    }

    if let Some(stats) = GridStatistics::from_levels(&plan.levels, grid.leverage) {
        println!();
        println!("   total quantity   {:.5}", stats.total_quantity);
        println!("   total notional   {:.2}", stats.total_notional);
        println!("   margin required  {:.2}", stats.margin_required);
        println!("   average price    {:.5}", stats.average_price);
        println!(
            "   range            {:.5} → {:.5} ({:.2}%)",
            stats.max_price, stats.min_price, stats.spread_percent
        );
    }
    Ok(())
}

fn open_repository(config: &Config) -> Result<Arc<dyn OrderRepository>, GridBotError> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(&config.database.path)?;
    db.run_migrations()?;
    Ok(Arc::new(SqliteOrderRepository::new(&db)))
}

async fn run_paper(config: Config, symbols: Option<Vec<String>>) -> Result<(), Box<dyn std::error::Error>> {
    let symbols = symbols.unwrap_or_else(|| config.symbols.clone());
    let grid = config.grid_config();
    grid.validate()?;

    let repo = open_repository(&config)?;
    let ticker = RestTickerClient::new(&config.exchange.ticker_url)?;
    let venue = Arc::new(PaperExchange::new().with_price_feed(ticker));
    let gateway = Arc::new(ExchangeGateway::new(
        venue,
        config.exchange.rate_limiter(),
        config.exchange.retry_policy(),
    ));
    let events: Arc<dyn EventSink> = Arc::new(LogSink::new(config.logging.json_events));
    let scheduler = Scheduler::new(Arc::clone(&gateway), repo, events);

    info!("📄 Paper trading {} symbols via {}", symbols.len(), gateway.venue_name());
    for symbol in &symbols {
        if let Err(e) = scheduler.submit_cycle(symbol, grid.clone()).await {
            error!("❌ {} not started: {}", symbol, e.user_message());
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("🛑 Ctrl-C received, stopping all symbols");
    scheduler.shutdown().await;

    let stats = gateway.stats();
    info!(
        "📊 Gateway: {} requests, {} ok, {} retries, {} failed, {} rate limited",
        stats.requests, stats.successes, stats.retries, stats.failures, stats.rate_limited
    );
    Ok(())
}

fn show_orders(config: &Config, symbol: &str) -> Result<(), Box<dyn std::error::Error>> {
    let repo = open_repository(config)?;
    let orders = repo.list_open_orders(symbol)?;
    if orders.is_empty() {
        println!("No open orders for {}", symbol);
    }
    for order in &orders {
        println!(
            "{:<40} L{:<3} {:>7} {:>12.5} {:>12.5}/{:<12.5} {}",
            order.order_id,
            order.grid_level.map(|l| l.to_string()).unwrap_or_default(),
            order.kind.as_str(),
            order.price,
            order.filled_quantity,
            order.requested_quantity,
            order.status
        );
    }

    if let Some(tp) = repo.live_take_profit(symbol)? {
        println!("🎯 take-profit {} {:.5} @ {:.5} ({})", tp.order_id, tp.quantity, tp.price, tp.status);
    }
    Ok(())
}

fn show_history(config: &Config, symbol: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let repo = open_repository(config)?;
    let cycles = repo.list_cycles(symbol, limit)?;
    if cycles.is_empty() {
        println!("No cycles recorded for {}", symbol);
        return Ok(());
    }

    for cycle in &cycles {
        println!(
            "{}  {:<9}  ref {:.5}  avg {}  qty {:.5}  pnl {}",
            cycle.started_at.format("%Y-%m-%d %H:%M:%S"),
            cycle.status.as_str(),
            cycle.reference_price,
            cycle
                .average_fill_price
                .map(|p| format!("{:.5}", p))
                .unwrap_or_else(|| "-".to_string()),
            cycle.filled_quantity,
            cycle
                .realized_pnl
                .map(|p| format!("{:.4}", p))
                .unwrap_or_else(|| "-".to_string()),
        );
        if let Some(message) = &cycle.error_message {
            println!("    ❌ {}", message);
        }
    }
    println!("💰 total realized pnl {:.4}", repo.total_realized_pnl(symbol)?);
    Ok(())
}
