// Copyright (c) 2024 The Botho Foundation

//! Custody service CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use custody_core::{Coins, CustodyConfig, ParamName};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use custody_service::{Backends, Custody, CustodyEngine, Database};

#[derive(Parser)]
#[command(name = "custody")]
#[command(about = "Custodial hot-wallet service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "custody.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner, notifier and sweeper until interrupted
    Run,

    /// Create the database schema and exit
    Migrate,

    /// Allocate a new deposit address
    NewAddress,

    /// Print the master wallet address
    MasterAddress,

    /// Print the master wallet balance
    MasterBalance,

    /// Send funds from the master wallet
    Withdraw {
        /// Destination address
        #[arg(long)]
        to: String,

        /// Amount in coins, e.g. 1.5
        #[arg(long)]
        amount: Coins,
    },

    /// Check the format of an address
    ValidateAddress { address: String },

    /// Show scanner cursor and deposit counts
    Status,

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = match CustodyConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {}", cli.config, e);
        }
    };

    match cli.command {
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  Ledger RPC: {}", config.node.rpc_url);
            println!("  Explorer: {}", config.node.explorer_url);
            println!("  Testnet: {}", config.node.testnet);
            println!("  Database: {}", config.database.path);
            println!(
                "  Sweep threshold: {} {}",
                config.wallet.sweep_threshold, config.wallet.currency
            );
            Ok(())
        }
        Commands::ValidateAddress { address } => {
            let valid = custody_core::is_valid_address(&address);
            println!("{}", if valid { "valid" } else { "invalid" });
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Migrate => {
            open_database(&config)?;
            info!("Database migration complete");
            Ok(())
        }
        Commands::Status => show_status(&config),
        command => {
            let db = open_database(&config)?;
            let custody = Custody::assemble(&config, db, Backends::http(&config)?)?;
            run_command(command, config, custody).await
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn open_database(config: &CustodyConfig) -> Result<Database> {
    info!("Opening database at {}", config.database.path);
    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    db.migrate()?;
    Ok(db)
}

async fn run_command(command: Commands, config: CustodyConfig, custody: Custody) -> Result<()> {
    match command {
        Commands::Run => CustodyEngine::new(config, custody).run().await?,
        Commands::NewAddress => {
            println!("{}", custody.wallet.allocate_new_address().await?);
        }
        Commands::MasterAddress => {
            println!("{}", custody.wallet.master_address().user_friendly);
        }
        Commands::MasterBalance => {
            let balance = custody.wallet.master_balance().await?;
            println!("{} {}", balance, custody.wallet.currency());
        }
        Commands::Withdraw { to, amount } => match custody.wallet.withdraw(&to, amount).await {
            Ok(receipt) => {
                println!("Hash: {}", receipt.hash);
                println!("Fee:  {} {}", receipt.fee, custody.wallet.currency());
            }
            Err(e) if e.is_rejection() => {
                eprintln!("Withdrawal rejected: {}", e);
                std::process::exit(2);
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Migrate
        | Commands::Status
        | Commands::ValidateAddress { .. }
        | Commands::ValidateConfig => {}
    }
    Ok(())
}

fn show_status(config: &CustodyConfig) -> Result<()> {
    let db = open_database(config)?;

    println!("Custody Status");
    println!("==============");
    match db.get_param(ParamName::LastMcBlockNumber)? {
        Some(seqno) => println!("Last masterchain block: {}", seqno),
        None => println!("Last masterchain block: (not started)"),
    }
    println!(
        "Last derivation index:  {}",
        db.get_u32_param(ParamName::LastIndex)?.unwrap_or(0)
    );
    println!("Deposit addresses:      {}", db.count_addresses()?);
    println!();
    println!("Deposits:");
    for (status, count) in db.deposit_counts()? {
        println!("  {:<14} {}", status.as_str(), count);
    }
    Ok(())
}
