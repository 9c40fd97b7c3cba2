//! Slashpay CLI
//!
//! Receive payments through an LND node, or pay a Slashpay identifier.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "slashpay")]
#[command(about = "Slashpay - negotiate Bitcoin payments over encrypted peer connections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for identity and receipts (can also be set via SLASHPAY_DATA_DIR)
    #[arg(long, global = true, env = "SLASHPAY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared discovery directory (can also be set via SLASHPAY_DIRECTORY)
    #[arg(long, global = true, env = "SLASHPAY_DIRECTORY")]
    directory: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the payee server
    Receive {
        /// Port to listen on
        #[arg(short, long, default_value = "8888")]
        port: u16,

        /// Supported methods, most preferred first
        #[arg(long, value_delimiter = ',', default_value = "bolt11,p2wpkh,p2sh")]
        methods: Vec<String>,

        /// LND REST URL
        #[arg(long, env = "SLASHPAY_LND_URL", default_value = "https://127.0.0.1:8080")]
        lnd_url: String,

        /// Admin macaroon in hex, instead of reading it from disk
        #[arg(long, env = "SLASHPAY_LND_MACAROON", hide_env_values = true)]
        macaroon: Option<String>,

        /// Path to the admin macaroon (defaults to LND's data directory)
        #[arg(long, env = "SLASHPAY_LND_MACAROON_PATH")]
        macaroon_path: Option<PathBuf>,

        /// Path to LND's tls.cert (defaults to LND's data directory)
        #[arg(long, env = "SLASHPAY_LND_TLS_CERT_PATH")]
        tls_cert_path: Option<PathBuf>,

        /// Bitcoin network of the node
        #[arg(long, env = "SLASHPAY_NETWORK", default_value = "mainnet")]
        network: String,

        /// Give up on a payment after this many seconds
        #[arg(long)]
        settlement_timeout: Option<u64>,
    },

    /// Pay a Slashpay identifier
    Pay {
        /// Identifier to pay (slashpay:...)
        identifier: String,

        /// Amount in satoshis
        #[arg(short, long)]
        amount: u64,

        /// Description for the payee
        #[arg(short, long, default_value = "Having fun with slashpay")]
        description: String,

        /// Preferred payment method
        #[arg(short, long, default_value = "bolt11")]
        method: String,

        /// Alternative payment method
        #[arg(long, default_value = "p2wpkh")]
        fallback: String,

        /// Answer from cached discovery data when available
        #[arg(long)]
        use_cache: bool,

        /// Give up resolving or waiting for the payee after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show stored receipts
    Receipts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "slashpay=debug,slashpay_lib=debug,slashpay_interactive=debug"
    } else {
        "slashpay=info,slashpay_lib=warn,slashpay_interactive=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let base_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slashpay");
    let data_dir = cli.data_dir.unwrap_or_else(|| base_dir.clone());
    let directory = cli.directory.unwrap_or_else(|| base_dir.join("directory"));

    match cli.command {
        Commands::Receive {
            port,
            methods,
            lnd_url,
            macaroon,
            macaroon_path,
            tls_cert_path,
            network,
            settlement_timeout,
        } => {
            let options = commands::receive::ReceiveOptions {
                port,
                methods,
                lnd_url,
                macaroon,
                macaroon_path,
                tls_cert_path,
                network,
                settlement_timeout,
            };
            commands::receive::run(&data_dir, &directory, options, cli.verbose).await?;
        }
        Commands::Pay {
            identifier,
            amount,
            description,
            method,
            fallback,
            use_cache,
            timeout,
        } => {
            let options = commands::pay::PayOptions {
                identifier,
                amount,
                description,
                methods: vec![method, fallback],
                use_cache,
                timeout,
            };
            commands::pay::run(&data_dir, &directory, options, cli.verbose).await?;
        }
        Commands::Receipts => {
            commands::receipts::run(&data_dir).await?;
        }
    }

    Ok(())
}
