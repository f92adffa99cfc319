//! Swap Orchestrator - cross-chain swap engine and operator CLI
//!
//! `serve` keeps the health and metrics endpoints up; the other subcommands run
//! one quote, swap or status check against the configured backends.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use swap_orchestrator::api;
use swap_orchestrator::metrics::MetricsServer;
use swap_orchestrator::{
    Asset, KeyMaterial, OrderLifecycleManager, OrderReference, ProviderKind, Settings, SwapIntent,
};

#[derive(Parser, Debug)]
#[command(name = "swap-orchestrator", version, about = "Cross-chain swap orchestration")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "SWAP_CONFIG", default_value = "config/default.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the health, swaps and metrics endpoints
    Serve,
    /// Print the signing address for every configured chain
    Addresses,
    /// Quote an intent on one provider
    Quote {
        #[command(flatten)]
        intent: IntentArgs,
        /// Estimate only; no deposit address or route is reserved
        #[arg(long)]
        dry: bool,
    },
    /// Run one intent to a terminal state and print the report
    Swap {
        #[command(flatten)]
        intent: IntentArgs,
        /// Fusion+ preset: fast, medium, slow or custom
        #[arg(long)]
        preset: Option<String>,
    },
    /// Status of an existing order
    Status {
        #[arg(long)]
        provider: ProviderKind,
        /// Deposit address, order hash or request id
        #[arg(long)]
        order_id: String,
        #[arg(long)]
        tx: Option<String>,
        #[arg(long)]
        from_chain: Option<String>,
        #[arg(long)]
        to_chain: Option<String>,
        #[arg(long)]
        quote_id: Option<String>,
        /// Wait for a terminal status
        #[arg(long)]
        poll: bool,
    },
}

#[derive(Args, Debug)]
struct IntentArgs {
    #[arg(long)]
    provider: ProviderKind,
    #[arg(long)]
    from_chain: String,
    /// Backend asset id of the origin asset
    #[arg(long)]
    from_asset: String,
    /// Token contract on the origin chain; omit for the native asset
    #[arg(long)]
    from_token: Option<String>,
    #[arg(long)]
    to_chain: String,
    #[arg(long)]
    to_asset: String,
    #[arg(long)]
    to_token: Option<String>,
    /// Smallest units of the origin asset
    #[arg(long)]
    amount: String,
    #[arg(long)]
    recipient: String,
    /// Defaults to the configured signer for the origin chain
    #[arg(long)]
    sender: Option<String>,
}

fn asset(id: &str, token: Option<&str>) -> Asset {
    match token {
        Some(contract) => Asset::token(id, contract),
        None => Asset::native(id),
    }
}

impl IntentArgs {
    fn into_intent(self, manager: &OrderLifecycleManager) -> Result<(ProviderKind, SwapIntent)> {
        let sender = match self.sender {
            Some(sender) => sender,
            None => manager
                .signer()
                .address_for(&self.from_chain)?
                .with_context(|| format!("no signer for {}; pass --sender", self.from_chain))?,
        };

        let intent = SwapIntent::new(
            self.from_chain,
            asset(&self.from_asset, self.from_token.as_deref()),
            self.to_chain,
            asset(&self.to_asset, self.to_token.as_deref()),
            self.amount,
            sender,
            self.recipient,
        )?;
        Ok((self.provider, intent))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let settings = Settings::load_from(&cli.config)?;
    let keys = KeyMaterial::from_env(&settings.wallet);
    let manager = Arc::new(OrderLifecycleManager::from_settings(&settings, &keys)?);

    match cli.command {
        Command::Serve => serve(settings, manager).await,
        Command::Addresses => {
            print_json(&serde_json::json!({
                "ledger": manager.signer().ledger_address(),
                "evm": manager.signer().evm_address(),
            }))
        }
        Command::Quote { intent, dry } => {
            let (provider, intent) = intent.into_intent(&manager)?;
            let quote = manager.quote(&intent, provider, dry).await?;
            print_json(&quote)
        }
        Command::Swap { intent, preset } => {
            let (provider, intent) = intent.into_intent(&manager)?;
            let intent_id = intent.id;
            match manager.execute(intent, provider, preset).await {
                Ok(report) => print_json(&report),
                Err(e) => {
                    error!("Swap failed [{}]: {}", e.kind(), e);
                    if let Some(report) = manager.registry().report(&intent_id) {
                        print_json(&report)?;
                    }
                    Err(e.into())
                }
            }
        }
        Command::Status {
            provider,
            order_id,
            tx,
            from_chain,
            to_chain,
            quote_id,
            poll,
        } => {
            let reference = OrderReference {
                provider,
                order_id,
                transaction_id: tx,
                origin_chain: from_chain,
                destination_chain: to_chain,
                quote_id,
            };
            let status = manager.status(&reference, poll).await?;
            print_json(&status)
        }
    }
}

async fn serve(settings: Settings, manager: Arc<OrderLifecycleManager>) -> Result<()> {
    info!("Starting Swap Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Instance {} with providers {:?}",
        settings.engine.instance_id,
        manager.providers()
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {:#}", e);
            }
        }))
    } else {
        None
    };

    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    let result = api::run_server(settings.api.clone(), manager.clone(), shutdown_signal()).await;

    let in_flight = manager.registry().in_flight();
    if !in_flight.is_empty() {
        warn!("Stopping with {} swaps in flight", in_flight.len());
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Orchestrator stopped");
    result
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,swap_orchestrator=debug,hyper=warn,reqwest=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping...");
}
