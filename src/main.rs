use bridge_reconciler::{
    blockchain::HttpChainClient,
    config::Config,
    correlator::Correlator,
    db::{failure, progress},
    models::{ChainId, ConfirmationMode, Direction},
    state::AppState,
    AppError, BlockScanner,
};
use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bridge-reconciler", about = "Reconcile cross-chain transfers from per-chain event history")]
struct Cli {
    /// Event store location (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a closed height range of one chain into the event store
    Scan(ScanArgs),
    /// Emit confirmed transfers for a direction as JSON lines
    Correlate(CorrelateArgs),
    /// Show the committed height run (chain, first, last) of every chain
    Progress,
    /// List recorded event failures of a chain as JSON lines
    Failures {
        #[arg(long)]
        chain: String,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Chain id as other chains name it (overrides CHAIN_ID)
    #[arg(long)]
    chain: Option<String>,
    /// RPC endpoint, repeatable, in preference order (overrides RPC_ENDPOINTS)
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,
    #[arg(long)]
    start: Option<u64>,
    #[arg(long)]
    end: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    segments: bool,
    #[arg(long)]
    allow_unfinalized: bool,
}

#[derive(Args)]
struct CorrelateArgs {
    /// Ordered chain pair, e.g. `consensus->domain:0`
    #[arg(long)]
    direction: Direction,
    #[arg(long, value_enum, default_value = "both")]
    mode: ConfirmationMode,
    /// Only consider initiations at or above this source height
    #[arg(long)]
    from_height: Option<u64>,
    /// Only consider initiations at or below this source height
    #[arg(long)]
    to_height: Option<u64>,
    /// Write records here instead of stdout
    #[arg(long)]
    output: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Command::Scan(args) => scan(config, args).await,
        Command::Correlate(args) => {
            let state = AppState::init(config).await?;
            correlate(&state, args).await
        }
        Command::Progress => {
            let state = AppState::init(config).await?;
            for run in progress::list_progress(&state.db_pool).await? {
                println!("{}\t{}\t{}", run.chain, run.first_height, run.last_height);
            }
            Ok(())
        }
        Command::Failures { chain } => {
            let state = AppState::init(config).await?;
            for recorded in failure::list_failures(&state.db_pool, &ChainId::new(chain)).await? {
                println!("{}", serde_json::to_string(&recorded)?);
            }
            Ok(())
        }
    }
}

async fn scan(mut config: Config, args: ScanArgs) -> Result<(), AppError> {
    if args.chain.is_some() {
        config.chain_id = args.chain;
    }
    if !args.endpoints.is_empty() {
        config.rpc_endpoints = args.endpoints;
    }
    config.start_height = args.start.or(config.start_height);
    config.end_height = args.end.or(config.end_height);
    if let Some(workers) = args.workers {
        config.scan_workers = workers;
    }
    config.use_event_segments |= args.segments;
    config.allow_unfinalized |= args.allow_unfinalized;

    // Configuration faults surface before touching the store or the network.
    let scan_config = config.scan_config()?;
    let endpoints = config.endpoint_urls()?;
    let client = HttpChainClient::new(endpoints, config.rpc_timeout(), config.rpc_rate_limit)?;

    let state = AppState::init(config).await?;
    let scanner = BlockScanner::new(Arc::new(client), state.db_pool.clone(), scan_config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight heights");
            signal_token.cancel();
        }
    });

    let summary = scanner.run(shutdown).await?;
    info!(
        "Scan complete: {} heights processed, committed through {:?}",
        summary.heights_processed, summary.committed
    );
    Ok(())
}

async fn correlate(state: &AppState, args: CorrelateArgs) -> Result<(), AppError> {
    let window = match (args.from_height, args.to_height) {
        (None, None) => None,
        (low, high) => Some((low.unwrap_or(0), high.unwrap_or(i64::MAX as u64))),
    };
    let correlator = Correlator::new(state.db_pool.clone());

    let written = match args.output {
        Some(path) => {
            let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(&path).await?);
            let written = correlator
                .write_json_lines(&args.direction, args.mode, window, &mut file)
                .await?;
            file.shutdown().await?;
            written
        }
        None => {
            let mut stdout = tokio::io::stdout();
            correlator
                .write_json_lines(&args.direction, args.mode, window, &mut stdout)
                .await?
        }
    };

    info!("Wrote {} matched transfers for {}", written, args.direction);
    Ok(())
}
