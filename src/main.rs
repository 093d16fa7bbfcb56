use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use erc20_balance_indexer::backfill::Backfill;
use erc20_balance_indexer::chain::ChainClient;
use erc20_balance_indexer::config::Config;
use erc20_balance_indexer::domain::{normalize_hex, INIT_BLOCK};
use erc20_balance_indexer::store::Store;
use erc20_balance_indexer::tailer::Tailer;

#[derive(Parser)]
#[command(name = "erc20-balance-indexer", about = "ERC20 transfer backfill and balance tailer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Backfills (optionally) then tails live transfers for a token.
    RunIndexing {
        contract_address: String,
        #[arg(long, default_value_t = true)]
        backfill: bool,
    },
    /// Prints the top holders of a token, balance descending.
    TopHolders {
        token_address: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::info!(chain_id = config.chain_id, "Configuration loaded");

    let store = Store::connect(&config.database.url(), config.database.max_connections).await?;
    store.run_migrations().await?;
    tracing::info!("Database migrations complete");

    let chain = ChainClient::connect(&config).await?;

    match cli.command {
        Command::RunIndexing {
            contract_address,
            backfill,
        } => run_indexing(&chain, &store, &config, &contract_address, backfill).await,
        Command::TopHolders {
            token_address,
            limit,
        } => top_holders(&store, &config, &token_address, limit).await,
    }
}

async fn run_indexing(
    chain: &ChainClient,
    store: &Store,
    config: &Config,
    contract_address: &str,
    backfill: bool,
) -> eyre::Result<()> {
    // `to_checksum` is used only for the human-readable log line; every
    // call into the chain filter or the store uses the lowercase form,
    // matching the decoder's own normalization of persisted addresses.
    tracing::info!(token = %chain.to_checksum(contract_address)?, "Starting indexing run");
    let token_address = normalize_hex(contract_address);

    if backfill {
        let head = chain.get_latest_block().await?;
        tracing::info!(from = INIT_BLOCK, to = head, "Running backfill");
        Backfill::new(chain, store, config.chain_id as i64)
            .run(&token_address, INIT_BLOCK, head)
            .await?;
        tracing::info!("Backfill complete");
    }

    let shutdown = CancellationToken::new();
    let mut tailer = Tailer::new(chain, store, token_address);

    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        })
    };

    tracing::info!("Tailing live transfers. Press Ctrl+C to stop.");
    let result = tailer.run(shutdown).await;
    ctrl_c.abort();

    result.map_err(|e| eyre::eyre!(e))
}

async fn top_holders(
    store: &Store,
    config: &Config,
    token_address: &str,
    limit: i64,
) -> eyre::Result<()> {
    let token_address = normalize_hex(token_address);
    let holders = store
        .top_holders(config.chain_id as i64, &token_address, limit)
        .await?;

    for (rank, holder) in holders.iter().enumerate() {
        println!(
            "#{}. wallet_address: {}. balance: {}",
            rank + 1,
            holder.wallet_address,
            holder.balance
        );
    }

    Ok(())
}
