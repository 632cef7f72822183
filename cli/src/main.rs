//! holonindex CLI: run holon indexers and inspect what they stored.
//!
//! # Commands
//! ```text
//! holonindex run    --config <file.json>
//! holonindex status --database <db> --chain <slug> --id <indexer-id>
//! holonindex query  --database <db> <kind> [--from N] [--to M] [--holon ADDR]
//! holonindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use holonindex_core::{
    CheckpointStore, ChainClient, EntityKind, EntityStore, IndexQuery, IndexerConfig,
};
use holonindex_evm::{AbiEventDecoder, IndexerBuilder};
use holonindex_storage::SqliteStorage;

mod config;
mod logging;

use config::{ChainEntry, CliConfig};

#[derive(Parser)]
#[command(
    name = "holonindex",
    about = "Index holon factory and holon contract events into queryable entities",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline per configured chain until Ctrl+C
    Run {
        /// Path to the JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the checkpoint, confirmed watermark and entity counts
    Status {
        /// SQLite database file
        #[arg(long, default_value = "./holons.db")]
        database: String,
        #[arg(long, default_value = "ethereum")]
        chain: String,
        #[arg(long, default_value = "holons")]
        id: String,
    },

    /// Print confirmed entities of one kind as JSON
    Query {
        /// SQLite database file
        #[arg(long, default_value = "./holons.db")]
        database: String,
        /// FlavorCreation | HolonCreation | HolonContract | RewardDistribution | MemberReward
        kind: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long)]
        to: Option<u64>,
        /// Only entities belonging to this holon
        #[arg(long)]
        holon: Option<String>,
    },

    /// Show defaults and the decoded event signatures
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::Status { database, chain, id } => cmd_status(&database, &chain, &id).await,
        Commands::Query {
            database,
            kind,
            from,
            to,
            holon,
        } => cmd_query(&database, &kind, from, to, holon.as_deref()).await,
        Commands::Info => cmd_info(),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(path: &std::path::Path) -> Result<()> {
    let config = CliConfig::load(path)?;
    logging::init_tracing(&config.log)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(config.chains.len());
    for entry in &config.chains {
        let mut pipeline = build_pipeline(entry).await?;
        let rx = shutdown_rx.clone();
        let chain = entry.indexer.chain.clone();
        tasks.push(tokio::spawn(async move {
            let result = pipeline.run(rx).await;
            (chain, result)
        }));
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping after the current block");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut failed = Vec::new();
    for task in tasks {
        let (chain, result) = task.await.context("pipeline task panicked")?;
        if let Err(e) = result {
            tracing::error!(chain = %chain, error = %e, "pipeline failed");
            failed.push(chain);
        }
    }
    if !failed.is_empty() {
        return Err(anyhow!("pipelines failed: {}", failed.join(", ")));
    }
    Ok(())
}

async fn build_pipeline(entry: &ChainEntry) -> Result<holonindex_core::Pipeline> {
    let store = Arc::new(
        SqliteStorage::open(&entry.database)
            .await
            .with_context(|| format!("open database '{}'", entry.database))?,
    );

    let mut builder = IndexerBuilder::from_config(entry.indexer.clone());
    if let Some(size) = entry.batch_size {
        builder = builder.batch_size(size);
    }
    let client: Arc<dyn ChainClient> = Arc::new(
        builder
            .connect(&entry.rpc_url)
            .with_context(|| format!("connect to '{}'", entry.rpc_url))?,
    );

    tracing::info!(
        chain = %entry.indexer.chain,
        id = %entry.indexer.id,
        database = %entry.database,
        factories = entry.indexer.factory_addresses.len(),
        "pipeline configured"
    );
    Ok(builder.build(client, store))
}

async fn cmd_status(database: &str, chain: &str, id: &str) -> Result<()> {
    let store = SqliteStorage::open(database)
        .await
        .with_context(|| format!("open database '{database}'"))?;

    match store.load(chain, id).await? {
        Some(cp) => {
            println!("Checkpoint:  block {} ({:#x})", cp.block_number, cp.block_hash);
            println!("Updated at:  {}", cp.updated_at);
        }
        None => println!("Checkpoint:  none"),
    }
    match store.confirmed_block().await? {
        Some(block) => println!("Confirmed:   block {block}"),
        None => println!("Confirmed:   nothing yet"),
    }
    println!("Sources:     {}", store.watched_sources().await?.len());
    println!("Entities:");
    for kind in EntityKind::ALL {
        println!("  {:20} {}", kind.as_str(), store.count(kind).await?);
    }
    Ok(())
}

async fn cmd_query(
    database: &str,
    kind: &str,
    from: u64,
    to: Option<u64>,
    holon: Option<&str>,
) -> Result<()> {
    let kind = EntityKind::from_str_name(kind).ok_or_else(|| anyhow!("unknown entity kind '{kind}'"))?;
    let store = SqliteStorage::open(database)
        .await
        .with_context(|| format!("open database '{database}'"))?;
    let query = IndexQuery::new(Arc::new(store));
    let to = to.unwrap_or(u64::MAX);

    let entities = match holon {
        Some(addr) => {
            let holon: Address = addr.parse().with_context(|| format!("invalid holon address '{addr}'"))?;
            query.by_holon(kind, holon, from, to).await?
        }
        None => query.range(kind, from, to).await?,
    };
    println!("{}", serde_json::to_string_pretty(&entities)?);
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("holonindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Event signatures:");
    for schema in AbiEventDecoder::new().schemas() {
        println!("  {:14} {:55} {:#x}", schema.template.as_str(), schema.signature, schema.topic0);
    }
    println!();
    println!("Default indexer config:");
    println!("{}", serde_json::to_string_pretty(&IndexerConfig::default())?);
    Ok(())
}
