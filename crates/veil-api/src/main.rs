//! Veil Pool Indexer
//!
//! Usage:
//!   veil-api [--rpc <RPC_URL>] [--chain-id <CHAIN_ID>] [--port <PORT>] [--db <PATH>]
//!
//! Example:
//!   veil-api --rpc https://mainnet.base.org --port 42069

use std::env;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veil_api::{LogSyncer, Server};
use veil_indexer::{Database, IndexerConfig, Ingestor, Reconciler, RpcMetadataSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,veil_indexer=debug,veil_api=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    let mut config = IndexerConfig::from_env();
    let mut port: u16 = 42069;
    let mut db_path = String::from("veil.db");
    let mut sync = true;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rpc" | "-r" => {
                i += 1;
                if let Some(url) = args.get(i) {
                    config.rpc_url = url.clone();
                }
            }
            "--chain-id" | "-c" => {
                i += 1;
                config.chain_id = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(config.chain_id);
            }
            "--port" | "-p" => {
                i += 1;
                port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(port);
            }
            "--db" | "-d" => {
                i += 1;
                db_path = args.get(i).cloned().unwrap_or(db_path);
            }
            "--start-block" | "-s" => {
                i += 1;
                config.start_block = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(config.start_block);
            }
            "--no-sync" => {
                sync = false;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
            }
        }
        i += 1;
    }

    tracing::info!("Starting Veil Pool Indexer");
    tracing::info!("  RPC: {}", config.rpc_url);
    tracing::info!("  Chain ID: {}", config.chain_id);
    tracing::info!("  Pools: {}", config.pools.len());
    tracing::info!("  Database: {}", db_path);
    tracing::info!("  Port: {}", port);

    let database_url = format!("sqlite://{}?mode=rwc", db_path);
    let db = Arc::new(Database::new(&database_url).await?);

    if sync {
        let metadata = Arc::new(RpcMetadataSource::new(config.rpc_url.clone()));
        let reconciler = Reconciler::new(db.clone(), Arc::new(config.pools.clone()), metadata)
            .with_nullifier_linking(config.link_nullifiers);
        let ingestor = Arc::new(Ingestor::new(Arc::new(reconciler)));
        tokio::spawn(LogSyncer::new(&config, ingestor).run());
    } else {
        tracing::info!("Log sync disabled; serving existing data only");
    }

    let addr = format!("0.0.0.0:{}", port);
    Server::new(db, config.chain_id).run(&addr).await?;

    Ok(())
}

fn print_help() {
    println!(
        r#"Veil Pool Indexer

Indexes Veil privacy pool deposits and withdrawals on Base into SQLite and
serves them over a cursor-paginated HTTP API.

USAGE:
    veil-api [OPTIONS]

OPTIONS:
    -r, --rpc <URL>           JSON-RPC endpoint
                              Default: $VEIL_RPC_URL or https://mainnet.base.org
    -c, --chain-id <ID>       Chain ID (8453 = Base)
                              Default: 8453
    -p, --port <PORT>         Port to listen on
                              Default: 42069
    -d, --db <PATH>           SQLite database path
                              Default: veil.db
    -s, --start-block <N>     First block to scan when no checkpoint exists
                              Default: 24532655
        --no-sync             Serve the API without syncing logs
    -h, --help                Print help

ENVIRONMENT VARIABLES:
    VEIL_RPC_URL, VEIL_CHAIN_ID, VEIL_START_BLOCK
    VEIL_CONFIRMATIONS        Blocks to stay behind head (default: 10)
    VEIL_BATCH_SIZE           Blocks per eth_getLogs request (default: 2000)
    VEIL_POLL_INTERVAL_SECS   Delay between sync rounds (default: 12)
    VEIL_POOLS                Pools as address=ether pairs, comma separated
                              (default: the five Base mainnet pools)
    VEIL_LINK_NULLIFIERS      Mark deposits spent by matching nullifier hash
                              (default: true)
    RUST_LOG
        Logging level (default: info,veil_indexer=debug,veil_api=debug)

ENDPOINTS:
    GET /pools                  All pools with deposits and withdrawals
    GET /pool/:id               One pool
    GET /pool/:id/roots         Merkle root snapshots for a pool
    GET /deposits               ?poolId=&cursor=&limit=&direction=next|prev
    GET /withdrawals            ?poolId=&cursor=&limit=&direction=next|prev
    GET /commitments/:hash      Commitment lookup
    GET /nullifier/:hash        Nullifier lookup
    GET /stats                  Aggregate counts
    GET /health                 Liveness and sync checkpoint
"#
    );
}
