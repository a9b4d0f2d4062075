//! chainsync CLI: tail a contract's events into a store, backfill address
//! history and query what has been stored.
//!
//! Usage:
//! ```bash
//! # Index Transfer events until Ctrl-C
//! chainsync index --rpc-url https://cloudflare-eth.com --contract 0x... --start-block 19000000
//!
//! # Walk an address's recent history
//! chainsync backfill --rpc-url https://cloudflare-eth.com --address 0x...
//!
//! # Daily volume from Postgres
//! DATABASE_URL=postgres://localhost/chainsync chainsync volume --contract 0x... --interval daily
//! ```

mod logging;
mod settings;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use chainsync_core::{
    BackfillConfig, ChainClient, CursorStore, EventQuery, Interval, RecordQueries, RelationalStore,
};
use chainsync_evm::{BackfillFetcher, EventIndexer, FetchRequest, IndexerBuilder, IndexerState};
use chainsync_rpc::HttpChainClient;
use chainsync_storage::{InMemoryStore, PostgresStore};

use crate::settings::{Args, Settings};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    match command {
        "version" | "--version" | "-V" => {
            println!("chainsync {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        "help" | "--help" | "-h" => {
            print_usage();
            return;
        }
        _ => {}
    }

    let rest = Args::new(&args[2..]);
    let settings = match Settings::from_env(&rest) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };
    logging::init_tracing(&settings.log);

    let result = match command {
        "index" => cmd_index(&settings).await,
        "status" => cmd_status(&settings).await,
        "backfill" => cmd_backfill(&settings, &rest).await,
        "balance" => cmd_balance(&settings, &rest).await,
        "events" => cmd_events(&settings, &rest).await,
        "volume" => cmd_volume(&settings, &rest).await,
        "transactions" => cmd_transactions(&settings, &rest).await,
        "balances" => cmd_balances(&settings, &rest).await,
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainsync {}", env!("CARGO_PKG_VERSION"));
    println!("Index contract events and address history into a relational store\n");
    println!("USAGE:");
    println!("    chainsync <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    index         Run the event indexer until Ctrl-C");
    println!("    status        Print the persisted indexer cursor and chain tip");
    println!("    backfill      Fetch recent transactions touching an address");
    println!("    balance       Read (and optionally store) an address balance");
    println!("    events        List stored events");
    println!("    volume        Aggregate stored event volume per time bucket");
    println!("    transactions  List stored transactions for a user");
    println!("    balances      List stored balances for a user");
    println!("    version       Print version");
    println!("    help          Print this help\n");
    println!("COMMON FLAGS (env fallback):");
    println!("    --rpc-url <URL>          ETHEREUM_RPC_URL");
    println!("    --database-url <URL>     DATABASE_URL (in-memory store when unset)");
    println!("    --contract <ADDR>        CONTRACT_ADDRESS");
    println!("    --event <DECL>           EVENT_SIGNATURE  [default: Transfer(...)]");
    println!("    --start-block <N>        START_BLOCK");
    println!("    --chunk-size <N>         CHUNK_SIZE  [default: 2000]");
    println!("    --poll-interval-ms <MS>  POLL_INTERVAL_MS  [default: 5000]");
    println!("    --log-level <LEVEL>      LOG_LEVEL  [default: info]");
    println!("    --log-json               LOG_JSON\n");
    println!("BACKFILL FLAGS:");
    println!("    --address <ADDR>  [required]");
    println!("    --from-block <N> --to-block <N> --target <N> --user-id <ID>");
    println!("    --throttle-ms <MS> --max-blocks <N> --receipts\n");
    println!("BALANCE FLAGS:");
    println!("    --address <ADDR>  [required]   --store   --user-id <ID>\n");
    println!("EVENTS FLAGS:");
    println!("    --event-name <NAME> --from-block <N> --to-block <N>");
    println!("    --sender <ADDR> --recipient <ADDR> --limit <N> --offset <N>\n");
    println!("VOLUME FLAGS:");
    println!("    --interval hourly|daily|monthly  [default: daily]");
    println!("    --from-ts <UNIX> --to-ts <UNIX>\n");
    println!("TRANSACTIONS / BALANCES FLAGS:");
    println!("    --user-id <ID>  [required]   --page <N> --limit <N>");
}

struct Stores {
    events: Arc<dyn RelationalStore>,
    cursors: Arc<dyn CursorStore>,
    queries: Arc<dyn RecordQueries>,
}

async fn open_stores(settings: &Settings) -> Result<Stores> {
    match settings.database_url.as_deref() {
        Some(url) => {
            let pg = Arc::new(PostgresStore::connect(url).await.context("opening Postgres store")?);
            Ok(Stores {
                events: pg.clone(),
                cursors: pg.clone(),
                queries: pg,
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set, rows are kept in memory for this process only");
            let mem = Arc::new(InMemoryStore::new());
            Ok(Stores {
                events: mem.clone(),
                cursors: mem.clone(),
                queries: mem,
            })
        }
    }
}

fn chain_client(settings: &Settings) -> Result<Arc<dyn ChainClient>> {
    let url = settings.rpc_url()?;
    let client = HttpChainClient::default_for(url).context("building RPC client")?;
    Ok(Arc::new(client))
}

fn build_indexer(settings: &Settings, stores: &Stores) -> Result<EventIndexer> {
    Ok(IndexerBuilder::from_config(settings.indexer.clone()).build(
        chain_client(settings)?,
        stores.events.clone(),
        stores.cursors.clone(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_index(settings: &Settings) -> Result<()> {
    let stores = open_stores(settings).await?;
    let indexer = build_indexer(settings, &stores)?;

    let report = indexer
        .start(settings.contract_address()?, settings.start_block, &settings.event_signature)
        .await
        .context("starting indexer")?;
    print_json(&report)?;

    // The worker halts on its own once retries are exhausted.
    let mut watch = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                tracing::info!("shutdown requested");
                indexer.stop().await?;
                break;
            }
            _ = watch.tick() => {
                if indexer.state() == IndexerState::Stopped {
                    let status = indexer.status().await;
                    print_json(&status)?;
                    bail!(
                        "indexer stopped: {}",
                        status.last_error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    print_json(&indexer.status().await)
}

async fn cmd_status(settings: &Settings) -> Result<()> {
    let stores = open_stores(settings).await?;
    let indexer = build_indexer(settings, &stores)?;
    print_json(&indexer.status().await)
}

async fn cmd_backfill(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let mut config = BackfillConfig::default();
    if let Some(ms) = args.number("--throttle-ms")? {
        config.throttle_ms = ms;
    }
    if let Some(max) = args.number("--max-blocks")? {
        config.max_blocks_per_call = Some(max);
    }
    config.fetch_receipts = args.has("--receipts");

    let mut req = FetchRequest::new(args.required("--address")?);
    if let Some(block) = args.number("--from-block")?.or(settings.start_block) {
        req = req.from_block(block);
    }
    if let Some(block) = args.number("--to-block")? {
        req = req.to_block(block);
    }
    if let Some(n) = args.number("--target")? {
        req = req.target_count(n);
    }
    if let Some(user) = args.flag("--user-id") {
        req = req.user_id(user);
    }

    let stores = open_stores(settings).await?;
    let fetcher = BackfillFetcher::new(chain_client(settings)?, stores.events.clone(), config);
    let report = fetcher.fetch_transactions(&req).await?;
    print_json(&report)
}

async fn cmd_balance(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let address = args.required("--address")?;
    let client = chain_client(settings)?;

    let report = if args.has("--store") {
        let stores = open_stores(settings).await?;
        let fetcher = BackfillFetcher::new(client, stores.events.clone(), BackfillConfig::default());
        fetcher
            .refresh_balance(&address, args.flag("--user-id").as_deref())
            .await?
    } else {
        let fetcher = BackfillFetcher::new(
            client,
            Arc::new(InMemoryStore::new()),
            BackfillConfig::default(),
        );
        fetcher.get_balance(&address).await?
    };
    print_json(&report)
}

async fn cmd_events(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let query = EventQuery {
        contract_address: args.flag("--contract").or_else(|| settings.contract_address.clone()),
        event_name: args.flag("--event-name"),
        from_block: args.number("--from-block")?,
        to_block: args.number("--to-block")?,
        sender_address: args.flag("--sender"),
        recipient_address: args.flag("--recipient"),
        limit: Some(args.number("--limit")?.unwrap_or(100)),
        offset: args.number("--offset")?,
    };
    let stores = open_stores(settings).await?;
    print_json(&stores.queries.find_events(&query).await?)
}

async fn cmd_volume(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let interval: Interval = args
        .flag("--interval")
        .as_deref()
        .unwrap_or("daily")
        .parse()?;
    let stores = open_stores(settings).await?;
    let buckets = stores
        .queries
        .aggregate_volume(
            settings.contract_address()?,
            interval,
            args.number("--from-ts")?,
            args.number("--to-ts")?,
        )
        .await?;
    print_json(&buckets)
}

async fn cmd_transactions(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let user = args.required("--user-id")?;
    let page = args.number("--page")?.unwrap_or(1);
    let limit = args.number("--limit")?.unwrap_or(20);
    let stores = open_stores(settings).await?;
    print_json(&stores.queries.user_transactions(&user, page, limit).await?)
}

async fn cmd_balances(settings: &Settings, args: &Args<'_>) -> Result<()> {
    let user = args.required("--user-id")?;
    let stores = open_stores(settings).await?;
    print_json(&stores.queries.user_balances(&user).await?)
}
