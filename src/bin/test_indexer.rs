//! `test-indexer`: diagnostic CLI that runs only the watcher against an
//! in-memory cursor and prints every decoded event, without driving the
//! state machine or action queue (§6 CLI surface).

use clap::Parser;
use shieldnet_validator::action_queue::rpc::AnyTransportClient;
use shieldnet_validator::logging::root_logger;
use shieldnet_validator::settings::Settings;
use shieldnet_validator::watcher::{Watcher, WatcherItem};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "test-indexer", about = "Print decoded Coordinator/Consensus events without driving the state machine")]
struct Args {
    #[arg(long, default_value = "config")]
    config: String,

    #[arg(long)]
    from_block: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;
    let logger = root_logger(settings.logging.json);

    let coordinator = parse_address(&settings.coordinator_address)?;
    let consensus = parse_address(&settings.consensus_address)?;
    let rpc = Arc::new(AnyTransportClient::connect(&settings.rpc_url).await?);

    let mut watcher = Watcher::new(
        rpc.clone(),
        coordinator,
        consensus,
        settings.chain_id,
        shieldnet_validator::constants::DEFAULT_MAX_REORG_DEPTH,
        &logger,
    );

    let mut cursor = match args.from_block {
        Some(b) => b,
        None => {
            use shieldnet_validator::action_queue::rpc::EthRpcApi;
            rpc.block_number().await?.as_u64()
        }
    };

    slog::info!(logger, "test-indexer starting"; "from_block" => cursor);

    loop {
        match watcher.poll(cursor).await {
            Ok(items) => {
                for item in items {
                    match item {
                        WatcherItem::Event { block_number, log_index, event } => {
                            println!("[{block_number}:{log_index}] {event:?}");
                        }
                        WatcherItem::BlockTick { block_number } => {
                            cursor = block_number;
                        }
                        WatcherItem::Uncled { block_number } => {
                            println!("-- reorg detected, rewinding to block {block_number} --");
                            cursor = block_number;
                        }
                    }
                }
            }
            Err(err) => {
                slog::warn!(logger, "poll cycle failed"; "error" => format!("{err:#}"));
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

fn parse_address(s: &str) -> anyhow::Result<web3::types::Address> {
    use std::str::FromStr;
    web3::types::Address::from_str(s.trim_start_matches("0x")).map_err(|e| anyhow::anyhow!("{e}"))
}
