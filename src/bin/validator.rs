//! `validator`: runs the long-lived watcher/state-machine/action-queue
//! service shell until SIGINT/SIGTERM (§6 CLI surface).

use clap::Parser;
use shieldnet_validator::action_queue::rpc::AnyTransportClient;
use shieldnet_validator::logging::root_logger;
use shieldnet_validator::service::{Shell, ShellConfig};
use shieldnet_validator::settings::Settings;
use shieldnet_validator::storage::RocksStorage;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "validator", about = "Shieldnet FROST validator node")]
struct Args {
    #[arg(long, default_value = "config")]
    config: String,
}

fn eth_address_from_secret_key(key: &secp256k1::SecretKey) -> [u8; 20] {
    use sha3::{Digest, Keccak256};
    let secp = secp256k1::Secp256k1::signing_only();
    let public = secp256k1::PublicKey::from_secret_key(&secp, key);
    let uncompressed = public.serialize_uncompressed();
    let hash = Keccak256::digest(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

fn parse_address(s: &str) -> anyhow::Result<web3::types::Address> {
    web3::types::Address::from_str(s.trim_start_matches("0x")).map_err(|e| anyhow::anyhow!("{e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;
    let logger = root_logger(settings.logging.json);

    let exit_code = match run(settings, &logger).await {
        Ok(()) => 0,
        Err(err) => {
            slog::error!(logger, "fatal error"; "error" => format!("{err:#}"));
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(settings: Settings, logger: &slog::Logger) -> anyhow::Result<()> {
    let private_key_bytes = hex::decode(settings.private_key.trim_start_matches("0x"))?;
    let private_key = secp256k1::SecretKey::from_slice(&private_key_bytes)?;
    let from = eth_address_from_secret_key(&private_key);

    let coordinator = parse_address(&settings.coordinator_address)?;
    let consensus = parse_address(&settings.consensus_address)?;

    let this_id = settings
        .participants
        .iter()
        .find(|p| parse_address(&p.address).map(|a| a.0 == from).unwrap_or(false))
        .map(|p| p.id)
        .ok_or_else(|| anyhow::anyhow!("this validator's signing key does not match any configured participant"))?;

    let storage = Arc::new(RocksStorage::open(&settings.storage_path)?);
    let rpc = Arc::new(AnyTransportClient::connect(&settings.rpc_url).await?);

    let cfg = ShellConfig {
        chain_id: settings.chain_id,
        coordinator,
        consensus,
        this_id,
        max_reorg_depth: shieldnet_validator::constants::DEFAULT_MAX_REORG_DEPTH,
        key_gen_timeout: settings.key_gen_timeout,
        signing_timeout: settings.signing_timeout,
        block_poll_interval: Duration::from_secs(12),
        action_queue_poll_interval: Duration::from_millis(shieldnet_validator::constants::DEFAULT_RETRY_DELAY_MS),
        check_pending_poll_interval: Duration::from_secs(
            shieldnet_validator::constants::DEFAULT_CHECK_PENDING_POLL_SECONDS,
        ),
    };

    let mut shell = Shell::new(storage, rpc, private_key, web3::types::Address::from(from), cfg, logger)?;

    let metrics = shell.metrics();
    tokio::spawn(serve_metrics(metrics, settings.metrics_port, logger.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(wait_for_signal(shutdown_tx, logger.clone()));

    shell.run(shutdown_rx).await
}

async fn wait_for_signal(shutdown_tx: tokio::sync::oneshot::Sender<()>, logger: slog::Logger) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            slog::warn!(logger, "failed to install SIGTERM handler"; "error" => format!("{err}"));
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(());
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => slog::info!(logger, "received SIGINT"),
        _ = sigterm.recv() => slog::info!(logger, "received SIGTERM"),
    }
    let _ = shutdown_tx.send(());
}

async fn serve_metrics(metrics: Arc<shieldnet_validator::metrics::Metrics>, port: u16, logger: slog::Logger) {
    use prometheus::Encoder;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            slog::warn!(logger, "failed to bind metrics port"; "port" => port, "error" => format!("{err}"));
            return;
        }
    };

    loop {
        let Ok((mut stream, _)) = listener.accept().await else { continue };
        let registry = metrics.registry.clone();
        tokio::spawn(async move {
            let encoder = prometheus::TextEncoder::new();
            let families = registry.gather();
            let mut buf = Vec::new();
            if encoder.encode(&families, &mut buf).is_err() {
                return;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
                encoder.format_type(),
                buf.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.write_all(&buf).await;
        });
    }
}
