//! questhub - dump quest data from a running hub.
//!
//! Connects to the hub, waits for its `Ready` push, then fetches the service
//! status, clears the cache and writes daily quests, challenge bundles and
//! bundle schedules to JSON files. Stays connected until Ctrl-C.
//!
//! # Environment
//!
//! - `QUESTHUB_URL` - hub address (default `tcp://127.0.0.1:5294`)
//! - `QUESTHUB_TIMEOUT_SECS` - default call timeout (default 30)
//! - `QUESTHUB_READY_TIMEOUT_SECS` - how long to wait for `Ready` (default 15)
//! - `QUESTHUB_OUTPUT_DIR` - where JSON files are written (default `.`)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn, Dispatch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use questhub_client::hub::{CallContext, ClientConfig, HubClient, DEFAULT_TIMEOUT_SECS};

const DEFAULT_HUB_URL: &str = "tcp://127.0.0.1:5294";
const DEFAULT_READY_TIMEOUT_SECS: u64 = 15;

/// Runtime settings read from the environment.
struct Settings {
    hub_url: String,
    timeout: Duration,
    ready_timeout: Duration,
    output_dir: PathBuf,
}

impl Settings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            hub_url: std::env::var("QUESTHUB_URL").unwrap_or_else(|_| DEFAULT_HUB_URL.to_string()),
            timeout: Duration::from_secs(env_secs("QUESTHUB_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            ready_timeout: Duration::from_secs(env_secs(
                "QUESTHUB_READY_TIMEOUT_SECS",
                DEFAULT_READY_TIMEOUT_SECS,
            )?),
            output_dir: std::env::var_os("QUESTHUB_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }
}

fn env_secs(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a whole number of seconds, got '{}'", name, value)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "questhub=info,questhub_client=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting questhub v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_env()?;
    let client = HubClient::with_config(
        ClientConfig::new(settings.hub_url.clone())
            .with_timeout(settings.timeout)
            .with_logger(tracing::dispatcher::get_default(Dispatch::clone)),
    );

    // Only the first initialized Ready triggers the dump.
    let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);
    let ran = Arc::new(AtomicBool::new(false));
    client.on_ready(move |status| {
        if status.initialized
            && ran
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let _ = ready_tx.try_send(());
        }
    });

    client.on_disconnect(|err| {
        warn!("Disconnected: {}", err);
    });

    info!("Connecting to hub at {}...", settings.hub_url);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.hub_url))?;

    match tokio::time::timeout(settings.ready_timeout, ready_rx.recv()).await {
        Ok(Some(())) => {
            if let Err(e) = run_operations(&client, &settings.output_dir).await {
                warn!("Error running operations: {:#}", e);
            }
        }
        Ok(None) | Err(_) => warn!("Timed out waiting for Ready"),
    }

    info!("Press Ctrl-C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    client.disconnect().await?;
    Ok(())
}

async fn run_operations(client: &HubClient, output_dir: &Path) -> Result<()> {
    let status = client
        .get_service_status(&CallContext::with_timeout(Duration::from_secs(10)))
        .await
        .context("get status")?;
    info!("Version: {}", status.version);
    info!("Initialized: {}", status.initialized);

    info!("Clearing cache");
    let cleared = client
        .clear_cache(&CallContext::with_timeout(Duration::from_secs(15)))
        .await
        .context("clear cache")?;
    info!("Cleared {} keys", cleared.keys_cleared);

    let quests = client
        .get_daily_quests(&CallContext::with_timeout(Duration::from_secs(15)))
        .await
        .context("get quests")?;
    write_json_file(&output_dir.join("daily_quests.json"), &quests)
        .context("write daily quests json")?;
    info!("Found {} daily quests", quests.len());

    let bundles = client
        .get_challenge_bundles(&CallContext::with_timeout(Duration::from_secs(30)))
        .await
        .context("get bundles")?;
    write_json_file(&output_dir.join("challenge_bundles.json"), &bundles)
        .context("write challenge bundles json")?;
    info!("Found {} challenge bundles", bundles.len());

    let schedules = client
        .get_challenge_bundle_schedules(&CallContext::with_timeout(Duration::from_secs(30)))
        .await
        .context("get schedules")?;
    write_json_file(&output_dir.join("bundle_schedules.json"), &schedules)
        .context("write schedules json")?;
    info!("Found {} schedules", schedules.len());

    Ok(())
}

fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}
