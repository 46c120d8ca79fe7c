//! Entry point: parse configuration, start Membership/Registry/Store/DNS,
//! wire the single in-process message dispatcher, mount the HTTP API, and
//! run everything until SIGTERM/ctrl-c. A clap `Args`, `telemetry::init`,
//! and an axum server with graceful shutdown joined against the
//! background tasks.

mod api;
mod dispatch;
mod metrics;
mod state;

use std::fs;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, crate_authors, crate_description, crate_version};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use swarmd_core::telemetry;
use swarmd_core::{ClusterView, Transport};
use swarmd_dns::Dns;
use swarmd_dns::whitelist::Whitelist;
use swarmd_membership::{MembershipConfig, MembershipHandle};
use swarmd_registry::Registry;
use swarmd_store::Store;
use swarmd_workload::Workload;
use swarmd_workload::runtime::LoggingRuntimeAdapter;

use crate::metrics::Metrics;
use crate::state::AppState;

const ENCRYPTION_KEY_FILE: &str = "encryption.key";
const RECOVERY_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "swarmd-agent",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Name this node advertises to the rest of the cluster.
    #[arg(long, default_value = "node-1", env)]
    node_name: String,

    /// Address the membership gossip listener (TCP+UDP) binds to.
    #[arg(long, default_value = "0.0.0.0:7946", env)]
    bind_addr: SocketAddr,

    /// Address the HTTP API listens on.
    #[arg(long, default_value = "0.0.0.0:8080", env)]
    api_addr: SocketAddr,

    /// Directory for persisted cluster state, backups and the derived
    /// encryption key.
    #[arg(long, default_value = "/var/lib/podman-swarm", env)]
    data_dir: PathBuf,

    /// Comma-separated addresses of existing cluster members to join, tried
    /// in order until one succeeds. Omit to bootstrap a new cluster.
    #[arg(long, env, value_delimiter = ',')]
    join: Vec<SocketAddr>,

    /// Join token presented to the seed named by `--join`.
    #[arg(long, env)]
    join_token: Option<String>,

    /// Base64-encoded pre-shared secret. Required to join an existing
    /// cluster unless `data_dir/encryption.key` already holds one from a
    /// previous run.
    #[arg(long, env)]
    encryption_key: Option<String>,

    /// Port the authoritative/recursive DNS server listens on.
    #[arg(long, default_value_t = 53, env)]
    dns_port: u16,

    /// Zone this node answers authoritatively for.
    #[arg(long, default_value = "cluster.local", env)]
    cluster_domain: String,

    /// Comma-separated upstream resolvers for non-cluster names.
    #[arg(long, default_value = "8.8.8.8:53,8.8.4.4:53", env, value_delimiter = ',')]
    upstream_dns: Vec<SocketAddr>,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format.
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint. Tracing export is
    /// disabled when unset.
    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing (0.0-1.0).
    #[arg(long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    fs::create_dir_all(&args.data_dir)?;
    let key_path = args.data_dir.join(ENCRYPTION_KEY_FILE);
    let shared_secret = resolve_shared_secret(&args, &key_path)?;

    let membership = MembershipHandle::start(MembershipConfig {
        node_name: args.node_name.clone(),
        bind_addr: args.bind_addr,
        join_seeds: args.join.clone(),
        join_token: args.join_token.clone(),
        shared_secret,
    })
    .await?;
    persist_shared_secret(&key_path, &membership.shared_secret())?;

    let transport: Arc<dyn Transport> = Arc::new(membership.clone());
    let cluster: Arc<dyn ClusterView> = Arc::new(membership.clone());

    let store = Store::load(transport.clone(), args.node_name.clone(), args.data_dir.clone()).await?;
    let registry = Registry::new(transport.clone());
    let whitelist = Whitelist::new(false, Vec::new());
    let dns = Dns::new(
        args.cluster_domain.clone(),
        args.upstream_dns.clone(),
        whitelist,
        registry.clone(),
        Some(membership.local_address()),
    );
    let runtime = Arc::new(LoggingRuntimeAdapter);
    let workload = Workload::new(
        store.clone(),
        registry.clone(),
        cluster,
        runtime,
        membership.local_address(),
    );

    let dispatch_registry = registry.clone();
    let dispatch_store = store.clone();
    membership
        .set_message_handler(move |bytes| {
            let registry = dispatch_registry.clone();
            let store = dispatch_store.clone();
            tokio::spawn(async move {
                dispatch::dispatch(&registry, &store, &bytes).await;
            });
        })
        .await;

    let _sweeper = registry.spawn_sweeper();
    let _store_tasks = store.spawn_background_tasks();
    let dns_bind_addr = SocketAddr::new(args.bind_addr.ip(), args.dns_port);
    let _dns_tasks = dns.spawn_listeners(dns_bind_addr);

    let recovery_workload = workload.clone();
    tokio::spawn(async move {
        tokio::time::sleep(RECOVERY_DELAY).await;
        if let Err(e) = recovery_workload.recover().await {
            warn!(error = %e, "startup recovery failed");
        }
    });

    let metrics = Arc::new(Metrics::new());
    let app_state = AppState {
        membership: membership.clone(),
        store,
        registry,
        dns,
        workload,
        metrics,
    };

    let app = api::router(app_state);
    let listener = TcpListener::bind(args.api_addr).await?;
    info!(addr = %args.api_addr, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    membership.shutdown().await;
    Ok(())
}

/// Precedence: `--encryption-key` flag, then a previously-persisted
/// `data_dir/encryption.key`, else `None` (fresh bootstrap generates one;
/// joining without either is rejected by Membership itself).
fn resolve_shared_secret(args: &Args, key_path: &PathBuf) -> anyhow::Result<Option<Vec<u8>>> {
    if let Some(encoded) = &args.encryption_key {
        return Ok(Some(BASE64.decode(encoded)?));
    }
    if key_path.exists() {
        return Ok(Some(fs::read(key_path)?));
    }
    Ok(None)
}

fn persist_shared_secret(key_path: &PathBuf, secret: &[u8; 32]) -> anyhow::Result<()> {
    if key_path.exists() {
        return Ok(());
    }
    fs::write(key_path, secret)?;
    fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
