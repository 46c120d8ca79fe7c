//! Cluster-zone authoritative DNS resolver with upstream forwarding.

pub mod error;
pub mod forward;
pub mod resolve;
pub mod server;
pub mod whitelist;
pub mod zone;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

pub use error::{Error, Result};
use swarmd_registry::Registry;
use whitelist::Whitelist;

pub struct Dns {
    pub zone: String,
    pub upstreams: Vec<SocketAddr>,
    pub whitelist: RwLock<Whitelist>,
    registry: Arc<Registry>,
    /// The address containers should be configured to use as their
    /// resolver: the local node's address from Membership, falling back
    /// to loopback.
    pub dns_ip: String,
}

impl Dns {
    pub fn new(
        zone: String,
        upstreams: Vec<SocketAddr>,
        whitelist: Whitelist,
        registry: Arc<Registry>,
        local_address: Option<String>,
    ) -> Arc<Self> {
        let dns_ip = local_address.unwrap_or_else(|| "127.0.0.1".to_string());
        Arc::new(Self {
            zone,
            upstreams,
            whitelist: RwLock::new(whitelist),
            registry,
            dns_ip,
        })
    }

    /// Spawns the UDP and TCP listener loops on `addr`. The returned
    /// handles are owned by the caller, same as any other long-lived
    /// background task.
    pub fn spawn_listeners(self: &Arc<Self>, addr: SocketAddr) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        info!(%addr, dns_ip = %self.dns_ip, zone = %self.zone, "starting DNS listeners");
        let udp = {
            let dns = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server::run_udp(dns, addr).await {
                    tracing::error!(error = %e, "DNS UDP listener exited");
                }
            })
        };
        let tcp = {
            let dns = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server::run_tcp(dns, addr).await {
                    tracing::error!(error = %e, "DNS TCP listener exited");
                }
            })
        };
        (udp, tcp)
    }
}
