//! Peer membership and encrypted gossip.
//!
//! A simplified SWIM-style failure detector runs over UDP (direct ping,
//! indirect ping via a random peer on timeout, a suspicion window before a
//! `Gone` leave is gossiped) and a length-prefixed TCP handshake handles
//! joins. Both channels carry [`wire::WireMessage`] frames sealed with
//! AES-256-GCM. `broadcast`, `local_address` and `set_message_handler` are
//! the only capabilities the registry and store layers ever see — neither
//! is ever handed a reference to the rest of this module's state.

pub mod crypto;
pub mod tokens;
pub mod wire;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use rand::seq::IteratorRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Notify, RwLock as AsyncRwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, instrument, trace, warn};

use swarmd_core::error::{Error, Result};
use swarmd_core::model::{Node, NodeStatus};
use tokens::TokenStore;
use wire::WireMessage;

/// Message handler registered by the orchestration glue. Invoked once per
/// successfully
/// decrypted `App` frame, never for control traffic.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const INDIRECT_PROBE_FANOUT: usize = 3;
const SUSPECT_ROUNDS: u32 = 3;
const MAX_UDP_FRAME: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct MembershipConfig {
    pub node_name: String,
    pub bind_addr: SocketAddr,
    pub join_seeds: Vec<SocketAddr>,
    pub join_token: Option<String>,
    /// `None` means "generate a fresh secret" (first-node bootstrap).
    pub shared_secret: Option<Vec<u8>>,
}

struct Inner {
    local: Node,
    bind_addr: SocketAddr,
    key: [u8; 32],
    tokens: Arc<TokenStore>,
    members: AsyncRwLock<HashMap<String, Node>>,
    pending_acks: AsyncRwLock<HashMap<String, oneshot::Sender<()>>>,
    handler: AsyncRwLock<Option<MessageHandler>>,
    udp: UdpSocket,
    addr_of: AsyncRwLock<HashMap<String, SocketAddr>>,
    shutdown: Notify,
}

/// A running membership instance. Clone is cheap (the handle is an
/// `Arc`-backed reference to the shared membership state).
#[derive(Clone)]
pub struct MembershipHandle {
    inner: Arc<Inner>,
    tasks: Arc<AsyncRwLock<Vec<JoinHandle<()>>>>,
}

impl MembershipHandle {
    /// Binds `config.bind_addr` for TCP+UDP, then either bootstraps a
    /// fresh cluster (no seeds) or joins one via the first reachable seed.
    #[instrument(skip(config), fields(node_name = %config.node_name))]
    pub async fn start(config: MembershipConfig) -> Result<Self> {
        let udp = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind membership UDP socket: {e}")))?;
        let tcp = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind membership TCP socket: {e}")))?;

        let bootstrapping = config.join_seeds.is_empty();
        let secret = match config.shared_secret {
            Some(s) => crypto::derive_key(&s),
            None if bootstrapping => crypto::generate_secret(),
            None => {
                return Err(Error::Fatal(
                    "encryption-key is required when joining an existing cluster".into(),
                ));
            }
        };

        let tokens = Arc::new(TokenStore::new(secret));
        let local = Node {
            name: config.node_name.clone(),
            address: config.bind_addr.ip().to_string(),
            status: NodeStatus::Ready,
            labels: Default::default(),
        };

        if bootstrapping {
            let token = match config.join_token {
                Some(t) => {
                    tokens.insert(t.clone());
                    t
                }
                None => tokens.issue(),
            };
            info!(token = %token, secret = %base64_secret(&secret), "bootstrapped new cluster");
        }

        let mut members = HashMap::new();
        members.insert(local.name.clone(), local.clone());

        let inner = Arc::new(Inner {
            local: local.clone(),
            bind_addr: config.bind_addr,
            key: secret,
            tokens,
            members: AsyncRwLock::new(members),
            pending_acks: AsyncRwLock::new(HashMap::new()),
            handler: AsyncRwLock::new(None),
            udp,
            addr_of: AsyncRwLock::new(HashMap::new()),
            shutdown: Notify::new(),
        });

        let handle = Self {
            inner: inner.clone(),
            tasks: Arc::new(AsyncRwLock::new(Vec::new())),
        };

        if !bootstrapping {
            let token = config
                .join_token
                .ok_or_else(|| Error::AuthFailure("join-token is required to join a cluster".into()))?;
            handle.join_via_seeds(&config.join_seeds, &token).await?;
        }

        handle.spawn_background_tasks(tcp);
        Ok(handle)
    }

    fn spawn_background_tasks(&self, tcp: TcpListener) {
        let udp_task = tokio::spawn(udp_recv_loop(self.inner.clone()));
        let tcp_task = tokio::spawn(tcp_accept_loop(self.inner.clone(), tcp));
        let prober_task = tokio::spawn(prober_loop(self.inner.clone()));
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let mut guard = tasks.write().await;
            guard.push(udp_task);
            guard.push(tcp_task);
            guard.push(prober_task);
        });
    }

    async fn join_via_seeds(&self, seeds: &[SocketAddr], token: &str) -> Result<()> {
        let mut last_err = None;
        for seed in seeds {
            match self.join_one(*seed, token).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(seed = %seed, error = %e, "join attempt failed, trying next seed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Fatal("no join seeds configured".into())))
    }

    async fn join_one(&self, seed: SocketAddr, token: &str) -> Result<()> {
        // A seed can be mid-restart during rolling upgrades; a handful of
        // quick retries rides that out instead of failing bootstrap outright.
        let connect_backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(4);
        let mut stream = (|| async { TcpStream::connect(seed).await })
            .retry(connect_backoff)
            .await
            .map_err(|e| Error::Fatal(format!("failed to connect to seed {seed}: {e}")))?;
        let request = WireMessage::Join {
            node: self.inner.local.clone(),
            token: token.to_string(),
        };
        send_framed(&mut stream, &self.inner.key, &request).await?;
        let response: WireMessage = recv_framed(&mut stream, &self.inner.key).await?;
        match response {
            WireMessage::JoinAck {
                accepted: true,
                members,
            } => {
                let mut guard = self.inner.members.write().await;
                let mut addrs = self.inner.addr_of.write().await;
                for node in members {
                    if let Ok(ip) = node.address.parse() {
                        addrs.insert(node.name.clone(), SocketAddr::new(ip, seed.port()));
                    }
                    guard.insert(node.name.clone(), node);
                }
                guard.insert(self.inner.local.name.clone(), self.inner.local.clone());
                Ok(())
            }
            WireMessage::JoinAck { accepted: false, .. } => {
                Err(Error::AuthFailure(format!("join token rejected by {seed}")))
            }
            _ => Err(Error::Fatal(format!("unexpected handshake response from {seed}"))),
        }
    }

    /// Best-effort delivery to all live members. No retransmit guarantee.
    pub async fn broadcast(&self, payload: Vec<u8>) {
        let message = WireMessage::App { payload };
        let Ok(encoded) = serde_json::to_vec(&message) else {
            warn!("failed to encode broadcast payload");
            return;
        };
        let frame = crypto::seal(&self.inner.key, &encoded);
        let members = self.inner.members.read().await;
        let addrs = self.inner.addr_of.read().await;
        for node in members.values() {
            if node.name == self.inner.local.name || node.status != NodeStatus::Ready {
                continue;
            }
            let Some(addr) = addrs.get(&node.name).copied() else {
                continue;
            };
            if frame.len() > MAX_UDP_FRAME {
                warn!(bytes = frame.len(), "broadcast payload exceeds UDP frame budget");
                continue;
            }
            if let Err(e) = self.inner.udp.send_to(&frame, addr).await {
                debug!(peer = %node.name, error = %e, "broadcast send failed, will be repaired by next anti-entropy sync");
            }
        }
    }

    pub async fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        *self.inner.handler.write().await = Some(Arc::new(handler));
    }

    pub async fn members(&self) -> Vec<Node> {
        self.inner.members.read().await.values().cloned().collect()
    }

    pub fn local_node(&self) -> Node {
        self.inner.local.clone()
    }

    pub fn local_address(&self) -> String {
        self.inner.local.address.clone()
    }

    pub fn tokens(&self) -> Arc<TokenStore> {
        self.inner.tokens.clone()
    }

    /// The derived 32-byte AES-256 key, so the orchestration glue can
    /// persist it to `data_dir/encryption.key` on first-node bootstrap.
    pub fn shared_secret(&self) -> [u8; 32] {
        self.inner.key
    }

    /// Best-effort leave broadcast, then socket close. Background tasks
    /// observe the shutdown notification and return within one probe
    /// interval.
    pub async fn shutdown(&self) {
        let leave = WireMessage::Leave {
            node: self.inner.local.name.clone(),
        };
        if let Ok(encoded) = serde_json::to_vec(&leave) {
            let frame = crypto::seal(&self.inner.key, &encoded);
            let members = self.inner.members.read().await;
            let addrs = self.inner.addr_of.read().await;
            for node in members.values() {
                if let Some(addr) = addrs.get(&node.name) {
                    let _ = self.inner.udp.send_to(&frame, *addr).await;
                }
            }
        }
        self.inner.shutdown.notify_waiters();
        for task in self.tasks.write().await.drain(..) {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl swarmd_core::Transport for MembershipHandle {
    async fn broadcast(&self, payload: Vec<u8>) {
        MembershipHandle::broadcast(self, payload).await
    }

    fn local_address(&self) -> String {
        self.local_address()
    }
}

#[async_trait::async_trait]
impl swarmd_core::ClusterView for MembershipHandle {
    async fn members(&self) -> Vec<Node> {
        MembershipHandle::members(self).await
    }

    fn local_node(&self) -> Node {
        self.local_node()
    }
}

fn base64_secret(secret: &[u8; 32]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret)
}

async fn send_framed(stream: &mut TcpStream, key: &[u8; 32], msg: &WireMessage) -> Result<()> {
    let encoded =
        serde_json::to_vec(msg).map_err(|e| Error::InvalidInput(format!("encode error: {e}")))?;
    let frame = crypto::seal(key, &encoded);
    let len = frame.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(Error::from)?;
    stream.write_all(&frame).await.map_err(Error::from)?;
    Ok(())
}

async fn recv_framed(stream: &mut TcpStream, key: &[u8; 32]) -> Result<WireMessage> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(Error::from)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_UDP_FRAME {
        return Err(Error::InvalidInput("handshake frame too large".into()));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await.map_err(Error::from)?;
    let plaintext = crypto::open(key, &frame)?;
    serde_json::from_slice(&plaintext).map_err(|e| Error::InvalidInput(format!("decode error: {e}")))
}

async fn tcp_accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "membership TCP accept failed");
                continue;
            }
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            let request = match recv_framed(&mut stream, &inner.key).await {
                Ok(req) => req,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping unreadable join handshake");
                    return;
                }
            };
            let WireMessage::Join { node, token } = request else {
                debug!(peer = %peer, "ignoring non-join message on handshake port");
                return;
            };
            let accepted = inner.tokens.validate(&token);
            if !accepted {
                warn!(peer = %peer, candidate = %node.name, "rejected join: invalid token");
                let _ = send_framed(
                    &mut stream,
                    &inner.key,
                    &WireMessage::JoinAck {
                        accepted: false,
                        members: vec![],
                    },
                )
                .await;
                return;
            }
            let members_snapshot: Vec<Node> = {
                let mut guard = inner.members.write().await;
                guard.insert(node.name.clone(), node.clone());
                guard.values().cloned().collect()
            };
            inner
                .addr_of
                .write()
                .await
                .insert(node.name.clone(), SocketAddr::new(peer.ip(), inner.bind_addr.port()));
            info!(node = %node.name, "peer joined");
            let _ = send_framed(
                &mut stream,
                &inner.key,
                &WireMessage::JoinAck {
                    accepted: true,
                    members: members_snapshot,
                },
            )
            .await;
            // Propagate the new member to everyone already known, so the
            // mesh converges without every node re-joining through the
            // same seed.
            let announce = WireMessage::Announce { node };
            if let Ok(encoded) = serde_json::to_vec(&announce) {
                let frame = crypto::seal(&inner.key, &encoded);
                let members = inner.members.read().await;
                let addrs = inner.addr_of.read().await;
                for member in members.values() {
                    if member.name == inner.local.name {
                        continue;
                    }
                    if let Some(addr) = addrs.get(&member.name) {
                        let _ = inner.udp.send_to(&frame, *addr).await;
                    }
                }
            }
        });
    }
}

async fn udp_recv_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; MAX_UDP_FRAME];
    loop {
        let (len, peer) = match inner.udp.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "membership UDP recv failed");
                continue;
            }
        };
        let plaintext = match crypto::open(&inner.key, &buf[..len]) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(peer = %peer, "dropped undecryptable gossip frame");
                continue;
            }
        };
        let message: WireMessage = match serde_json::from_slice(&plaintext) {
            Ok(m) => m,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropped gossip frame with unknown shape");
                continue;
            }
        };
        handle_wire_message(&inner, peer, message).await;
    }
}

async fn handle_wire_message(inner: &Arc<Inner>, peer: SocketAddr, message: WireMessage) {
    match message {
        WireMessage::Ping { from } => {
            remember_addr(inner, &from, peer).await;
            let ack = WireMessage::Ack {
                from: inner.local.clone(),
            };
            if let Ok(encoded) = serde_json::to_vec(&ack) {
                let frame = crypto::seal(&inner.key, &encoded);
                let _ = inner.udp.send_to(&frame, peer).await;
            }
        }
        WireMessage::Ack { from } => {
            if let Some(tx) = inner.pending_acks.write().await.remove(&from.name) {
                let _ = tx.send(());
            }
        }
        WireMessage::PingReq { target, from } => {
            let addrs = inner.addr_of.read().await;
            if let Some(&target_addr) = addrs.get(&target.name) {
                drop(addrs);
                let ping = WireMessage::Ping {
                    from: from.clone(),
                };
                if let Ok(encoded) = serde_json::to_vec(&ping) {
                    let frame = crypto::seal(&inner.key, &encoded);
                    let _ = inner.udp.send_to(&frame, target_addr).await;
                }
            }
        }
        WireMessage::Leave { node } => {
            if let Some(entry) = inner.members.write().await.get_mut(&node) {
                entry.status = NodeStatus::Gone;
            }
            info!(node = %node, "peer left");
        }
        WireMessage::Announce { node } => {
            remember_addr(inner, &node, peer).await;
            inner.members.write().await.insert(node.name.clone(), node);
        }
        WireMessage::App { payload } => {
            if let Some(handler) = inner.handler.read().await.as_ref() {
                handler(payload);
            }
        }
        WireMessage::Join { .. } | WireMessage::JoinAck { .. } => {
            trace!("ignoring handshake message received out of band on the gossip socket");
        }
    }
}

async fn remember_addr(inner: &Arc<Inner>, node: &Node, observed_from: SocketAddr) {
    let addr = SocketAddr::new(observed_from.ip(), inner.bind_addr.port());
    inner.addr_of.write().await.insert(node.name.clone(), addr);
}

/// Periodically probes a random member; on timeout falls back to indirect
/// probes through a handful of other members, and after
/// [`SUSPECT_ROUNDS`] consecutive failures marks the node `Gone` and
/// gossips a leave.
async fn prober_loop(inner: Arc<Inner>) {
    let mut suspicion: HashMap<String, u32> = HashMap::new();
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        tokio::select! {
            _ = inner.shutdown.notified() => return,
            _ = ticker.tick() => {}
        }

        let candidate = {
            let members = inner.members.read().await;
            members
                .values()
                .filter(|n| n.name != inner.local.name && n.status == NodeStatus::Ready)
                .choose(&mut rand::rng())
                .cloned()
        };
        let Some(target) = candidate else { continue };
        let Some(target_addr) = inner.addr_of.read().await.get(&target.name).copied() else {
            continue;
        };

        let acked = probe_once(&inner, &target, target_addr).await;
        if acked {
            suspicion.remove(&target.name);
            continue;
        }

        let indirect_acked = indirect_probe(&inner, &target).await;
        if indirect_acked {
            suspicion.remove(&target.name);
            continue;
        }

        let rounds = suspicion.entry(target.name.clone()).or_insert(0);
        *rounds += 1;
        if *rounds >= SUSPECT_ROUNDS {
            warn!(node = %target.name, "marking peer Gone after repeated failed probes");
            if let Some(entry) = inner.members.write().await.get_mut(&target.name) {
                entry.status = NodeStatus::Gone;
            }
            let leave = WireMessage::Leave {
                node: target.name.clone(),
            };
            if let Ok(encoded) = serde_json::to_vec(&leave) {
                let frame = crypto::seal(&inner.key, &encoded);
                let addrs = inner.addr_of.read().await;
                for (name, addr) in addrs.iter() {
                    if *name != inner.local.name {
                        let _ = inner.udp.send_to(&frame, *addr).await;
                    }
                }
            }
            suspicion.remove(&target.name);
        }
    }
}

async fn probe_once(inner: &Arc<Inner>, target: &Node, target_addr: SocketAddr) -> bool {
    let (tx, rx) = oneshot::channel();
    inner
        .pending_acks
        .write()
        .await
        .insert(target.name.clone(), tx);

    let ping = WireMessage::Ping {
        from: inner.local.clone(),
    };
    if let Ok(encoded) = serde_json::to_vec(&ping) {
        let frame = crypto::seal(&inner.key, &encoded);
        let _ = inner.udp.send_to(&frame, target_addr).await;
    }

    timeout(PROBE_TIMEOUT, rx).await.is_ok_and(|r| r.is_ok())
}

async fn indirect_probe(inner: &Arc<Inner>, target: &Node) -> bool {
    let helpers: Vec<(String, SocketAddr)> = {
        let members = inner.members.read().await;
        let addrs = inner.addr_of.read().await;
        members
            .values()
            .filter(|n| n.name != inner.local.name && n.name != target.name)
            .filter_map(|n| addrs.get(&n.name).map(|a| (n.name.clone(), *a)))
            .choose_multiple(&mut rand::rng(), INDIRECT_PROBE_FANOUT)
    };
    if helpers.is_empty() {
        return false;
    }

    let (tx, rx) = oneshot::channel();
    inner
        .pending_acks
        .write()
        .await
        .insert(target.name.clone(), tx);

    let req = WireMessage::PingReq {
        target: target.clone(),
        from: inner.local.clone(),
    };
    if let Ok(encoded) = serde_json::to_vec(&req) {
        let frame = crypto::seal(&inner.key, &encoded);
        for (_, addr) in &helpers {
            let _ = inner.udp.send_to(&frame, *addr).await;
        }
    }

    timeout(PROBE_TIMEOUT, rx).await.is_ok_and(|r| r.is_ok())
}
