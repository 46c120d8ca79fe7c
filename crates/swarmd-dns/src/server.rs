//! UDP and TCP listener loops, each its own long-lived `tokio::spawn`ed
//! task.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::forward;
use crate::resolve;
use crate::zone;
use crate::Dns;

const MAX_UDP_MESSAGE: usize = 4096;
const MAX_TCP_MESSAGE: usize = 64 * 1024;

pub async fn run_udp(dns: Arc<Dns>, addr: SocketAddr) -> Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    info!(%addr, "DNS UDP listener started");
    let mut buf = [0u8; MAX_UDP_MESSAGE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };
        let query = match Message::from_bytes(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                debug!(%peer, error = %e, "dropped malformed DNS query");
                continue;
            }
        };
        let response = handle_query(&dns, query).await;
        if let Ok(bytes) = response.to_bytes() {
            if let Err(e) = socket.send_to(&bytes, peer).await {
                warn!(%peer, error = %e, "failed to send UDP DNS response");
            }
        }
    }
}

pub async fn run_tcp(dns: Arc<Dns>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "DNS TCP listener started");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "TCP accept error");
                continue;
            }
        };
        let dns = dns.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(dns, stream).await {
                debug!(%peer, error = %e, "TCP DNS connection ended with error");
            }
        });
    }
}

async fn handle_tcp_connection(dns: Arc<Dns>, mut stream: tokio::net::TcpStream) -> Result<()> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_TCP_MESSAGE {
        return Ok(());
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    let query = match Message::from_bytes(&buf) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "dropped malformed TCP DNS query");
            return Ok(());
        }
    };
    let response = handle_query(&dns, query).await;
    let bytes = response.to_bytes().map_err(crate::error::Error::Protocol)?;
    let response_len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    stream.write_all(&response_len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

async fn handle_query(dns: &Dns, query: Message) -> Message {
    let Some(question) = query.queries().first().cloned() else {
        return server_failure(&query);
    };
    let name = question.name().to_ascii();

    if zone::is_in_zone(&name, &dns.zone) {
        return resolve::resolve(&query, &dns.zone, &dns.registry).await;
    }

    {
        let whitelist = dns.whitelist.read().await;
        if !whitelist.is_allowed(&name) {
            return refused(&query);
        }
    }

    let whitelist = dns.whitelist.read().await;
    match forward::forward(&query, &dns.upstreams, &whitelist).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, name = %name, "forwarding failed for all upstreams");
            server_failure(&query)
        }
    }
}

fn refused(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_response_code(ResponseCode::Refused);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    response
}

fn server_failure(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_response_code(ResponseCode::ServFail);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    response
}
