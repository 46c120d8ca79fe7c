//! Upstream forwarding pipeline for queries outside the cluster zone.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RData;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::whitelist::Whitelist;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TCP_RESPONSE: usize = 64 * 1024;

/// Tries each upstream in order; returns the first response whose rcode
/// is success and whose CNAME chain passes the whitelist. Returns
/// `RcodeServerFailure` framed as [`Error::Upstream`] if none qualify.
pub async fn forward(query: &Message, upstreams: &[SocketAddr], whitelist: &Whitelist) -> Result<Message> {
    for upstream in upstreams {
        match try_upstream(query, *upstream).await {
            Ok(response) if response.response_code() == ResponseCode::NoError => {
                if cnames_allowed(&response, whitelist) {
                    return Ok(response);
                }
                debug!(%upstream, "rejecting upstream response: disallowed CNAME target");
            }
            Ok(response) => {
                debug!(%upstream, rcode = ?response.response_code(), "upstream returned non-success rcode");
            }
            Err(e) => {
                warn!(%upstream, error = %e, "upstream query failed");
            }
        }
    }
    Err(Error::Upstream("no upstream returned a usable response".into()))
}

async fn try_upstream(query: &Message, upstream: SocketAddr) -> Result<Message> {
    match query_udp(query, upstream).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(%upstream, error = %e, "UDP query failed, retrying over TCP");
            query_tcp(query, upstream).await
        }
    }
}

async fn query_udp(query: &Message, upstream: SocketAddr) -> Result<Message> {
    let local_addr: SocketAddr = if upstream.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
    let socket = UdpSocket::bind(local_addr).await?;
    let bytes = query.to_bytes().map_err(Error::Protocol)?;
    timeout(UPSTREAM_TIMEOUT, socket.send_to(&bytes, upstream)).await??;

    let mut buf = [0u8; 4096];
    let (len, _) = timeout(UPSTREAM_TIMEOUT, socket.recv_from(&mut buf)).await??;
    Message::from_bytes(&buf[..len]).map_err(Error::Protocol)
}

async fn query_tcp(query: &Message, upstream: SocketAddr) -> Result<Message> {
    let mut stream = timeout(UPSTREAM_TIMEOUT, TcpStream::connect(upstream)).await??;
    let bytes = query.to_bytes().map_err(Error::Protocol)?;
    let len = u16::try_from(bytes.len()).map_err(|_| Error::Upstream("query too large for TCP framing".into()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;

    let mut len_buf = [0u8; 2];
    timeout(UPSTREAM_TIMEOUT, stream.read_exact(&mut len_buf)).await??;
    let response_len = u16::from_be_bytes(len_buf) as usize;
    if response_len > MAX_TCP_RESPONSE {
        return Err(Error::Upstream("oversized TCP response".into()));
    }
    let mut response_buf = vec![0u8; response_len];
    timeout(UPSTREAM_TIMEOUT, stream.read_exact(&mut response_buf)).await??;
    Message::from_bytes(&response_buf).map_err(Error::Protocol)
}

fn cnames_allowed(response: &Message, whitelist: &Whitelist) -> bool {
    response
        .answers()
        .iter()
        .chain(response.additionals())
        .filter_map(|record| match record.data() {
            RData::CNAME(name) => Some(name.to_ascii()),
            _ => None,
        })
        .all(|target| whitelist.is_allowed(&target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, Record, RecordType};
    use std::net::Ipv4Addr;

    fn response_with_cname(cname: &str) -> Message {
        let mut message = Message::new();
        message.set_response_code(ResponseCode::NoError);
        let target = Name::from_ascii(cname).unwrap();
        message.add_answer(Record::from_rdata(
            Name::from_ascii("query.example.com.").unwrap(),
            60,
            RData::CNAME(target),
        ));
        message
    }

    #[test]
    fn cname_target_must_pass_whitelist_when_enabled() {
        let wl = Whitelist::new(true, ["example.com".to_string()]);
        assert!(cnames_allowed(&response_with_cname("api.example.com."), &wl));
        assert!(!cnames_allowed(&response_with_cname("api.evil.com."), &wl));
    }

    #[test]
    fn disabled_whitelist_allows_any_cname() {
        let wl = Whitelist::new(false, []);
        assert!(cnames_allowed(&response_with_cname("api.evil.com."), &wl));
    }

    #[test]
    fn response_with_no_cnames_always_passes() {
        let wl = Whitelist::new(true, []);
        let mut message = Message::new();
        message.add_answer(Record::from_rdata(
            Name::from_ascii("a.example.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(10, 0, 0, 1))),
        ));
        assert!(cnames_allowed(&message, &wl));
    }
}
