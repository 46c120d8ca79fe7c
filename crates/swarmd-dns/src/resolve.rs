//! Builds cluster-authoritative answers: A records, SRV records, and stub
//! responses for AAAA and any other record type.

use std::net::Ipv4Addr;
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::{A, SRV};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use swarmd_core::model::ServiceEndpoint;
use swarmd_registry::Registry;

use crate::zone::{self, ClusterQuery};

const A_TTL: u32 = 60;

/// Builds the authoritative answer for a query already known to fall
/// within the cluster zone. Never fails: unknown services get an empty
/// answer, AAAA queries and any other record type get a zero-TTL
/// 0.0.0.0 stub record rather than an error: this resolver never
/// synthesizes NXDOMAIN.
pub async fn resolve(query: &Message, zone: &str, registry: &Registry) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_available(false);
    response.set_authoritative(true);
    for q in query.queries() {
        response.add_query(q.clone());
    }

    let Some(question) = query.queries().first() else {
        return response;
    };
    let name = question.name().to_ascii();

    match question.query_type() {
        RecordType::A => match zone::parse(&name, zone) {
            ClusterQuery::A(a) => {
                let endpoints = registry.get_endpoints(&a.namespace, &a.service).await;
                add_a_records(&mut response, question.name(), &endpoints);
            }
            _ => {}
        },
        RecordType::SRV => match zone::parse(&name, zone) {
            ClusterQuery::Srv(srv) => {
                let endpoints = registry.get_endpoints(&srv.namespace, &srv.service).await;
                add_srv_records(&mut response, question.name(), zone, &srv.service, &srv.namespace, &endpoints);
            }
            _ => {}
        },
        _ => {
            // AAAA and anything else: zero-TTL 0.0.0.0 stub, not NXDOMAIN.
            response.add_answer(Record::from_rdata(
                question.name().clone(),
                0,
                RData::A(A(Ipv4Addr::new(0, 0, 0, 0))),
            ));
        }
    }

    response
}

fn add_a_records(response: &mut Message, name: &Name, endpoints: &[ServiceEndpoint]) {
    for endpoint in endpoints {
        let Ok(ip) = Ipv4Addr::from_str(endpoint.address.split(':').next().unwrap_or(&endpoint.address)) else {
            continue;
        };
        response.add_answer(Record::from_rdata(name.clone(), A_TTL, RData::A(A(ip))));
    }
}

fn add_srv_records(
    response: &mut Message,
    name: &Name,
    zone: &str,
    service: &str,
    namespace: &str,
    endpoints: &[ServiceEndpoint],
) {
    let Ok(target) = Name::from_ascii(format!("{service}.{namespace}.{zone}.")) else {
        return;
    };
    for (idx, endpoint) in endpoints.iter().enumerate() {
        let priority = 10 + 10 * idx as u16;
        let srv = SRV::new(priority, 10, endpoint.port, target.clone());
        response.add_answer(Record::from_rdata(name.clone(), A_TTL, RData::SRV(srv)));

        if let Ok(ip) = Ipv4Addr::from_str(endpoint.address.split(':').next().unwrap_or(&endpoint.address)) {
            response.add_additional(Record::from_rdata(target.clone(), A_TTL, RData::A(A(ip))));
        }
    }
}

/// Builds the query message sent to an upstream resolver for a
/// non-cluster name.
pub fn build_query(id: u16, query: &Query) -> Message {
    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query.clone());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use async_trait::async_trait;
    use swarmd_core::Transport;

    struct FakeTransport;
    #[async_trait]
    impl Transport for FakeTransport {
        async fn broadcast(&self, _payload: Vec<u8>) {}
        fn local_address(&self) -> String {
            "10.0.0.1".into()
        }
    }

    fn query_message(name: &str, qtype: RecordType) -> Message {
        let mut message = Message::new();
        message.set_id(42);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        let mut q = Query::new();
        q.set_name(Name::from_ascii(name).unwrap());
        q.set_query_type(qtype);
        message.add_query(q);
        message
    }

    #[tokio::test]
    async fn unknown_service_returns_empty_answer() {
        let registry = Registry::new(Arc::new(FakeTransport));
        let query = query_message("web.default.cluster.local.", RecordType::A);
        let response = resolve(&query, "cluster.local", &registry).await;
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn registered_endpoint_produces_a_record() {
        let registry = Registry::new(Arc::new(FakeTransport));
        registry
            .register("default", "web", "node-1", "pod-1", "web-0", 8080)
            .await
            .unwrap();
        let query = query_message("web.default.cluster.local.", RecordType::A);
        let response = resolve(&query, "cluster.local", &registry).await;
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn aaaa_query_returns_zero_ttl_stub_not_an_error() {
        let registry = Registry::new(Arc::new(FakeTransport));
        let query = query_message("web.default.cluster.local.", RecordType::AAAA);
        let response = resolve(&query, "cluster.local", &registry).await;
        assert_eq!(response.answers().len(), 1);
        let answer = &response.answers()[0];
        assert_eq!(answer.ttl(), 0);
        assert_eq!(answer.data(), &RData::A(A(Ipv4Addr::new(0, 0, 0, 0))));
    }
}
