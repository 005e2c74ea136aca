//! DNSSEC-aware lookups with an explicit trust decision per answer
//!
//! The resolver never validates signatures itself. It asks the upstream
//! recursive resolver to do so (AD bit in the query) and believes the AD bit
//! in the response only when that resolver runs on this host: a flag that
//! crossed the network could have been set or stripped by anyone on the path.

use serde::Serialize;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};
use trust_dns_resolver::proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_resolver::proto::rr::{Name, RecordType};

use super::config::ClientConfig;
use super::error::{DnsError, RcodeError};
use super::records::{
    project, AKind, AaaaKind, Mx, MxKind, PtrKind, RecordKind, Tlsa, TlsaKind, TxtKind,
};
use super::transport::{Transport, UdpTransport, MAX_UDP_PAYLOAD};
use crate::context::Context;

/// Answers of one lookup and whether they can be trusted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthLookup<T> {
    /// Every contributing response was DNSSEC-validated by a local resolver
    pub authenticated: bool,
    pub answers: Vec<T>,
}

/// Resolver exposing the AD flag of each answer
#[derive(Clone)]
pub struct ExtResolver {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
}

impl ExtResolver {
    /// Resolver talking plain DNS to the configured servers
    pub fn new(config: ClientConfig) -> Self {
        let transport = UdpTransport::new(config.timeout);
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Authenticated reverse lookup of `addr`
    pub async fn lookup_addr(&self, ctx: &Context, addr: &str) -> Result<AuthLookup<String>, DnsError> {
        let ip: IpAddr = addr
            .parse()
            .map_err(|e| DnsError::parse(addr, e))?;
        let name = Name::from_ascii(reverse_name(ip)).map_err(|e| DnsError::parse(addr, e))?;

        self.lookup::<PtrKind>(ctx, name).await
    }

    /// Authenticated AAAA + A lookup, IPv6 addresses first
    pub async fn lookup_ip_addr(&self, ctx: &Context, host: &str) -> Result<AuthLookup<IpAddr>, DnsError> {
        let name = fqdn(host)?;

        let v6 = self.lookup::<AaaaKind>(ctx, name.clone()).await?;
        let v4 = self.lookup::<AKind>(ctx, name).await?;

        let mut answers: Vec<IpAddr> = Vec::with_capacity(v6.answers.len() + v4.answers.len());
        answers.extend(v6.answers.into_iter().map(IpAddr::V6));
        answers.extend(v4.answers.into_iter().map(IpAddr::V4));

        Ok(AuthLookup {
            authenticated: v6.authenticated && v4.authenticated,
            answers,
        })
    }

    /// Same as [`lookup_ip_addr`](Self::lookup_ip_addr), addresses rendered as strings
    pub async fn lookup_host(&self, ctx: &Context, host: &str) -> Result<AuthLookup<String>, DnsError> {
        let lookup = self.lookup_ip_addr(ctx, host).await?;
        Ok(AuthLookup {
            authenticated: lookup.authenticated,
            answers: lookup.answers.iter().map(IpAddr::to_string).collect(),
        })
    }

    pub async fn lookup_mx(&self, ctx: &Context, name: &str) -> Result<AuthLookup<Mx>, DnsError> {
        self.lookup::<MxKind>(ctx, fqdn(name)?).await
    }

    pub async fn lookup_txt(&self, ctx: &Context, name: &str) -> Result<AuthLookup<String>, DnsError> {
        self.lookup::<TxtKind>(ctx, fqdn(name)?).await
    }

    /// TLSA records at `_<port>._<network>.<domain>`
    pub async fn lookup_tlsa(
        &self,
        ctx: &Context,
        service: &str,
        network: &str,
        domain: &str,
    ) -> Result<AuthLookup<Tlsa>, DnsError> {
        let name = tlsa_name(service, network, domain)?;
        self.lookup::<TlsaKind>(ctx, fqdn(&name)?).await
    }

    async fn lookup<K: RecordKind>(&self, ctx: &Context, name: Name) -> Result<AuthLookup<K::Output>, DnsError> {
        let query = build_query(name, K::RECORD_TYPE);
        let resp = self.exchange(ctx, &query).await?;

        Ok(AuthLookup {
            authenticated: resp.authentic_data(),
            answers: project::<K>(resp.answers()),
        })
    }

    /// Try each server in order until one answers with NOERROR.
    ///
    /// Cancellation and deadline expiry end the walk immediately; every other
    /// failure is remembered and the next server is tried.
    async fn exchange(&self, ctx: &Context, query: &Message) -> Result<Message, DnsError> {
        let qname = query
            .queries()
            .first()
            .map(|q| q.name().to_string())
            .unwrap_or_default();

        let mut last_err = DnsError::NoServers;
        for server in self.config.server_addrs() {
            let exchange = async { self.transport.exchange(server, query).await };
            let mut resp = match ctx.run(exchange).await? {
                Ok(resp) => resp,
                Err(err) => {
                    debug!("DNS exchange with {} failed: {}", server, err);
                    last_err = err;
                    continue;
                }
            };

            if resp.response_code() != ResponseCode::NoError {
                debug!(
                    "DNS server {} answered {:?} for {}",
                    server,
                    resp.response_code(),
                    qname
                );
                last_err = RcodeError::new(qname.clone(), resp.response_code()).into();
                continue;
            }

            if !is_trusted(server) && resp.authentic_data() {
                debug!("Ignoring AD flag from non-local resolver {}", server);
                resp.set_authentic_data(false);
            }

            return Ok(resp);
        }

        if last_err.is_transport() {
            warn!("All DNS servers failed for {}: {}", qname, last_err);
        }
        Err(last_err)
    }
}

/// Only a resolver on this host is trusted to have validated DNSSEC
fn is_trusted(server: SocketAddr) -> bool {
    match server.ip() {
        IpAddr::V4(ip) => ip.is_loopback(),
        IpAddr::V6(ip) => ip.is_loopback() || ip.to_ipv4_mapped().map_or(false, |v4| v4.is_loopback()),
    }
}

fn build_query(name: Name, record_type: RecordType) -> Message {
    let mut edns = Edns::new();
    edns.set_max_payload(MAX_UDP_PAYLOAD);
    edns.set_dnssec_ok(false);

    let mut msg = Message::new();
    msg.set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .set_authentic_data(true);
    msg.add_query(Query::query(name, record_type));
    msg.set_edns(edns);
    msg
}

fn fqdn(name: &str) -> Result<Name, DnsError> {
    let absolute = if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    };

    Name::from_ascii(&absolute).map_err(|e| DnsError::parse(name, e))
}

/// `in-addr.arpa` / `ip6.arpa` name for `ip`
fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", d, c, b, a)
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(73);
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            name.push_str("ip6.arpa.");
            name
        }
    }
}

fn tlsa_name(service: &str, network: &str, domain: &str) -> Result<String, DnsError> {
    let subject = || format!("{}/{}/{}", service, network, domain);
    let invalid = |reason: &dyn Display| DnsError::parse(subject(), reason);

    let port: u16 = match service.parse() {
        Ok(port) => port,
        Err(_) => well_known_port(service)
            .ok_or_else(|| invalid(&format_args!("unknown service {:?}", service)))?,
    };

    if !matches!(network, "tcp" | "udp" | "sctp") {
        return Err(invalid(&format_args!("unknown network {:?}", network)));
    }

    if domain.is_empty() {
        return Err(invalid(&"empty domain"));
    }

    Ok(format!("_{}._{}.{}", port, network, domain))
}

fn well_known_port(service: &str) -> Option<u16> {
    match service.to_ascii_lowercase().as_str() {
        "smtp" => Some(25),
        "https" => Some(443),
        "submissions" | "smtps" => Some(465),
        "submission" => Some(587),
        "imaps" => Some(993),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::transport::MockTransport;
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::Duration;
    use trust_dns_resolver::proto::rr::rdata::{A, AAAA, PTR};
    use trust_dns_resolver::proto::rr::{RData, Record};

    const LOCAL: &str = "127.0.0.1";
    const REMOTE: &str = "192.0.2.53";

    fn config(servers: &[&str]) -> ClientConfig {
        ClientConfig::new(
            servers.iter().map(|s| s.parse().unwrap()).collect(),
            53,
            Duration::from_secs(1),
        )
    }

    fn response(query: &Message, code: ResponseCode, ad: bool, answers: Vec<RData>) -> Message {
        let qname = query.queries()[0].name().clone();
        let mut resp = Message::new();
        resp.set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_response_code(code)
            .set_authentic_data(ad);
        resp.add_query(query.queries()[0].clone());
        for rdata in answers {
            resp.add_answer(Record::from_rdata(qname.clone(), 300, rdata));
        }
        resp
    }

    fn a(ip: [u8; 4]) -> RData {
        RData::A(A(Ipv4Addr::from(ip)))
    }

    fn resolver(servers: &[&str], transport: MockTransport) -> ExtResolver {
        ExtResolver::with_transport(config(servers), Arc::new(transport))
    }

    fn transport_error(server: SocketAddr) -> DnsError {
        DnsError::Transport {
            server,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        }
    }

    #[tokio::test]
    async fn test_query_requests_ad_and_edns() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().times(1).returning(|_, query| {
            assert!(query.authentic_data());
            assert!(query.recursion_desired());
            let edns = query.extensions().as_ref().expect("EDNS present");
            assert_eq!(edns.max_payload(), MAX_UDP_PAYLOAD);
            assert!(!edns.dnssec_ok());
            assert_eq!(query.queries()[0].query_type(), RecordType::MX);
            assert_eq!(query.queries()[0].name().to_string(), "example.org.");
            Ok(response(query, ResponseCode::NoError, true, vec![]))
        });

        let resolver = resolver(&[LOCAL], transport);
        resolver
            .lookup_mx(&Context::background(), "example.org")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ad_from_loopback_is_kept() {
        for ad in [true, false] {
            let mut transport = MockTransport::new();
            transport
                .expect_exchange()
                .returning(move |_, q| Ok(response(q, ResponseCode::NoError, ad, vec![a([192, 0, 2, 1])])));

            let lookup = resolver(&[LOCAL], transport)
                .lookup_ip_addr(&Context::background(), "example.org")
                .await
                .unwrap();
            assert_eq!(lookup.authenticated, ad);
        }
    }

    #[tokio::test]
    async fn test_ad_from_remote_is_cleared() {
        let mut transport = MockTransport::new();
        transport
            .expect_exchange()
            .returning(|_, q| Ok(response(q, ResponseCode::NoError, true, vec![a([192, 0, 2, 1])])));

        let lookup = resolver(&[REMOTE], transport)
            .lookup_txt(&Context::background(), "example.org")
            .await
            .unwrap();
        assert!(!lookup.authenticated);
    }

    #[test]
    fn test_mapped_loopback_is_trusted() {
        let mapped = SocketAddr::new(IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped()), 53);
        assert!(is_trusted(mapped));
        assert!(is_trusted(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 53)));
        assert!(!is_trusted("10.0.0.1:53".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_combined_lookup_ands_ad_flags() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().times(2).returning(|_, q| {
            match q.queries()[0].query_type() {
                RecordType::AAAA => Ok(response(
                    q,
                    ResponseCode::NoError,
                    true,
                    vec![RData::AAAA(AAAA(Ipv6Addr::LOCALHOST))],
                )),
                _ => Ok(response(q, ResponseCode::NoError, false, vec![a([192, 0, 2, 7])])),
            }
        });

        let lookup = resolver(&[LOCAL], transport)
            .lookup_ip_addr(&Context::background(), "example.org")
            .await
            .unwrap();

        assert!(!lookup.authenticated);
        assert_eq!(
            lookup.answers,
            vec![
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))
            ]
        );
    }

    #[tokio::test]
    async fn test_combined_lookup_fails_when_a_leg_fails() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().times(2).returning(|_, q| {
            match q.queries()[0].query_type() {
                RecordType::AAAA => Ok(response(
                    q,
                    ResponseCode::NoError,
                    true,
                    vec![RData::AAAA(AAAA(Ipv6Addr::LOCALHOST))],
                )),
                _ => Ok(response(q, ResponseCode::ServFail, false, vec![])),
            }
        });

        let err = resolver(&[LOCAL], transport)
            .lookup_host(&Context::background(), "example.org")
            .await
            .unwrap_err();
        assert!(err.is_temporary());
        assert!(matches!(err, DnsError::Rcode(ref rc) if rc.code == ResponseCode::ServFail));
    }

    #[tokio::test]
    async fn test_failover_to_second_server() {
        let first: SocketAddr = "192.0.2.1:53".parse().unwrap();

        let mut transport = MockTransport::new();
        transport.expect_exchange().times(4).returning(move |server, q| {
            if server == first {
                Err(transport_error(server))
            } else {
                Ok(response(q, ResponseCode::NoError, true, vec![a([192, 0, 2, 9])]))
            }
        });

        let lookup = resolver(&["192.0.2.1", LOCAL], transport)
            .lookup_ip_addr(&Context::background(), "example.org")
            .await
            .unwrap();
        assert!(lookup.authenticated);
        assert_eq!(lookup.answers, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))]);
    }

    #[tokio::test]
    async fn test_rcode_error_moves_to_next_server() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().times(2).returning(|server, q| {
            if server.ip() == "192.0.2.1".parse::<IpAddr>().unwrap() {
                Ok(response(q, ResponseCode::Refused, false, vec![]))
            } else {
                Ok(response(q, ResponseCode::NoError, false, vec![]))
            }
        });

        let lookup = resolver(&["192.0.2.1", "192.0.2.2"], transport)
            .lookup_mx(&Context::background(), "example.org")
            .await
            .unwrap();
        assert!(lookup.answers.is_empty());
    }

    #[tokio::test]
    async fn test_last_error_surfaces() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().times(2).returning(|server, q| {
            if server.ip() == "192.0.2.1".parse::<IpAddr>().unwrap() {
                Ok(response(q, ResponseCode::ServFail, false, vec![]))
            } else {
                Ok(response(q, ResponseCode::NXDomain, false, vec![]))
            }
        });

        let err = resolver(&["192.0.2.1", "192.0.2.2"], transport)
            .lookup_txt(&Context::background(), "missing.example.org")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "dns: rcode NXDOMAIN when looking up missing.example.org."
        );
    }

    #[tokio::test]
    async fn test_no_servers() {
        let transport = MockTransport::new();
        let err = resolver(&[], transport)
            .lookup_mx(&Context::background(), "example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::NoServers));
    }

    #[tokio::test]
    async fn test_malformed_address_is_not_queried() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().never();

        let err = resolver(&[LOCAL], transport)
            .lookup_addr(&Context::background(), "300.1.2.3")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_ptr_lookup() {
        let mut transport = MockTransport::new();
        transport.expect_exchange().returning(|_, q| {
            assert_eq!(q.queries()[0].name().to_string(), "1.2.0.192.in-addr.arpa.");
            Ok(response(
                q,
                ResponseCode::NoError,
                true,
                vec![RData::PTR(PTR(Name::from_ascii("mail.example.org.").unwrap()))],
            ))
        });

        let lookup = resolver(&[LOCAL], transport)
            .lookup_addr(&Context::background(), "192.0.2.1")
            .await
            .unwrap();
        assert!(lookup.authenticated);
        assert_eq!(lookup.answers, vec!["mail.example.org.".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_does_not_fall_through() {
        let ctx = Context::background();
        ctx.cancel();

        let mut transport = MockTransport::new();
        transport.expect_exchange().never();

        let err = resolver(&[LOCAL, REMOTE], transport)
            .lookup_mx(&ctx, "example.org")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DnsError::Context(crate::context::ContextError::Cancelled)
        ));
    }

    #[test]
    fn test_reverse_names() {
        assert_eq!(
            reverse_name("192.0.2.1".parse().unwrap()),
            "1.2.0.192.in-addr.arpa."
        );
        assert_eq!(
            reverse_name("2001:db8::1".parse().unwrap()),
            "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."
        );
    }

    #[test]
    fn test_tlsa_names() {
        assert_eq!(
            tlsa_name("25", "tcp", "mx.example.org").unwrap(),
            "_25._tcp.mx.example.org"
        );
        assert_eq!(
            tlsa_name("smtp", "tcp", "mx.example.org.").unwrap(),
            "_25._tcp.mx.example.org."
        );
        assert!(tlsa_name("gopher-ish", "tcp", "example.org").is_err());
        assert!(tlsa_name("25", "quic", "example.org").is_err());
    }
}
