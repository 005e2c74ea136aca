//! Single request/response exchange with one DNS server

use async_trait::async_trait;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use trust_dns_resolver::proto::error::{ProtoError, ProtoErrorKind};
use trust_dns_resolver::proto::iocompat::AsyncIoTokioAsStd;
use trust_dns_resolver::proto::op::{Message, NoopMessageFinalizer};
use trust_dns_resolver::proto::tcp::TcpClientStream;
use trust_dns_resolver::proto::xfer::{
    DnsExchange, DnsHandle, DnsMultiplexer, DnsRequest, DnsRequestOptions, FirstAnswer,
};
use trust_dns_resolver::proto::TokioTime;

use super::error::DnsError;

/// Largest response accepted over UDP; matches the advertised EDNS payload size
pub const MAX_UDP_PAYLOAD: u16 = 4096;

/// Sends one query to one server and returns its response
///
/// Implementations report every failure to reach or understand the server as
/// a transport-level [`DnsError`]; RCODE interpretation is left to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, server: SocketAddr, query: &Message) -> Result<Message, DnsError>;
}

/// Plain DNS over UDP, retried over TCP when the answer is truncated
///
/// Datagrams whose ID or question section do not match the query are
/// discarded and the exchange keeps waiting until the timeout. The TCP leg
/// runs on the proto multiplexer.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    timeout: Duration,
}

impl UdpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange_udp(&self, query: &Message, server: SocketAddr) -> Result<Message, ProtoError> {
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        socket.send(&query.to_vec()?).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD as usize];
        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(read) => read?,
                Err(_) => return Err(ProtoErrorKind::Timeout.into()),
            };

            match Message::from_vec(&buf[..len]) {
                Ok(resp) if answers(query, &resp) => return Ok(resp),
                Ok(resp) => warn!(
                    "Dropped response id {} from {}: does not match query id {}",
                    resp.id(),
                    server,
                    query.id()
                ),
                Err(e) => warn!("Dropped malformed response from {}: {}", server, e),
            }
        }
    }

    async fn exchange_tcp(&self, query: &Message, server: SocketAddr) -> Result<Message, ProtoError> {
        let (connect, handle) =
            TcpClientStream::<AsyncIoTokioAsStd<TcpStream>>::with_timeout(server, self.timeout);
        let multiplexer = DnsMultiplexer::with_timeout(
            connect,
            handle,
            self.timeout,
            None::<Arc<NoopMessageFinalizer>>,
        );
        let (mut exchange, background) = DnsExchange::connect::<_, _, TokioTime>(multiplexer).await?;

        let background = tokio::spawn(background);
        let response = exchange.send(request(query)).first_answer().await;
        background.abort();

        Ok(Message::from(response?))
    }
}

/// A response belongs to a query when the ID and the question section agree
fn answers(query: &Message, resp: &Message) -> bool {
    resp.id() == query.id() && resp.queries() == query.queries()
}

fn request(query: &Message) -> DnsRequest {
    DnsRequest::new(query.clone(), DnsRequestOptions::default())
}

fn transport_error(server: SocketAddr, err: ProtoError) -> DnsError {
    match err.kind() {
        ProtoErrorKind::Io(_) | ProtoErrorKind::Timeout => DnsError::Transport {
            server,
            source: err.into(),
        },
        _ => DnsError::Protocol {
            server,
            reason: err.to_string(),
        },
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn exchange(&self, server: SocketAddr, query: &Message) -> Result<Message, DnsError> {
        let resp = self
            .exchange_udp(query, server)
            .await
            .map_err(|e| transport_error(server, e))?;

        if !resp.truncated() {
            return Ok(resp);
        }

        debug!("Truncated UDP response from {}, retrying over TCP", server);
        self.exchange_tcp(query, server)
            .await
            .map_err(|e| transport_error(server, e))
    }
}
