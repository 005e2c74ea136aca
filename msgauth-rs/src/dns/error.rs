use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use trust_dns_resolver::proto::op::ResponseCode;

use crate::context::ContextError;

/// Server answered, but with a non-success RCODE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcodeError {
    pub name: String,
    pub code: ResponseCode,
}

impl RcodeError {
    pub fn new(name: impl Into<String>, code: ResponseCode) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }

    /// Only SERVFAIL is worth retrying later
    pub fn is_temporary(&self) -> bool {
        self.code == ResponseCode::ServFail
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ResponseCode::NXDomain
    }
}

impl fmt::Display for RcodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.code {
            ResponseCode::FormErr => "FORMERR",
            ResponseCode::ServFail => "SERVFAIL",
            ResponseCode::NXDomain => "NXDOMAIN",
            ResponseCode::NotImp => "NOTIMP",
            ResponseCode::Refused => "REFUSED",
            other => {
                return write!(
                    f,
                    "dns: non-success rcode: {} when looking up {}",
                    u16::from(other),
                    self.name
                )
            }
        };
        write!(f, "dns: rcode {} when looking up {}", label, self.name)
    }
}

impl std::error::Error for RcodeError {}

#[derive(Error, Debug)]
pub enum DnsError {
    /// Lookup subject could not be turned into a query; nothing was sent
    #[error("dns: invalid lookup subject {subject:?}: {reason}")]
    Parse { subject: String, reason: String },

    #[error(transparent)]
    Rcode(#[from] RcodeError),

    #[error("dns: exchange with {server} failed: {source}")]
    Transport {
        server: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("dns: malformed response from {server}: {reason}")]
    Protocol { server: SocketAddr, reason: String },

    #[error("dns: no servers configured")]
    NoServers,

    #[error("dns: {0}")]
    Context(#[from] ContextError),
}

impl DnsError {
    pub(crate) fn parse(subject: impl Into<String>, reason: impl fmt::Display) -> Self {
        DnsError::Parse {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    /// The name definitively does not exist (NXDOMAIN)
    pub fn is_not_found(&self) -> bool {
        matches!(self, DnsError::Rcode(err) if err.is_not_found())
    }

    /// A later retry of the same lookup may succeed
    pub fn is_temporary(&self) -> bool {
        match self {
            DnsError::Rcode(err) => err.is_temporary(),
            DnsError::Transport { .. } | DnsError::Protocol { .. } => true,
            DnsError::Context(ContextError::DeadlineExceeded) => true,
            DnsError::Context(ContextError::Cancelled) => false,
            DnsError::Parse { .. } | DnsError::NoServers => false,
        }
    }

    /// Failure talking to one particular server; the next one may do better
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, DnsError::Transport { .. } | DnsError::Protocol { .. })
    }
}
