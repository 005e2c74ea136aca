use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;
use trust_dns_resolver::system_conf::read_system_conf;

use crate::error::{AuthError, Result};

/// Value of the `override` setting meaning "use whatever the system uses"
pub const SYSTEM_DEFAULT: &str = "system-default";

const DEFAULT_PORT: u16 = 53;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// `[dns]` section of the configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Single `host:port` resolver replacing the system list
    #[serde(default, rename = "override")]
    pub server_override: Option<String>,
    /// Per-query timeout in seconds; system setting when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Servers queried by the resolver, in fail-over order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub servers: Vec<IpAddr>,
    pub port: u16,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(servers: Vec<IpAddr>, port: u16, timeout: Duration) -> Self {
        Self {
            servers,
            port,
            timeout,
        }
    }

    /// Build from the `[dns]` section, falling back to the system resolver configuration
    pub fn from_config(config: &DnsConfig) -> Result<Self> {
        let mut client = match config.server_override.as_deref() {
            Some(server) if server != SYSTEM_DEFAULT => Self::from_override(server)?,
            _ => Self::from_system()?,
        };

        if let Some(secs) = config.timeout_secs {
            client.timeout = Duration::from_secs(secs);
        }

        Ok(client)
    }

    /// Read the servers and timeout the host is configured with (resolv.conf)
    pub fn from_system() -> Result<Self> {
        let (resolver_config, opts) = read_system_conf()
            .map_err(|e| AuthError::Config(format!("cannot read system DNS configuration: {}", e)))?;

        let addrs: Vec<SocketAddr> = resolver_config
            .name_servers()
            .iter()
            .map(|ns| ns.socket_addr)
            .collect();

        let client = Self::from_socket_addrs(&addrs, opts.timeout);
        if client.servers.is_empty() {
            return Err(AuthError::Config(
                "system DNS configuration lists no name servers".to_string(),
            ));
        }

        debug!("Using system resolvers {:?}", client.servers);
        Ok(client)
    }

    /// Single server given as `host:port` (IPv6 hosts in brackets)
    pub fn from_override(server: &str) -> Result<Self> {
        let addr: SocketAddr = server.parse().map_err(|_| {
            AuthError::Config(format!(
                "invalid DNS server override {:?}, expected ip:port",
                server
            ))
        })?;

        Ok(Self::new(vec![addr.ip()], addr.port(), DEFAULT_TIMEOUT))
    }

    // The system configuration lists each server once per protocol; keep the
    // first occurrence so fail-over order is preserved.
    fn from_socket_addrs(addrs: &[SocketAddr], timeout: Duration) -> Self {
        let mut servers: Vec<IpAddr> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if !servers.contains(&addr.ip()) {
                servers.push(addr.ip());
            }
        }

        let port = addrs.first().map(|a| a.port()).unwrap_or(DEFAULT_PORT);
        Self::new(servers, port, timeout)
    }

    /// Socket addresses in fail-over order
    pub fn server_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.servers
            .iter()
            .map(move |ip| SocketAddr::new(*ip, self.port))
    }
}
