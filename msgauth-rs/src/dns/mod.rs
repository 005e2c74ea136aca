//! Authenticated DNS resolution
//!
//! - [`resolver`]: PTR, A/AAAA, MX, TXT and TLSA lookups reporting the AD flag
//! - [`transport`]: one query/response exchange with one server
//! - [`records`]: typed projection of answer sections
//! - [`config`]: server list, port and timeout
//! - [`error`]: RCODE, transport and parse errors

pub mod config;
pub mod error;
pub mod records;
pub mod resolver;
pub mod transport;

pub use config::{ClientConfig, DnsConfig};
pub use error::{DnsError, RcodeError};
pub use records::{Mx, Tlsa};
pub use resolver::{AuthLookup, ExtResolver};
pub use transport::{Transport, UdpTransport};
