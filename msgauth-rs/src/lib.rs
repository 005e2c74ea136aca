//! msgauth-rs: DNSSEC-aware lookups and DKIM policy checks for mail servers
//!
//! Two building blocks a mail pipeline uses to authenticate inbound mail:
//!
//! - **Authenticated DNS**: lookups that report whether the answer was
//!   DNSSEC-validated. The AD flag is only believed when it comes from a
//!   loopback resolver, the one hop that cannot be tampered with in transit.
//! - **DKIM check**: verifies every DKIM signature of a message, applies the
//!   local policy (required signed fields, body limits, fail-open) and returns
//!   a verdict plus Authentication-Results records.
//!
//! # Example
//!
//! ```no_run
//! use msgauth_rs::check::dkim::DkimCheck;
//! use msgauth_rs::check::Check;
//! use msgauth_rs::config::Config;
//! use msgauth_rs::context::Context;
//! use msgauth_rs::dkim::MailAuthVerifier;
//! use msgauth_rs::message::{split_message, MsgMetadata};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let verifier = Arc::new(MailAuthVerifier::new()?);
//!     let check = DkimCheck::init("verify_dkim", &config.dkim, verifier)?;
//!
//!     let raw = std::fs::read("message.eml")?;
//!     let (header, body) = split_message(&raw);
//!     let state = check.check_state_for_msg(MsgMetadata::new("1"));
//!     let result = state.check_body(&Context::background(), &header, &body).await;
//!     println!("reject: {}", result.reject);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`check`]: staged checks, verdicts and fail actions
//! - [`dkim`]: signature verification backend
//! - [`dns`]: authenticated resolver
//! - [`message`]: header block and body sources
//! - [`context`]: cancellation and deadlines
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling

pub mod check;
pub mod config;
pub mod context;
pub mod dkim;
pub mod dns;
pub mod error;
pub mod logging;
pub mod message;

// Re-export commonly used types
pub use config::Config;
pub use context::Context;
pub use error::{AuthError, Result};
