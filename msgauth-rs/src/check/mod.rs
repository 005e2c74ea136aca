//! Staged message checks and their verdicts
//!
//! The pipeline creates one [`CheckState`] per message and calls its stages
//! in SMTP order. Each stage returns a [`CheckResult`]; policy outcomes are
//! folded into that value, never returned as `Err`.
//!
//! - [`action`]: ignore / reject / quarantine policy values
//! - [`authres`]: Authentication-Results records
//! - [`dkim`]: DKIM signature verification check

pub mod action;
pub mod authres;
pub mod dkim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::Context;
use crate::message::{Body, Header, MsgMetadata};

pub use action::FailAction;
pub use authres::{AuthResult, ResultValue};

/// RFC 3463 enhanced status code, e.g. `5.7.20`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedCode(pub [u8; 3]);

impl fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [class, subject, detail] = self.0;
        write!(f, "{}.{}.{}", class, subject, detail)
    }
}

impl std::str::FromStr for EnhancedCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("invalid enhanced status code {:?}", s));
        }

        let mut code = [0u8; 3];
        for (slot, part) in code.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid enhanced status code {:?}", s))?;
        }

        if !matches!(code[0], 2 | 4 | 5) {
            return Err(format!("invalid enhanced status code class in {:?}", s));
        }
        Ok(EnhancedCode(code))
    }
}

/// Reason attached to a verdict, ready to be sent to the remote peer
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code} {enhanced_code} {message}")]
pub struct SmtpError {
    pub code: u16,
    pub enhanced_code: EnhancedCode,
    pub message: String,
    /// Check that produced the verdict
    pub check_name: String,
    /// Underlying failure, for logs only
    pub err: Option<String>,
}

impl SmtpError {
    pub fn new(code: u16, enhanced_code: [u8; 3], message: impl Into<String>, check_name: &str) -> Self {
        Self {
            code,
            enhanced_code: EnhancedCode(enhanced_code),
            message: message.into(),
            check_name: check_name.to_string(),
            err: None,
        }
    }

    /// Local failure unrelated to the message itself; the client should retry
    pub fn internal(check_name: &str, message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(451, [4, 0, 0], message, check_name).with_err(err)
    }

    pub fn with_err(mut self, err: impl fmt::Display) -> Self {
        self.err = Some(err.to_string());
        self
    }

    pub fn is_temporary(&self) -> bool {
        self.code / 100 == 4
    }
}

/// Verdict of one check stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub reject: bool,
    pub quarantine: bool,
    pub reason: Option<SmtpError>,
    pub auth_result: Vec<AuthResult>,
}

impl CheckResult {
    /// Immediate rejection with `reason`, no authentication results
    pub fn rejected(reason: SmtpError) -> Self {
        Self {
            reject: true,
            reason: Some(reason),
            ..Default::default()
        }
    }
}

/// Check module: configuration shared by all messages
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    fn instance_name(&self) -> &str;

    fn check_state_for_msg(&self, msg_meta: MsgMetadata) -> Box<dyn CheckState>;
}

/// Per-message check state, dropped once the message is processed
#[async_trait]
pub trait CheckState: Send + Sync {
    fn name(&self) -> &str;

    async fn check_connection(&self, ctx: &Context) -> CheckResult;

    async fn check_sender(&self, ctx: &Context, mail_from: &str) -> CheckResult;

    async fn check_rcpt(&self, ctx: &Context, rcpt_to: &str) -> CheckResult;

    async fn check_body(&self, ctx: &Context, header: &Header, body: &dyn Body) -> CheckResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhanced_code_parse_and_display() {
        let code: EnhancedCode = "5.7.20".parse().unwrap();
        assert_eq!(code, EnhancedCode([5, 7, 20]));
        assert_eq!(code.to_string(), "5.7.20");

        assert!("5.7".parse::<EnhancedCode>().is_err());
        assert!("3.1.1".parse::<EnhancedCode>().is_err());
        assert!("5.x.1".parse::<EnhancedCode>().is_err());
    }

    #[test]
    fn test_smtp_error_display_and_class() {
        let err = SmtpError::new(550, [5, 7, 20], "No DKIM signatures", "verify_dkim");
        assert_eq!(err.to_string(), "550 5.7.20 No DKIM signatures");
        assert!(!err.is_temporary());

        let err = SmtpError::internal("verify_dkim", "Internal I/O error", "disk gone");
        assert!(err.is_temporary());
        assert_eq!(err.err.as_deref(), Some("disk gone"));
        assert_eq!(err.enhanced_code, EnhancedCode([4, 0, 0]));
    }

    #[test]
    fn test_rejected_result() {
        let res = CheckResult::rejected(SmtpError::new(421, [4, 7, 20], "later", "x"));
        assert!(res.reject);
        assert!(!res.quarantine);
        assert!(res.auth_result.is_empty());
    }
}
