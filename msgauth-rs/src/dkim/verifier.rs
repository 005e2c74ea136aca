//! Signature verification backend
//!
//! [`SignatureVerifier`] is the seam between policy and cryptography: it
//! takes the message exactly as received and reports one [`Verification`]
//! per DKIM-Signature field, in the order the fields appear.

use async_trait::async_trait;
use mail_auth::{AuthenticatedMessage, DkimOutput, DkimResult, Resolver};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::error::{AuthError, Result};

/// The verifier itself could not do its job; says nothing about the signatures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error("message could not be parsed for DKIM verification")]
    Parse,
}

/// How a failed signature should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Signature checked and did not verify
    None,
    /// Signature or key is unusable; retrying will not help
    Permanent,
    /// Verification could not complete (e.g. key lookup failed)
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureError {
    pub class: ErrorClass,
    pub message: String,
}

impl SignatureError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Outcome for one DKIM-Signature field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub domain: String,
    pub identifier: String,
    /// Header field names covered by the signature
    pub header_keys: Vec<String>,
    /// Set when only a prefix of the body is signed
    pub body_length: Option<u64>,
    pub error: Option<SignatureError>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify every signature in `message` (header block, blank line, body)
    async fn verify(&self, message: &[u8]) -> std::result::Result<Vec<Verification>, VerifierError>;
}

/// Verifier backed by the `mail-auth` crate, looking keys up through its own resolver
pub struct MailAuthVerifier {
    resolver: Arc<Resolver>,
}

impl MailAuthVerifier {
    /// Use the system DNS configuration for key lookups
    pub fn new() -> Result<Self> {
        let resolver = Resolver::new_system_conf().map_err(|e| {
            AuthError::Config(format!("cannot create DKIM key resolver: {}", e))
        })?;
        Ok(Self::with_resolver(resolver))
    }

    pub fn with_resolver(resolver: Resolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

#[async_trait]
impl SignatureVerifier for MailAuthVerifier {
    async fn verify(&self, message: &[u8]) -> std::result::Result<Vec<Verification>, VerifierError> {
        // Non-strict parsing keeps l= signatures; the body-limit policy is applied by the check.
        let parsed =
            AuthenticatedMessage::parse_with_opts(message, false).ok_or(VerifierError::Parse)?;
        let outputs = self.resolver.verify_dkim(&parsed).await;
        debug!("DKIM verification returned {} results", outputs.len());

        Ok(outputs.iter().map(verification).collect())
    }
}

fn verification(output: &DkimOutput<'_>) -> Verification {
    let error = classify(output.result());

    let Some(signature) = output.signature() else {
        // Field could not be parsed into a signature at all.
        let message = error
            .map(|e| e.message)
            .unwrap_or_else(|| "malformed DKIM-Signature field".to_string());
        return Verification {
            domain: String::new(),
            identifier: String::new(),
            header_keys: Vec::new(),
            body_length: None,
            error: Some(SignatureError::new(ErrorClass::Permanent, message)),
        };
    };

    let identifier = if signature.i.is_empty() {
        format!("@{}", signature.d)
    } else {
        signature.i.clone()
    };

    Verification {
        domain: signature.d.clone(),
        identifier,
        header_keys: signature.h.clone(),
        body_length: (signature.l > 0).then_some(signature.l),
        error,
    }
}

fn classify(result: &DkimResult) -> Option<SignatureError> {
    match result {
        DkimResult::Pass => None,
        DkimResult::Fail(err) | DkimResult::Neutral(err) => {
            Some(SignatureError::new(ErrorClass::None, err.to_string()))
        }
        DkimResult::PermError(err) => Some(SignatureError::new(ErrorClass::Permanent, err.to_string())),
        DkimResult::TempError(err) => Some(SignatureError::new(ErrorClass::Temporary, err.to_string())),
        DkimResult::None => Some(SignatureError::new(ErrorClass::None, "signature not evaluated")),
    }
}
