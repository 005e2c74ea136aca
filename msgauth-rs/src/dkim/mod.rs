//! DKIM signature verification
//!
//! [`SignatureVerifier`] is the seam the check talks to; [`MailAuthVerifier`]
//! is the production backend built on the `mail-auth` crate.

pub mod verifier;

pub use verifier::{
    ErrorClass, MailAuthVerifier, SignatureError, SignatureVerifier, Verification, VerifierError,
};
