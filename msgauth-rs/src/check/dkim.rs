//! DKIM verification check
//!
//! Runs the configured [`SignatureVerifier`] over the message and turns its
//! per-signature outcomes into Authentication-Results records plus a verdict.
//! Only the body stage does any work.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, info_span, Instrument, Span};

use super::{AuthResult, Check, CheckResult, CheckState, FailAction, ResultValue, SmtpError};
use crate::config::DkimConfig;
use crate::context::{Context, ContextError};
use crate::dkim::{ErrorClass, SignatureVerifier, Verification};
use crate::error::{AuthError, Result};
use crate::message::{Body, Header, MsgMetadata};

pub const CHECK_NAME: &str = "verify_dkim";

const SIGNATURE_FIELD: &str = "DKIM-Signature";

/// Immutable policy shared by every message
#[derive(Debug)]
struct DkimPolicy {
    debug: bool,
    /// Lowercased
    required_fields: HashSet<String>,
    allow_body_subset: bool,
    fail_open: bool,
    broken_sig_action: FailAction,
    no_sig_action: FailAction,
}

impl DkimPolicy {
    fn from_config(config: &DkimConfig) -> Result<Self> {
        let mut required_fields = HashSet::new();
        for field in &config.required_fields {
            if field.is_empty() || field.contains(':') || field.chars().any(char::is_whitespace) {
                return Err(AuthError::Config(format!(
                    "{}: invalid header field name {:?} in required_fields",
                    CHECK_NAME, field
                )));
            }
            required_fields.insert(field.to_ascii_lowercase());
        }

        Ok(Self {
            debug: config.debug,
            required_fields,
            allow_body_subset: config.allow_body_subset,
            fail_open: config.fail_open,
            broken_sig_action: config.broken_sig_action.clone(),
            no_sig_action: config.no_sig_action.clone(),
        })
    }

    fn covers_required(&self, signed: &[String]) -> bool {
        let signed: HashSet<String> = signed.iter().map(|k| k.to_ascii_lowercase()).collect();
        self.required_fields.iter().all(|field| signed.contains(field))
    }
}

pub struct DkimCheck {
    instance_name: String,
    policy: Arc<DkimPolicy>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl DkimCheck {
    pub fn init(
        instance_name: &str,
        config: &DkimConfig,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self> {
        let policy = DkimPolicy::from_config(config)?;
        debug!(
            "DKIM check {} initialized: required fields {:?}, fail_open={}, broken={}, none={}",
            instance_name,
            config.required_fields,
            policy.fail_open,
            policy.broken_sig_action,
            policy.no_sig_action
        );

        Ok(Self {
            instance_name: instance_name.to_string(),
            policy: Arc::new(policy),
            verifier,
        })
    }
}

impl Check for DkimCheck {
    fn name(&self) -> &str {
        CHECK_NAME
    }

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn check_state_for_msg(&self, msg_meta: MsgMetadata) -> Box<dyn CheckState> {
        let span = info_span!("verify_dkim", msg_id = %msg_meta.id);
        Box::new(DkimCheckState {
            msg_meta,
            policy: Arc::clone(&self.policy),
            verifier: Arc::clone(&self.verifier),
            span,
        })
    }
}

struct DkimCheckState {
    msg_meta: MsgMetadata,
    policy: Arc<DkimPolicy>,
    verifier: Arc<dyn SignatureVerifier>,
    span: Span,
}

#[async_trait]
impl CheckState for DkimCheckState {
    fn name(&self) -> &str {
        CHECK_NAME
    }

    async fn check_connection(&self, _ctx: &Context) -> CheckResult {
        CheckResult::default()
    }

    async fn check_sender(&self, _ctx: &Context, _mail_from: &str) -> CheckResult {
        CheckResult::default()
    }

    async fn check_rcpt(&self, _ctx: &Context, _rcpt_to: &str) -> CheckResult {
        CheckResult::default()
    }

    async fn check_body(&self, ctx: &Context, header: &Header, body: &dyn Body) -> CheckResult {
        self.verify(ctx, header, body)
            .instrument(self.span.clone())
            .await
    }
}

impl DkimCheckState {
    async fn verify(&self, ctx: &Context, header: &Header, body: &dyn Body) -> CheckResult {
        if !header.has(SIGNATURE_FIELD) {
            return self.no_signatures();
        }

        let message = match flatten(ctx.run(read_message(header, body)).await) {
            Ok(message) => message,
            Err(e) => {
                return CheckResult::rejected(SmtpError::internal(CHECK_NAME, "Internal I/O error", e))
            }
        };

        let verify = ctx.run(async { self.verifier.verify(&message).await });
        let verifications = match flatten(verify.await) {
            Ok(verifications) => verifications,
            Err(e) => {
                return CheckResult::rejected(SmtpError::internal(
                    CHECK_NAME,
                    "Internal error during policy check",
                    e,
                ))
            }
        };

        let mut auth_result = Vec::with_capacity(verifications.len());
        let mut good_signature = false;

        for verif in &verifications {
            let record = match self.evaluate(verif) {
                Ok(record) => record,
                Err(rejection) => return rejection,
            };

            if self.policy.debug {
                debug!(
                    "DKIM signature d={} i={}: {} {}",
                    verif.domain, verif.identifier, record.value, record.reason
                );
            }

            good_signature |= record.value == ResultValue::Pass;
            auth_result.push(record);
        }

        if !good_signature {
            return self.broken_signatures(auth_result);
        }

        CheckResult {
            auth_result,
            ..Default::default()
        }
    }

    /// Fold one outcome into a record. `Err` carries the fail-closed deferral.
    fn evaluate(&self, verif: &Verification) -> std::result::Result<AuthResult, CheckResult> {
        let mut record = AuthResult {
            value: ResultValue::Pass,
            reason: String::new(),
            domain: verif.domain.clone(),
            identifier: verif.identifier.clone(),
        };

        let Some(err) = &verif.error else {
            if !self.policy.covers_required(&verif.header_keys) {
                record.value = ResultValue::PermError;
                record.reason = "some header fields are not signed".to_string();
            }
            if verif.body_length.is_some() && !self.policy.allow_body_subset {
                record.value = ResultValue::PermError;
                record.reason = "body limit is used".to_string();
            }
            return Ok(record);
        };

        record.value = ResultValue::Fail;
        record.reason = err
            .message
            .strip_prefix("dkim: ")
            .unwrap_or(&err.message)
            .to_string();

        match err.class {
            ErrorClass::None => {}
            ErrorClass::Permanent => record.value = ResultValue::PermError,
            ErrorClass::Temporary if self.policy.fail_open => record.value = ResultValue::TempError,
            ErrorClass::Temporary => {
                info!(
                    "Temporary DKIM failure for d={}, deferring message: {}",
                    verif.domain, err.message
                );
                return Err(CheckResult::rejected(
                    SmtpError::new(
                        421,
                        [4, 7, 20],
                        "Temporary error during DKIM verification",
                        CHECK_NAME,
                    )
                    .with_err(&err.message),
                ));
            }
        }

        Ok(record)
    }

    fn no_signatures(&self) -> CheckResult {
        let action = &self.policy.no_sig_action;
        if action.is_enforcing() {
            info!("No DKIM signatures (action: {})", action);
        } else if self.policy.debug {
            debug!("No DKIM signatures");
        }

        action.apply(CheckResult {
            reason: Some(SmtpError::new(550, [5, 7, 20], "No DKIM signatures", CHECK_NAME)),
            auth_result: vec![AuthResult::none()],
            ..Default::default()
        })
    }

    fn broken_signatures(&self, auth_result: Vec<AuthResult>) -> CheckResult {
        let action = &self.policy.broken_sig_action;
        if action.is_enforcing() {
            info!(
                "No passing DKIM signatures among {} (action: {}, from: {:?})",
                auth_result.len(),
                action,
                self.msg_meta.smtp_from
            );
        } else if self.policy.debug {
            debug!("No passing DKIM signatures among {}", auth_result.len());
        }

        action.apply(CheckResult {
            reason: Some(SmtpError::new(550, [5, 7, 20], "No passing DKIM signatures", CHECK_NAME)),
            auth_result,
            ..Default::default()
        })
    }
}

/// Fold an aborted context and an operation failure into one error
fn flatten<T, E: fmt::Display>(
    outcome: std::result::Result<std::result::Result<T, E>, ContextError>,
) -> std::result::Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Serialized header block followed by the body, read in one pass
async fn read_message(header: &Header, body: &dyn Body) -> std::io::Result<Vec<u8>> {
    let mut message = Vec::new();
    header.write_to(&mut message);

    let mut reader = body.open().await?;
    reader.read_to_end(&mut message).await?;
    Ok(message)
}
