use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{CheckResult, EnhancedCode, SmtpError};

/// What to do with a message when a check is not satisfied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailAction {
    /// Keep the result for Authentication-Results only
    Ignore,
    /// Accept but flag the message
    Quarantine,
    /// Refuse the message, optionally with a custom reply
    #[default]
    Reject,
    RejectWith(ReasonOverride),
}

/// Replacement reply used by `reject <code> <enhanced code> <message>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonOverride {
    pub code: u16,
    pub enhanced_code: EnhancedCode,
    pub message: String,
}

impl FailAction {
    pub fn is_reject(&self) -> bool {
        matches!(self, FailAction::Reject | FailAction::RejectWith(_))
    }

    pub fn is_quarantine(&self) -> bool {
        matches!(self, FailAction::Quarantine)
    }

    /// Whether applying this action changes delivery, which warrants a visible log line
    pub fn is_enforcing(&self) -> bool {
        self.is_reject() || self.is_quarantine()
    }

    /// Apply the action to a failed check.
    ///
    /// A result without a reason did not fail and is returned unchanged.
    /// Flags are only ever raised, never cleared.
    pub fn apply(&self, mut result: CheckResult) -> CheckResult {
        let Some(reason) = result.reason.take() else {
            return result;
        };

        let reason = match self {
            FailAction::RejectWith(over) => SmtpError {
                code: over.code,
                enhanced_code: over.enhanced_code,
                message: over.message.clone(),
                check_name: reason.check_name,
                err: reason.err,
            },
            _ => reason,
        };

        result.reason = Some(reason);
        result.reject |= self.is_reject();
        result.quarantine |= self.is_quarantine();
        result
    }
}

impl FromStr for FailAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let action = words.next().unwrap_or_default().to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();

        match (action.as_str(), rest.as_slice()) {
            ("ignore", []) => Ok(FailAction::Ignore),
            ("quarantine", []) => Ok(FailAction::Quarantine),
            ("reject", []) => Ok(FailAction::Reject),
            ("reject", [code, enhanced, message @ ..]) if !message.is_empty() => {
                let code: u16 = code
                    .parse()
                    .ok()
                    .filter(|c| (400..600).contains(c))
                    .ok_or_else(|| format!("invalid SMTP code {:?}", code))?;
                let enhanced_code: EnhancedCode = enhanced.parse()?;
                if u16::from(enhanced_code.0[0]) != code / 100 {
                    return Err(format!(
                        "enhanced code {} does not match SMTP code {}",
                        enhanced_code, code
                    ));
                }

                Ok(FailAction::RejectWith(ReasonOverride {
                    code,
                    enhanced_code,
                    message: message.join(" ").trim_matches('"').to_string(),
                }))
            }
            _ => Err(format!(
                "invalid action {:?}, expected ignore, quarantine, reject or reject <code> <enhanced code> <message>",
                s
            )),
        }
    }
}

impl TryFrom<String> for FailAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FailAction> for String {
    fn from(action: FailAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for FailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailAction::Ignore => write!(f, "ignore"),
            FailAction::Quarantine => write!(f, "quarantine"),
            FailAction::Reject => write!(f, "reject"),
            FailAction::RejectWith(over) => write!(
                f,
                "reject {} {} {}",
                over.code, over.enhanced_code, over.message
            ),
        }
    }
}
