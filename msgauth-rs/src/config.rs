use crate::check::FailAction;
use crate::dns::DnsConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub dkim: DkimConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[dkim]` section: policy applied to verification outcomes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DkimConfig {
    pub debug: bool,
    /// Header fields every passing signature must cover
    pub required_fields: Vec<String>,
    /// Accept signatures that only cover a prefix of the body (`l=`)
    pub allow_body_subset: bool,
    /// Record temporary verification failures instead of deferring the message
    pub fail_open: bool,
    pub broken_sig_action: FailAction,
    pub no_sig_action: FailAction,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            debug: false,
            required_fields: vec!["From".to_string(), "Subject".to_string()],
            allow_body_subset: false,
            fail_open: false,
            broken_sig_action: FailAction::Reject,
            no_sig_action: FailAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "pretty" or "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        toml::from_str(&content)
            .map_err(|e| crate::error::AuthError::Config(e.to_string()))
    }
}
