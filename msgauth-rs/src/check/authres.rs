use serde::{Deserialize, Serialize};
use std::fmt;

/// Result value of one DKIM evaluation (RFC 8601 section 2.7.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultValue {
    Pass,
    Fail,
    PermError,
    TempError,
    None,
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Pass => write!(f, "pass"),
            ResultValue::Fail => write!(f, "fail"),
            ResultValue::PermError => write!(f, "permerror"),
            ResultValue::TempError => write!(f, "temperror"),
            ResultValue::None => write!(f, "none"),
        }
    }
}

/// One `dkim=` entry of an Authentication-Results header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub value: ResultValue,
    pub reason: String,
    /// Signing domain (`header.d`)
    pub domain: String,
    /// Agent or user identifier (`header.i`)
    pub identifier: String,
}

impl AuthResult {
    /// Record for a message that carries no signature at all
    pub fn none() -> Self {
        Self {
            value: ResultValue::None,
            reason: String::new(),
            domain: String::new(),
            identifier: String::new(),
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push_str("dkim=");
        out.push_str(&self.value.to_string());
        if !self.reason.is_empty() {
            out.push_str(" reason=");
            out.push_str(&quote(&self.reason));
        }
        if !self.domain.is_empty() {
            out.push_str(" header.d=");
            out.push_str(&quote(&self.domain));
        }
        if !self.identifier.is_empty() {
            out.push_str(" header.i=");
            out.push_str(&quote(&self.identifier));
        }
    }
}

/// Render an Authentication-Results header value
pub fn format_auth_results(authserv_id: &str, results: &[AuthResult]) -> String {
    let mut out = authserv_id.to_string();
    if results.is_empty() {
        out.push_str("; none");
        return out;
    }

    for result in results {
        out.push_str(";\r\n\t");
        result.write_to(&mut out);
    }
    out
}

// RFC 2045 token characters pass through, anything else becomes a quoted-string.
fn quote(value: &str) -> String {
    let is_token = value.bytes().all(|b| {
        b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
    });

    if is_token && !value.is_empty() {
        return value.to_string();
    }

    // '@' and '.' are common in identifiers and legal in the pvalue grammar.
    if value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"@.-_+".contains(&b))
    {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_value_display() {
        assert_eq!(ResultValue::Pass.to_string(), "pass");
        assert_eq!(ResultValue::Fail.to_string(), "fail");
        assert_eq!(ResultValue::PermError.to_string(), "permerror");
        assert_eq!(ResultValue::TempError.to_string(), "temperror");
        assert_eq!(ResultValue::None.to_string(), "none");
    }

    #[test]
    fn test_format_single_none() {
        let header = format_auth_results("mx.example.com", &[AuthResult::none()]);
        assert_eq!(header, "mx.example.com;\r\n\tdkim=none");
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_auth_results("mx.example.com", &[]), "mx.example.com; none");
    }

    #[test]
    fn test_format_multiple_in_order() {
        let results = vec![
            AuthResult {
                value: ResultValue::Pass,
                reason: String::new(),
                domain: "example.org".to_string(),
                identifier: "@example.org".to_string(),
            },
            AuthResult {
                value: ResultValue::PermError,
                reason: "some header fields are not signed".to_string(),
                domain: "lists.example.net".to_string(),
                identifier: "@lists.example.net".to_string(),
            },
        ];

        let header = format_auth_results("mx.example.com", &results);
        assert_eq!(
            header,
            "mx.example.com;\r\n\tdkim=pass header.d=example.org header.i=@example.org;\r\n\t\
             dkim=permerror reason=\"some header fields are not signed\" \
             header.d=lists.example.net header.i=@lists.example.net"
        );
    }

    #[test]
    fn test_serde_lowercase_values() {
        let json = serde_json::to_string(&ResultValue::TempError).unwrap();
        assert_eq!(json, "\"temperror\"");
    }
}
