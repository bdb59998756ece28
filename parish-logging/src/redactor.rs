use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b").unwrap();
}

/// Keys whose values are masked wholesale when a JSON payload is redacted
pub const SENSITIVE_KEYS: &[&str] = &[
    "email",
    "phone",
    "mobile_phone",
    "address",
    "street_address",
    "birth_date",
    "date_of_birth",
];

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub mask_sensitive_keys: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            mask_sensitive_keys: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// PII redactor for log messages and member payloads
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        if self.config.redact_emails {
            result = self.redact_emails(&result);
        }

        if self.config.redact_phones {
            result = self.redact_phones(&result);
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    /// Redact a JSON document, masking sensitive keys and scrubbing every
    /// string value that is kept.
    pub fn redact_json(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_json(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, v)| {
                        let redacted = if self.config.mask_sensitive_keys && is_sensitive_key(key) {
                            self.mask(v)
                        } else {
                            self.redact_json(v)
                        };
                        (key.clone(), redacted)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn mask(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            _ if self.config.hash_for_correlation => {
                Value::String(format!("REDACTED[{}]", self.hash_value(&value.to_string())))
            }
            _ => Value::String("[REDACTED]".to_string()),
        }
    }

    fn redact_emails(&self, text: &str) -> String {
        EMAIL_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                let email = &caps[0];
                if self.config.hash_for_correlation {
                    format!("EMAIL[{}]", self.hash_value(email))
                } else {
                    match email.split_once('@') {
                        Some((local, domain)) => format!(
                            "{}***@{}***",
                            local.chars().next().unwrap_or('*'),
                            domain.chars().next().unwrap_or('*')
                        ),
                        None => "***@***".to_string(),
                    }
                }
            })
            .to_string()
    }

    fn redact_phones(&self, text: &str) -> String {
        PHONE_REGEX
            .replace_all(text, |caps: &regex::Captures| {
                if self.config.hash_for_correlation {
                    format!("PHONE[{}]", self.hash_value(&caps[0]))
                } else {
                    "(***) ***-****".to_string()
                }
            })
            .to_string()
    }

    fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();
        general_purpose::STANDARD_NO_PAD.encode(&digest[..8])
    }
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain() -> PiiRedactor {
        PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_email_redaction() {
        let redacted = plain().redact("Member ana.silva@example.org joined");
        assert!(redacted.contains("a***@e***"));
        assert!(!redacted.contains("ana.silva"));
    }

    #[test]
    fn test_phone_redaction() {
        let redacted = plain().redact("Call the office at (555) 123-4567");
        assert!(redacted.contains("(***) ***-****"));
    }

    #[test]
    fn test_hash_is_stable_for_correlation() {
        let redactor = PiiRedactor::default();
        let first = redactor.redact("ana@example.org");
        let second = redactor.redact("ana@example.org");
        assert_eq!(first, second);
        assert!(first.starts_with("EMAIL["));
    }

    #[test]
    fn test_json_sensitive_keys_masked() {
        let payload = json!({
            "first_name": "Ana",
            "email": "ana@example.org",
            "phone": null,
            "notes": "reach me at ana@example.org",
            "household": [{ "address": "12 Chapel Road" }]
        });

        let redacted = plain().redact_json(&payload);

        assert_eq!(redacted["first_name"], "Ana");
        assert_eq!(redacted["email"], "[REDACTED]");
        assert_eq!(redacted["phone"], Value::Null);
        assert_eq!(redacted["household"][0]["address"], "[REDACTED]");
        assert!(!redacted["notes"].as_str().unwrap_or_default().contains("ana@"));
    }
}
