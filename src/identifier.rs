use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ComplianceError, Result};

/// Kind of contact identifier a checker can be asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Phone,
    Email,
    PostalCode,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Phone => "phone",
            IdentifierKind::Email => "email",
            IdentifierKind::PostalCode => "postal_code",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IdentifierKind {
    type Err = ComplianceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "phone" => Ok(IdentifierKind::Phone),
            "email" => Ok(IdentifierKind::Email),
            "postal_code" => Ok(IdentifierKind::PostalCode),
            other => Err(ComplianceError::Validation(format!("unknown identifier kind '{}'", other))),
        }
    }
}

/// A normalized contact identifier.
///
/// Values are normalized exactly once, at construction, and are immutable
/// afterwards. Every constructor is idempotent: feeding a normalized value
/// back in yields the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    kind: IdentifierKind,
    value: String,
}

const PHONE_PUNCTUATION: &[char] = &[' ', '+', '-', '(', ')', '.'];

impl Identifier {
    /// Detect the identifier kind from raw input and normalize it
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ComplianceError::Validation("identifier is empty".to_string()));
        }

        if trimmed.contains('@') {
            return Self::email(trimmed);
        }

        let looks_like_phone = trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || PHONE_PUNCTUATION.contains(&c));
        let digit_count = trimmed.chars().filter(|c| c.is_ascii_digit()).count();

        if looks_like_phone && digit_count >= 10 {
            Self::phone(trimmed)
        } else {
            Self::postal_code(trimmed)
        }
    }

    pub fn phone(raw: &str) -> Result<Self> {
        let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        // NANP numbers are stored without their country prefix
        if digits.len() == 11 && digits.starts_with('1') {
            digits.remove(0);
        }

        if !(10..=15).contains(&digits.len()) {
            return Err(ComplianceError::Validation(format!(
                "phone number '{}' must contain 10-15 digits",
                raw.trim()
            )));
        }

        Ok(Self { kind: IdentifierKind::Phone, value: digits })
    }

    pub fn email(raw: &str) -> Result<Self> {
        let value = raw.trim().to_lowercase();

        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        };

        if !valid {
            return Err(ComplianceError::Validation(format!("'{}' is not a valid email address", raw.trim())));
        }

        Ok(Self { kind: IdentifierKind::Email, value })
    }

    pub fn postal_code(raw: &str) -> Result<Self> {
        let value = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();

        let valid = (3..=10).contains(&value.len())
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
            && value.chars().any(|c| c.is_ascii_digit());

        if !valid {
            return Err(ComplianceError::Validation(format!("'{}' is not a valid postal code", raw.trim())));
        }

        Ok(Self { kind: IdentifierKind::PostalCode, value })
    }

    /// Rebuild an identifier from its stored kind and value
    pub fn from_parts(kind: IdentifierKind, value: &str) -> Result<Self> {
        match kind {
            IdentifierKind::Phone => Self::phone(value),
            IdentifierKind::Email => Self::email(value),
            IdentifierKind::PostalCode => Self::postal_code(value),
        }
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// E.164 rendering for phones; other kinds return their normalized value
    pub fn e164(&self) -> String {
        match self.kind {
            IdentifierKind::Phone if self.value.len() == 10 => format!("+1{}", self.value),
            IdentifierKind::Phone => format!("+{}", self.value),
            _ => self.value.clone(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
