//! Probe identity value objects.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::Error;

/// Characters that would break the comma-separated registry format.
const FORBIDDEN_CHARS: &[char] = &[',', '"', '\'', '=', '\n', '\r'];

/// A vendor-assigned hardware address.
///
/// Addresses are opaque to the core. They are normalized to upper case so
/// `aa:bb:..` and `AA:BB:..` refer to the same device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeAddress(String);

impl ProbeAddress {
    /// Create a new address, validating and normalizing it.
    pub fn new(address: impl AsRef<str>) -> Result<Self, Error> {
        let address = address.as_ref().trim();

        if address.is_empty() {
            return Err(Error::validation("probe address must not be empty"));
        }
        if address.chars().any(|c| c.is_whitespace() || FORBIDDEN_CHARS.contains(&c)) {
            return Err(Error::validation(format!(
                "probe address contains invalid characters: {:?}",
                address
            )));
        }

        Ok(Self(address.to_ascii_uppercase()))
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four characters of the address, used for fallback names.
    pub fn short_suffix(&self) -> String {
        let compact: Vec<char> = self.0.chars().filter(|c| *c != ':').collect();
        let start = compact.len().saturating_sub(4);
        compact[start..].iter().collect()
    }
}

impl fmt::Display for ProbeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Human-readable probe display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeName(String);

impl ProbeName {
    /// Create a new display name, validating it.
    pub fn new(name: impl AsRef<str>) -> Result<Self, Error> {
        let name = name.as_ref().trim();

        if name.is_empty() {
            return Err(Error::validation("probe name must not be empty"));
        }
        if name.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
            return Err(Error::validation(format!(
                "probe name contains invalid characters: {:?}",
                name
            )));
        }

        Ok(Self(name.to_string()))
    }

    /// Auto-generated name for the n-th probe (`Probe1`, `Probe2`, ...).
    pub fn numbered(n: u32) -> Self {
        Self(format!("Probe{}", n))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label-safe form of the name (`Brisket Left` -> `brisket-left`).
    pub fn slug(&self) -> String {
        slugify(&self.0)
    }
}

impl fmt::Display for ProbeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Identity of a registered probe.
///
/// Ordering and equality cover both fields; a registry never holds two
/// identities with the same address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProbeIdentity {
    pub address: ProbeAddress,
    pub name: ProbeName,
}

impl ProbeIdentity {
    pub fn new(address: ProbeAddress, name: ProbeName) -> Self {
        Self { address, name }
    }
}

impl fmt::Display for ProbeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Lowercase, dash-separated form of `input` containing only ASCII
/// alphanumerics. Accented letters are folded to their base letter
/// (`Brühe` -> `bruhe`).
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.nfkd().filter(|c| !is_combining_mark(*c)) {
        let mut buf = [0u8; 4];
        let piece: &str = match c {
            'ß' => "ss",
            'æ' | 'Æ' => "ae",
            'œ' | 'Œ' => "oe",
            'ø' | 'Ø' => "o",
            'đ' | 'Đ' => "d",
            'ł' | 'Ł' => "l",
            'þ' | 'Þ' => "th",
            _ if c.is_ascii_alphanumeric() => c.to_ascii_lowercase().encode_utf8(&mut buf),
            _ => {
                pending_dash = true;
                continue;
            }
        };

        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.push_str(piece);
    }

    slug
}
