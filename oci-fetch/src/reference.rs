//! Artifact references and content digests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Result type for reference parsing.
pub type ReferenceResult<T> = Result<T, ReferenceError>;

/// Errors raised while parsing references and digests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The reference was empty or structurally malformed
    #[error("malformed reference: {0:?}")]
    Malformed(String),

    /// The repository component was empty or contained invalid segments
    #[error("invalid repository name: {0:?}")]
    InvalidRepository(String),

    /// The digest did not have a valid `algorithm:hex` shape
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// The operation requires a digest-qualified reference
    #[error("reference is not digest-qualified: {0:?}")]
    MissingDigest(String),
}

/// A content digest in `algorithm:hex` form.
///
/// Digests are the cache key for blobs: two digests that compare equal
/// denote identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Hash algorithm identifier, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Lowercase hex-encoded hash value.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The digest of the given bytes under `sha256`.
    pub fn sha256(data: &[u8]) -> Self {
        use sha2::Digest as _;
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(sha2::Sha256::digest(data)),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = ReferenceError;

    fn from_str(s: &str) -> ReferenceResult<Self> {
        let Some((algorithm, hex)) = s.split_once(':') else {
            return Err(ReferenceError::InvalidDigest(s.to_string()));
        };

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ReferenceError::InvalidDigest(s.to_string()));
        }

        if hex.is_empty()
            || !hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(ReferenceError::InvalidDigest(s.to_string()));
        }

        // sha256 values must be exactly 32 bytes of hex
        if algorithm == "sha256" && hex.len() != 64 {
            return Err(ReferenceError::InvalidDigest(s.to_string()));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = ReferenceError;

    fn try_from(value: String) -> ReferenceResult<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// A locator for a remote artifact: a repository plus a tag, a digest,
/// or both.
///
/// Tag-qualified references are mutable and never content-addressed;
/// digest-qualified references are immutable. A reference with neither
/// defaults to the `latest` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    /// Repository component, including any registry host prefix.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag component, if present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Digest component, if the reference is digest-qualified.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Convert into a [`DigestReference`], failing for tag-only references.
    pub fn into_digest(self) -> ReferenceResult<DigestReference> {
        let repr = self.to_string();
        match self.digest {
            Some(digest) => Ok(DigestReference {
                repository: self.repository,
                digest,
            }),
            None => Err(ReferenceError::MissingDigest(repr)),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> ReferenceResult<Self> {
        if s.is_empty() || s.chars().any(|c| c.is_ascii_whitespace()) {
            return Err(ReferenceError::Malformed(s.to_string()));
        }

        let (base, digest) = match s.split_once('@') {
            Some((base, digest)) => (base, Some(digest.parse()?)),
            None => (s, None),
        };

        // The tag separator is a ':' after the last '/', so a registry
        // port (localhost:5000/repo) is never mistaken for a tag.
        let name_start = base.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match base[name_start..].split_once(':') {
            Some((name, tag)) => {
                if tag.is_empty() {
                    return Err(ReferenceError::Malformed(s.to_string()));
                }
                (
                    format!("{}{}", &base[..name_start], name),
                    Some(tag.to_string()),
                )
            }
            None => (base.to_string(), None),
        };

        validate_repository(&repository)?;

        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            repository,
            tag,
            digest,
        })
    }
}

/// A reference statically known to be digest-qualified, and therefore
/// content-addressed and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DigestReference {
    repository: String,
    digest: Digest,
}

impl DigestReference {
    /// Build a digest reference from its parts.
    pub fn new(repository: impl Into<String>, digest: Digest) -> Self {
        Self {
            repository: repository.into(),
            digest,
        }
    }

    /// Repository component, including any registry host prefix.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Content digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Display for DigestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}

impl FromStr for DigestReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> ReferenceResult<Self> {
        s.parse::<Reference>()?.into_digest()
    }
}

impl From<DigestReference> for Reference {
    fn from(value: DigestReference) -> Self {
        Reference {
            repository: value.repository,
            tag: None,
            digest: Some(value.digest),
        }
    }
}

fn validate_repository(repository: &str) -> ReferenceResult<()> {
    if repository.is_empty()
        || repository.contains("..")
        || repository.starts_with('/')
        || repository.ends_with('/')
    {
        return Err(ReferenceError::InvalidRepository(repository.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "4bbf56a3a9231f752d3b9c174637975f0f83ed2b15e65799837c571e4ef3374b";

    #[test]
    fn parse_tag_reference() {
        let reference: Reference = "registry.local/spam:latest".parse().unwrap();
        assert_eq!(reference.repository(), "registry.local/spam");
        assert_eq!(reference.tag(), Some("latest"));
        assert!(reference.digest().is_none());
    }

    #[test]
    fn parse_digest_reference() {
        let reference: Reference = format!("registry.local/spam@sha256:{HEX}")
            .parse()
            .unwrap();
        assert_eq!(reference.repository(), "registry.local/spam");
        assert!(reference.tag().is_none());
        assert_eq!(reference.digest().unwrap().hex(), HEX);
    }

    #[test]
    fn parse_defaults_to_latest() {
        let reference: Reference = "registry.local/spam".parse().unwrap();
        assert_eq!(reference.tag(), Some("latest"));
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let reference: Reference = "localhost:5000/namespace/repo:v1".parse().unwrap();
        assert_eq!(reference.repository(), "localhost:5000/namespace/repo");
        assert_eq!(reference.tag(), Some("v1"));
    }

    #[test]
    fn reject_short_sha256() {
        let err = "registry.local/spam@sha256:4e388ab"
            .parse::<Reference>()
            .unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidDigest(_)));
    }

    #[test]
    fn reject_uppercase_hex() {
        let upper = HEX.to_uppercase();
        assert!(
            format!("registry.local/spam@sha256:{upper}")
                .parse::<Reference>()
                .is_err()
        );
    }

    #[test]
    fn tag_reference_is_not_a_digest_reference() {
        let err = "registry.local/spam:latest"
            .parse::<DigestReference>()
            .unwrap_err();
        assert!(matches!(err, ReferenceError::MissingDigest(_)));
    }

    #[test]
    fn digest_reference_display_round_trips() {
        let raw = format!("registry.local/spam@sha256:{HEX}");
        let reference: DigestReference = raw.parse().unwrap();
        assert_eq!(reference.to_string(), raw);
    }

    #[test]
    fn sha256_matches_known_value() {
        // sha256 of the empty string
        assert_eq!(
            Digest::sha256(b"").hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn reject_malformed_repositories() {
        for raw in ["", "/spam", "spam/", "a/../b", "spam :latest"] {
            assert!(raw.parse::<Reference>().is_err(), "accepted {raw:?}");
        }
    }
}
