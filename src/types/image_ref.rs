// ABOUTME: Container image references as deployed to workloads and pinned for rollbacks.
// ABOUTME: Splits host, repository path, tag, and digest; an unversioned image means `latest`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest tag Docker accepts.
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character {0:?} in image reference")]
    InvalidChar(char),

    #[error("malformed image reference {input}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Version {
    Tag(String),
    Digest(String),
    Both { tag: String, digest: String },
}

/// `[host/]path[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    host: Option<String>,
    path: String,
    version: Version,
}

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '-' | '_' | '@')
}

/// The first path segment names a registry when it looks like a hostname.
fn is_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }
        if let Some(c) = input.chars().find(|c| !allowed(*c)) {
            return Err(ParseImageRefError::InvalidChar(c));
        }
        let malformed = |reason| ParseImageRefError::Malformed {
            input: input.to_string(),
            reason,
        };

        let (named, digest) = match input.split_once('@') {
            Some((named, digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algorithm, hex)| !algorithm.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(malformed("digest must be algorithm:hex"));
                }
                (named, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let (host, rest) = match named.split_once('/') {
            Some((first, rest)) if is_host(first) => (Some(first.to_string()), rest),
            _ => (None, named),
        };

        let (path, tag) = match rest.rsplit_once(':') {
            Some((path, tag)) => {
                if tag.is_empty() || tag.len() > MAX_TAG_LEN || tag.contains('/') {
                    return Err(malformed("invalid tag"));
                }
                (path, Some(tag.to_string()))
            }
            None => (rest, None),
        };
        if path.split('/').any(str::is_empty) || path.contains(':') {
            return Err(malformed("empty or invalid repository path"));
        }

        let version = match (tag, digest) {
            (Some(tag), Some(digest)) => Version::Both { tag, digest },
            (Some(tag), None) => Version::Tag(tag),
            (None, Some(digest)) => Version::Digest(digest),
            (None, None) => Version::Tag("latest".to_string()),
        };
        Ok(Self {
            host,
            path: path.to_string(),
            version,
        })
    }

    /// An image that only exists in the host's local image store.
    pub fn local(name: &str, tag: &str) -> Self {
        Self {
            host: None,
            path: name.to_string(),
            version: Version::Tag(tag.to_string()),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Repository path below the registry, such as `acme/api`.
    pub fn name(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.version {
            Version::Tag(tag) | Version::Both { tag, .. } => Some(tag),
            Version::Digest(_) => None,
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match &self.version {
            Version::Digest(digest) | Version::Both { digest, .. } => Some(digest),
            Version::Tag(_) => None,
        }
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ParseImageRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageRef::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{}/", host)?;
        }
        f.write_str(&self.path)?;
        match &self.version {
            Version::Tag(tag) => write!(f, ":{}", tag),
            Version::Digest(digest) => write!(f, "@{}", digest),
            Version::Both { tag, digest } => write!(f, ":{}@{}", tag, digest),
        }
    }
}
