// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use core::str::FromStr;

use rand::RngCore;

/// A 20-byte random identifier shared by a [`Document`](crate::document::Document), its drafts,
/// and the [`Contract`](crate::document::Contract) it is eventually notarized into.
///
/// Displays with a leading `#`, e.g. `#a1b2c3d4e5f6a7b8c9d0`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Tag([u8; 20]);

impl Tag {
    /// Generates a fresh, random tag.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Tag(bytes)
    }

    /// Builds a tag from an explicit byte string, e.g. a digest truncation. Used where identity
    /// must be stable across a process restart rather than freshly randomized.
    pub fn from_bytes(bytes: [u8; 20]) -> Self { Tag(bytes) }

    pub fn as_bytes(&self) -> &[u8; 20] { &self.0 }

    /// Filesystem-safe form: the raw hex digits without the `#` prefix.
    pub fn filename(&self) -> String { hex::encode(self.0) }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "Tag({self})") }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "#{}", hex::encode(self.0)) }
}

/// Error returned when parsing a [`Tag`], [`Version`] or [`Name`] from text fails.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ParseError {
    /// tag '{0}' is not a 40-character hex string prefixed with '#'.
    InvalidTag(String),
    /// version '{0}' must be a dot-separated list of positive integers prefixed with 'v'.
    InvalidVersion(String),
    /// name '{0}' must start with '/'.
    InvalidName(String),

    /// citation '{0}' must be formatted as 'protocol:tag:version:digest'.
    InvalidCitation(String),
}

impl FromStr for Tag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hexpart = s.strip_prefix('#').unwrap_or(s);
        let bytes = hex::decode(hexpart).map_err(|_| ParseError::InvalidTag(s.to_owned()))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| ParseError::InvalidTag(s.to_owned()))?;
        Ok(Tag(arr))
    }
}

/// An ordered tuple of positive integers, e.g. `v1.2.3`.
///
/// Versions are created once and never mutated; [`Version::next`] returns a new value.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Version(Vec<u32>);

impl Version {
    pub fn new(components: Vec<u32>) -> Self {
        assert!(!components.is_empty(), "version must have at least one component");
        assert!(components.iter().all(|c| *c > 0), "version components must be positive");
        Version(components)
    }

    pub fn initial() -> Self { Version(vec![1]) }

    pub fn components(&self) -> &[u32] { &self.0 }

    /// Increments the component at `level` (1-indexed). Components below `level` are untouched;
    /// any component beyond `level` that existed in the source is reset to 1 rather than dropped.
    ///
    /// When `level` is one past the last existing component, a new `1` component is appended.
    /// When `level` is `None`, the last existing component is incremented.
    pub fn next(&self, level: Option<usize>) -> Version {
        let level = level.unwrap_or(self.0.len());
        if level == self.0.len() + 1 {
            let mut v = self.0.clone();
            v.push(1);
            return Version(v);
        }
        assert!(level >= 1 && level <= self.0.len(), "version level {level} out of range");
        let mut v = self.0.clone();
        v[level - 1] += 1;
        for c in &mut v[level..] {
            *c = 1;
        }
        Version(v)
    }

    pub fn filename(&self) -> String {
        self.0
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.filename())
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('v').ok_or_else(|| ParseError::InvalidVersion(s.to_owned()))?;
        let components: Result<Vec<u32>, _> = body.split('.').map(str::parse::<u32>).collect();
        let components = components.map_err(|_| ParseError::InvalidVersion(s.to_owned()))?;
        if components.is_empty() || components.iter().any(|c| *c == 0) {
            return Err(ParseError::InvalidVersion(s.to_owned()));
        }
        Ok(Version(components))
    }
}

/// A slash-delimited path bound write-once to a [`Citation`], e.g. `/acme/orders/v1`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Name(String);

impl Name {
    pub fn as_str(&self) -> &str { &self.0 }

    /// Filesystem-safe form: the path with its leading `/` stripped.
    pub fn filename(&self) -> &str { self.0.trim_start_matches('/') }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for Name {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') || s.len() < 2 {
            return Err(ParseError::InvalidName(s.to_owned()));
        }
        Ok(Name(s.to_owned()))
    }
}

/// Cryptographic fingerprint of a specific byte string, produced by the
/// [`Notary`](crate::notary::Notary).
///
/// `citationMatches(c, bytes) ⇔ digest(bytes) = c.digest` (invariant 1, §3).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Citation {
    pub protocol: &'static str,
    pub tag: Tag,
    pub version: Version,
    pub digest: [u8; 32],
}

impl Citation {
    pub fn digest_hex(&self) -> String { hex::encode(self.digest) }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.protocol, self.tag, self.version, self.digest_hex())
    }
}

impl FromStr for Citation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let bad = || ParseError::InvalidCitation(s.to_owned());
        let protocol = match parts.next().ok_or_else(bad)? {
            "nebula" => "nebula",
            _ => return Err(bad()),
        };
        let tag: Tag = parts.next().ok_or_else(bad)?.parse()?;
        let version: Version = parts.next().ok_or_else(bad)?.parse()?;
        let digest_hex = parts.next().ok_or_else(bad)?;
        let digest_bytes = hex::decode(digest_hex).map_err(|_| bad())?;
        let digest: [u8; 32] = digest_bytes.try_into().map_err(|_| bad())?;
        Ok(Citation { protocol, tag, version, digest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrips_through_display_and_parse() {
        let tag = Tag::generate();
        let text = tag.to_string();
        let parsed: Tag = text.parse().unwrap();
        assert_eq!(tag, parsed);
    }

    #[test]
    fn version_next_increments_requested_level_and_resets_trailing_components() {
        let v = Version::new(vec![1, 2, 3]);
        assert_eq!(v.next(Some(2)), Version::new(vec![1, 3, 1]));
        assert_eq!(v.next(None), Version::new(vec![1, 2, 4]));
        assert_eq!(v.next(Some(4)), Version::new(vec![1, 2, 3, 1]));
    }

    #[test]
    fn name_requires_leading_slash() {
        assert!("acme".parse::<Name>().is_err());
        assert!("/acme/orders/v1".parse::<Name>().is_ok());
    }
}
