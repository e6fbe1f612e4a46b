// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::citation::{Citation, Name, Tag, Version};

/// Arbitrary document content: a flat map of attribute names to text values.
///
/// The grammar of these values belongs to the document component framework; this repository
/// treats content as an opaque, ordered map so that it can be digested and displayed without
/// understanding any particular schema.
pub type Content = BTreeMap<String, String>;

/// Who may read and write a [`Document`]. Kept intentionally simple: a principal identity string,
/// `"public"` meaning world-readable.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Permissions {
    pub owner: String,
    pub public: bool,
}

impl Permissions {
    pub fn public(owner: impl Into<String>) -> Self { Permissions { owner: owner.into(), public: true } }

    pub fn private(owner: impl Into<String>) -> Self { Permissions { owner: owner.into(), public: false } }
}

/// Parameters every [`Document`] carries alongside its content.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DocumentParameters {
    pub tag: Tag,
    pub version: Version,
    pub doc_type: Name,
    pub permissions: Permissions,
    /// Citation of the contract this document supersedes, if it was produced by a checkout.
    pub previous: Option<Citation>,
    /// Set on messages to point back at the bag they were posted into.
    pub bag: Option<Citation>,
}

/// An unsigned document. Mutable while it is a draft; frozen once notarized into a [`Contract`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Document {
    pub content: Content,
    pub parameters: DocumentParameters,
}

impl Document {
    pub fn new(doc_type: Name, permissions: Permissions) -> Self {
        Document {
            content: Content::new(),
            parameters: DocumentParameters {
                tag: Tag::generate(),
                version: Version::initial(),
                doc_type,
                permissions,
                previous: None,
                bag: None,
            },
        }
    }

    pub fn tag(&self) -> Tag { self.parameters.tag }

    pub fn version(&self) -> &Version { &self.parameters.version }

    /// Canonical text encoding, see [`crate::codec`].
    pub fn to_text(&self) -> String { crate::codec::encode_document(self) }
}

/// A notarized [`Document`], bound to the citation of the certificate that signed it.
///
/// Content-addressed and immutable: [`crate::notary::Notary::cite_document`] is a pure function
/// of `document`, so two contracts with identical documents share a citation (invariant 2, §3).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Contract {
    pub document: Document,
    /// `None` marks this contract as self-signed (a certificate).
    pub certificate: Option<Citation>,
    pub signature: Vec<u8>,
}

impl Contract {
    pub fn is_self_signed(&self) -> bool { self.certificate.is_none() }

    pub fn to_text(&self) -> String { crate::codec::encode_contract(self) }
}

/// A notarized [`Contract`] living inside a [`Bag`] until accepted or lease-expired.
pub type Message = Contract;

/// Parameters of a bag contract: capacity and lease duration.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BagParameters {
    pub capacity: usize,
    pub lease_seconds: u64,
}

impl Default for BagParameters {
    fn default() -> Self { BagParameters { capacity: 10, lease_seconds: 60 } }
}

pub const BAG_CAPACITY_KEY: &str = "capacity";
pub const BAG_LEASE_KEY: &str = "lease";

impl BagParameters {
    /// Reads bag parameters back out of a bag contract's content, falling back to defaults for
    /// any missing attribute.
    pub fn from_content(content: &Content) -> Self {
        let mut params = BagParameters::default();
        if let Some(c) = content.get(BAG_CAPACITY_KEY).and_then(|v| v.parse().ok()) {
            params.capacity = c;
        }
        if let Some(l) = content.get(BAG_LEASE_KEY).and_then(|v| v.parse().ok()) {
            params.lease_seconds = l;
        }
        params
    }

    pub fn into_content(self) -> Content {
        let mut content = Content::new();
        content.insert(BAG_CAPACITY_KEY.to_owned(), self.capacity.to_string());
        content.insert(BAG_LEASE_KEY.to_owned(), self.lease_seconds.to_string());
        content
    }
}
