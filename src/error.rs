// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use crate::citation::{Citation, Name};

/// The complete error taxonomy for the repository (§7). Each layer either acts on a lower-layer
/// error or wraps it and re-raises; nothing is silently swallowed except per-layer claim-race
/// retries and best-effort directory cleanup.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum RepoError {
    /// name '{0}' is already bound.
    NameExists(Name),

    /// name '{0}' is not bound.
    UnknownName(Name),

    /// bag '{0}' is not known.
    UnknownBag(Name),

    /// no bag contract exists at citation '{0}'.
    NoBag(Citation),

    /// a contract already exists at the tag/version of citation '{0}'.
    ContractExists(Citation),

    /// a draft document already exists at the tag/version of citation '{0}'.
    DocumentExists(Citation),

    /// citation '{0}' resolves to no stored bytes.
    MissingDocument(Citation),

    /// bytes stored for citation '{0}' do not match its digest.
    ModifiedDocument(Citation),

    /// contract at citation '{0}' failed structural or signature validation: {1}
    ContractInvalid(Citation, String),

    /// message '{0}' is already present in bag '{1}'.
    MessageExists(Citation, Citation),

    /// bag '{0}' is at capacity.
    BagFull(Citation),

    /// message '{0}' is not currently leased (processing) in bag '{1}'.
    LeaseExpired(Citation, Citation),

    /// remote peer responded with unexpected status {0}.
    Status(u16),

    /// remote peer accepted the request but sent no response.
    ServerDown,

    /// request could not be constructed or sent: {0}
    MalformedRequest(String),

    /// certificate chain exceeds the maximum allowed depth ({0}).
    ChainTooDeep(usize),

    /// underlying I/O failure: {0}
    #[from]
    Io(std::io::Error),

    /// unexpected lower-layer failure in {module}::{procedure}: {source}
    Unexpected { module: &'static str, procedure: &'static str, source: String },
}

impl RepoError {
    pub fn unexpected(module: &'static str, procedure: &'static str, source: impl std::fmt::Display) -> Self {
        RepoError::Unexpected { module, procedure, source: source.to_string() }
    }

    /// Maps the taxonomy onto HTTP status codes for the RequestEngine (§7).
    pub fn status_code(&self) -> u16 {
        match self {
            RepoError::NameExists(_) | RepoError::ContractExists(_) | RepoError::DocumentExists(_) | RepoError::BagFull(_) => 409,
            RepoError::MessageExists(..) => 409,
            RepoError::ModifiedDocument(_) | RepoError::ContractInvalid(..) | RepoError::LeaseExpired(..) => 409,
            RepoError::UnknownName(_) | RepoError::UnknownBag(_) | RepoError::MissingDocument(_) | RepoError::NoBag(_) => 404,
            RepoError::MalformedRequest(_) => 400,
            RepoError::ServerDown => 502,
            RepoError::Status(code) => *code,
            RepoError::ChainTooDeep(_) => 409,
            RepoError::Io(_) | RepoError::Unexpected { .. } => 500,
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
