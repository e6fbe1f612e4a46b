// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::ed25519::signature::Signer;
use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::citation::{Citation, Tag};
use crate::document::{Contract, Document, Permissions};

/// Signs, cites, and validates documents. Consumed by the [`DocumentRepository`](crate::repository::DocumentRepository)
/// and the [`ValidatedWrapper`](crate::storage::validated::ValidatedWrapper) as a collaborator
/// (§4.2, §4.4) — the cryptographic scheme is deliberately pluggable.
pub trait Notary: Send + Sync {
    /// Computes the citation that uniquely identifies `doc`'s current bytes.
    fn cite_document(&self, doc: &Document) -> Citation;

    /// `citationMatches(citation, doc) ⇔ digest(doc) = citation.digest` (invariant 1, §3).
    fn citation_matches(&self, citation: &Citation, doc: &Document) -> bool {
        self.cite_document(doc).digest == citation.digest
    }

    /// Signs `doc`, producing a [`Contract`] bound to this notary's own self-citation.
    fn notarize_document(&self, doc: Document) -> Contract;

    /// Verifies `contract`'s signature against the given certificate (its own document, if this
    /// is the self-signed base case).
    fn valid_contract(&self, contract: &Contract, certificate: &Contract) -> bool;

    /// Produces a self-notarized attestation used as a peer's credentials (§4.6).
    fn generate_credentials(&self) -> Contract;
}

/// Reference [`Notary`] implementation: SHA-256 digests, Ed25519 signatures.
///
/// Every notary is also its own certificate authority: `notarize_document` always signs with this
/// notary's key and cites its own `generate_credentials()` contract, making every notarized
/// document's certificate chain terminate in exactly one self-signed step.
pub struct Ed25519Notary {
    signing_key: SigningKey,
    credentials: Contract,
}

impl Ed25519Notary {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing_key)
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let mut identity = Document::new(
            "/nebula/certificate/v1".parse().expect("valid name"),
            Permissions::public("self"),
        );
        // Derived from the public key rather than randomly generated, so the same signing key
        // always cites the same credentials contract across process restarts.
        identity.parameters.tag = Tag::from_bytes(credential_tag(&verifying_key));
        identity
            .content
            .insert("public_key".into(), hex::encode(verifying_key.to_bytes()));
        let credentials = sign_self(&signing_key, identity);
        Ed25519Notary { signing_key, credentials }
    }

    fn verifying_key_of(&self, certificate: &Contract) -> Option<VerifyingKey> {
        let hex_key = certificate.document.content.get("public_key")?;
        let bytes = hex::decode(hex_key).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&arr).ok()
    }
}

fn credential_tag(verifying_key: &VerifyingKey) -> [u8; 20] {
    let mut hasher = Sha256::new();
    hasher.update(verifying_key.to_bytes());
    let digest = hasher.finalize();
    let mut tag = [0u8; 20];
    tag.copy_from_slice(&digest[..20]);
    tag
}

fn digest_document(doc: &Document) -> [u8; 32] {
    let text = crate::codec::encode_document(doc);
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

fn cite(doc: &Document) -> Citation {
    Citation { protocol: "nebula", tag: doc.tag(), version: doc.version().clone(), digest: digest_document(doc) }
}

fn sign_self(signing_key: &SigningKey, document: Document) -> Contract {
    let text = crate::codec::encode_document(&document);
    let signature: Signature = signing_key.sign(text.as_bytes());
    Contract { document, certificate: None, signature: signature.to_bytes().to_vec() }
}

impl Notary for Ed25519Notary {
    fn cite_document(&self, doc: &Document) -> Citation { cite(doc) }

    fn notarize_document(&self, document: Document) -> Contract {
        let text = crate::codec::encode_document(&document);
        let signature: Signature = self.signing_key.sign(text.as_bytes());
        Contract {
            document,
            certificate: Some(cite(&self.credentials.document)),
            signature: signature.to_bytes().to_vec(),
        }
    }

    fn valid_contract(&self, contract: &Contract, certificate: &Contract) -> bool {
        let Some(verifying_key) = self.verifying_key_of(certificate) else { return false };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(contract.signature.as_slice()) else { return false };
        let signature = Signature::from_bytes(&sig_bytes);
        let text = crate::codec::encode_document(&contract.document);
        verifying_key.verify(text.as_bytes(), &signature).is_ok()
    }

    fn generate_credentials(&self) -> Contract { self.credentials.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_credentials_validate_against_themselves() {
        let notary = Ed25519Notary::generate();
        let creds = notary.generate_credentials();
        assert!(notary.valid_contract(&creds, &creds));
    }

    #[test]
    fn notarized_document_validates_against_the_issuing_credentials() {
        let notary = Ed25519Notary::generate();
        let doc = Document::new("/acme/orders/v1".parse().unwrap(), Permissions::public("alice"));
        let contract = notary.notarize_document(doc);
        let creds = notary.generate_credentials();
        assert!(notary.valid_contract(&contract, &creds));
    }

    #[test]
    fn tampering_with_content_breaks_citation_match() {
        let notary = Ed25519Notary::generate();
        let mut doc = Document::new("/acme/orders/v1".parse().unwrap(), Permissions::public("alice"));
        let citation = notary.cite_document(&doc);
        doc.content.insert("tampered".into(), "yes".into());
        assert!(!notary.citation_matches(&citation, &doc));
    }
}
