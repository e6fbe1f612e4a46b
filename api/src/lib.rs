// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! The [`RequestEngine`] (§4.7): maps HTTP verbs onto a [`StorageMechanism`] for the `names`,
//! `documents`, `contracts`, and `messages` namespaces, returning a framework-agnostic
//! `(StatusCode, Option<Bytes>, HeaderMap)` triple. The `nebula-server` binary is the thin `axum`
//! router translating real requests into calls here.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use nebula::citation::{Citation, Tag, Version};
use nebula::{Name, RepoError, StorageMechanism};
use tracing::instrument;

pub type EngineResponse = (StatusCode, Option<Bytes>, HeaderMap);

fn ok(status: StatusCode, body: Option<String>) -> EngineResponse { (status, body.map(Bytes::from), HeaderMap::new()) }

fn empty(status: StatusCode) -> EngineResponse { (status, None, HeaderMap::new()) }

fn immutable(status: StatusCode, body: Option<String>) -> EngineResponse {
    let mut headers = HeaderMap::new();
    headers.insert("cache-control", HeaderValue::from_static("immutable"));
    (status, body.map(Bytes::from), headers)
}

/// A [`Citation`] built purely to address storage by `(tag, version)`: backends key drafts,
/// contracts, and bags by that pair, not by digest, so the digest here is never read.
fn address(tag: Tag, version: Version) -> Citation { Citation { protocol: "nebula", tag, version, digest: [0u8; 32] } }

fn status_for(err: &RepoError) -> StatusCode { StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR) }

/// Wraps a single [`StorageMechanism`] and answers HTTP-shaped requests against it (§4.7).
pub struct RequestEngine<S: StorageMechanism> {
    storage: Arc<S>,
}

impl<S: StorageMechanism> RequestEngine<S> {
    pub fn new(storage: Arc<S>) -> Self { RequestEngine { storage } }

    #[instrument(level = "trace", skip(self), fields(method = %method, name = %name), err)]
    pub async fn handle_name(&self, method: Method, name: &Name, body: Option<Bytes>) -> Result<EngineResponse, RepoError> {
        match method {
            Method::HEAD => Ok(if self.storage.name_exists(name).await? { empty(StatusCode::OK) } else { empty(StatusCode::NOT_FOUND) }),
            Method::GET => match self.storage.read_name(name).await? {
                Some(citation) => Ok(ok(StatusCode::OK, Some(citation.to_string()))),
                None => Ok(empty(StatusCode::NOT_FOUND)),
            },
            Method::PUT => {
                let text = body_text(body)?;
                let citation: Citation = text.trim().parse().map_err(|e: nebula::citation::ParseError| RepoError::MalformedRequest(e.to_string()))?;
                match self.storage.write_name(name, citation).await {
                    Ok(_) => Ok(empty(StatusCode::CREATED)),
                    Err(RepoError::NameExists(n)) => Ok(empty(status_for(&RepoError::NameExists(n)))),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(empty(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }

    #[instrument(level = "trace", skip(self, body), fields(method = %method, tag = %tag, version = %version), err)]
    pub async fn handle_document(&self, method: Method, tag: Tag, version: Version, body: Option<Bytes>) -> Result<EngineResponse, RepoError> {
        let citation = address(tag, version);
        match method {
            Method::HEAD => Ok(if self.storage.document_exists(&citation).await? { empty(StatusCode::OK) } else { empty(StatusCode::NOT_FOUND) }),
            Method::GET => match self.storage.read_document(&citation).await? {
                Some(doc) => Ok(ok(StatusCode::OK, Some(doc.to_text()))),
                None => Ok(empty(StatusCode::NOT_FOUND)),
            },
            Method::PUT => {
                let existed = self.storage.document_exists(&citation).await?;
                let document = nebula::codec::decode_document(&body_text(body)?)?;
                self.storage.write_document(document).await?;
                Ok(empty(if existed { StatusCode::OK } else { StatusCode::CREATED }))
            }
            Method::DELETE => match self.storage.delete_document(&citation).await? {
                Some(doc) => Ok(ok(StatusCode::OK, Some(doc.to_text()))),
                None => Ok(empty(StatusCode::NOT_FOUND)),
            },
            _ => Ok(empty(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }

    #[instrument(level = "trace", skip(self, body), fields(method = %method, tag = %tag, version = %version), err)]
    pub async fn handle_contract(&self, method: Method, tag: Tag, version: Version, body: Option<Bytes>) -> Result<EngineResponse, RepoError> {
        let citation = address(tag, version);
        match method {
            Method::HEAD => Ok(if self.storage.contract_exists(&citation).await? { immutable(StatusCode::OK, None) } else { empty(StatusCode::NOT_FOUND) }),
            Method::GET => match self.storage.read_contract(&citation).await? {
                Some(contract) => Ok(immutable(StatusCode::OK, Some(contract.to_text()))),
                None => Ok(empty(StatusCode::NOT_FOUND)),
            },
            Method::PUT => {
                let contract = nebula::codec::decode_contract(&body_text(body)?)?;
                match self.storage.write_contract(contract).await {
                    Ok(_) => Ok(empty(StatusCode::CREATED)),
                    Err(e @ RepoError::ContractExists(_)) => Ok(empty(status_for(&e))),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(empty(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }

    #[instrument(level = "trace", skip(self, body), fields(method = %method, tag = %tag, version = %version, sub = ?sub), err)]
    pub async fn handle_message(
        &self,
        method: Method,
        tag: Tag,
        version: Version,
        sub: Option<(Tag, Version)>,
        body: Option<Bytes>,
    ) -> Result<EngineResponse, RepoError> {
        let bag = address(tag, version);
        match (method, sub) {
            (Method::HEAD, None) => Ok(if self.storage.message_available(&bag).await? { empty(StatusCode::OK) } else { empty(StatusCode::NOT_FOUND) }),
            (Method::GET, None) => Ok(ok(StatusCode::OK, Some(self.storage.message_count(&bag).await?.to_string()))),
            (Method::POST, None) => {
                let message = nebula::codec::decode_contract(&body_text(body)?)?;
                match self.storage.add_message(&bag, message).await {
                    Ok(()) => Ok(empty(StatusCode::CREATED)),
                    Err(e @ (RepoError::MessageExists(..) | RepoError::BagFull(_) | RepoError::NoBag(_))) => Ok(empty(status_for(&e))),
                    Err(e) => Err(e),
                }
            }
            (Method::DELETE, None) => match self.storage.remove_message(&bag).await? {
                Some(message) => Ok(ok(StatusCode::OK, Some(message.to_text()))),
                None => Ok(empty(StatusCode::NOT_FOUND)),
            },
            (Method::PUT, Some((mtag, mversion))) => {
                let message = nebula::codec::decode_contract(&body_text(body)?)?;
                let expected = address(mtag, mversion);
                if expected.tag != message.document.tag() || expected.version != *message.document.version() {
                    return Err(RepoError::MalformedRequest("message body does not match path tag/version".into()));
                }
                match self.storage.return_message(&bag, message).await {
                    Ok(()) => Ok(empty(StatusCode::OK)),
                    Err(e @ RepoError::LeaseExpired(..)) => Ok(empty(status_for(&e))),
                    Err(e) => Err(e),
                }
            }
            (Method::DELETE, Some((mtag, mversion))) => {
                let msg_citation = address(mtag, mversion);
                match self.storage.delete_message(&bag, &msg_citation).await {
                    Ok(message) => Ok(ok(StatusCode::OK, Some(message.to_text()))),
                    Err(e @ RepoError::LeaseExpired(..)) => Ok(empty(status_for(&e))),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(empty(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }
}

fn body_text(body: Option<Bytes>) -> Result<String, RepoError> {
    let bytes = body.ok_or_else(|| RepoError::MalformedRequest("request carries no body".into()))?;
    String::from_utf8(bytes.to_vec()).map_err(|e| RepoError::MalformedRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nebula::{Document, Ed25519Notary, Notary, Permissions};

    use super::*;

    fn engine() -> RequestEngine<nebula::InMemory> {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        RequestEngine::new(Arc::new(nebula::InMemory::new(notary)))
    }

    #[tokio::test]
    async fn head_on_unknown_name_is_404() {
        let engine = engine();
        let name: Name = "/acme/orders/v1".parse().unwrap();
        let (status, body, _) = engine.handle_name(Method::HEAD, &name, None).await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn put_then_get_document_round_trips() {
        let engine = engine();
        let doc = Document::new("/acme/orders-type/v1".parse().unwrap(), Permissions::public("alice"));
        let tag = doc.tag();
        let version = doc.version().clone();
        let body = Bytes::from(doc.to_text());

        let (status, _, _) = engine.handle_document(Method::PUT, tag, version.clone(), Some(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let (status, body, _) = engine.handle_document(Method::GET, tag, version, None).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_some());
    }

    #[tokio::test]
    async fn posting_beyond_bag_capacity_reports_409() {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        let storage = Arc::new(nebula::InMemory::new(notary.clone()));
        let engine = RequestEngine::new(storage.clone());

        let mut bag_doc = Document::new("/bag/v1".parse().unwrap(), Permissions::public("alice"));
        bag_doc.content.extend(nebula::BagParameters { capacity: 1, lease_seconds: 60 }.into_content());
        let bag_contract = notary.notarize_document(bag_doc);
        let bag_citation = storage.write_contract(bag_contract).await.unwrap();

        let mut msg_doc = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        msg_doc.parameters.bag = Some(bag_citation.clone());
        let body = Bytes::from(notary.notarize_document(msg_doc).to_text());
        let (status, _, _) = engine.handle_message(Method::POST, bag_citation.tag, bag_citation.version.clone(), None, Some(body.clone())).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let mut msg_doc2 = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        msg_doc2.parameters.bag = Some(bag_citation.clone());
        let body2 = Bytes::from(notary.notarize_document(msg_doc2).to_text());
        let (status, _, _) = engine.handle_message(Method::POST, bag_citation.tag, bag_citation.version.clone(), None, Some(body2)).await.unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
