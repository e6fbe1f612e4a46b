// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP client [`StorageMechanism`] (§4.6): maps every operation onto a verb/path against a peer
//! exposing the same wire surface as the ambient `api` crate's `RequestEngine`.

use std::time::Duration;

use async_trait::async_trait;
use nebula::{Citation, Contract, Document, Message, Name, Notary, RepoError, RepoResult, StorageMechanism};
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use tracing::instrument;

const ACCEPT_HEADER: &str = "accept";
const CONTENT_TYPE_HEADER: &str = "content-type";
const BALI_MIME: &str = "application/bali";
const CREDENTIALS_HEADER: &str = "nebula-credentials";
const DIGEST_HEADER: &str = "nebula-digest";
const SUBDIGEST_HEADER: &str = "nebula-subdigest";

/// HTTP-backed [`StorageMechanism`] talking to a peer over `reqwest` (§4.6).
pub struct Remote {
    client: Client,
    base_uri: String,
    notary: Arc<dyn Notary>,
}

impl Remote {
    pub fn new(base_uri: impl Into<String>, notary: Arc<dyn Notary>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Remote { client, base_uri: base_uri.into(), notary })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_uri, path) }

    fn credentials_header(&self) -> String {
        let text = self.notary.generate_credentials().to_text();
        base32::encode(base32::Alphabet::Rfc4648 { padding: true }, text.as_bytes())
    }

    #[instrument(level = "trace", skip(self, body), fields(method = %method, path = %path), err)]
    async fn send(&self, method: Method, path: &str, digest: Option<&Citation>, body: Option<String>) -> RepoResult<reqwest::Response> {
        let mut req = self.client.request(method, self.url(path)).header(ACCEPT_HEADER, BALI_MIME).header(CREDENTIALS_HEADER, self.credentials_header());
        if let Some(citation) = digest {
            req = req.header(DIGEST_HEADER, citation.digest_hex());
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE_HEADER, BALI_MIME).body(body);
        }
        req.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                RepoError::ServerDown
            } else {
                RepoError::MalformedRequest(e.to_string())
            }
        })
    }
}

fn exists_path(kind: &str, suffix: &str) -> String { format!("/repository/{kind}/{suffix}") }

fn tv(citation: &Citation) -> String { format!("{}/{}", citation.tag, citation.version) }

#[async_trait]
impl StorageMechanism for Remote {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool> {
        let resp = self.send(Method::HEAD, &exists_path("names", name.filename()), None, None).await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>> {
        let resp = self.send(Method::GET, &exists_path("names", name.filename()), None, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "read_name", e))?;
                Ok(Some(text.trim().parse().map_err(|e: nebula::citation::ParseError| RepoError::unexpected("remote", "read_name", e))?))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation> {
        let path = exists_path("names", name.filename());
        let resp = self.send(Method::PUT, &path, Some(&citation), Some(citation.to_string())).await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(citation),
            StatusCode::CONFLICT => Err(RepoError::NameExists(name.clone())),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool> {
        let resp = self.send(Method::HEAD, &exists_path("documents", &tv(citation)), Some(citation), None).await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        let resp = self.send(Method::GET, &exists_path("documents", &tv(citation)), Some(citation), None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "read_document", e))?;
                Ok(Some(nebula::codec::decode_document(&text)?))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn write_document(&self, document: Document) -> RepoResult<Citation> {
        let citation = self.notary.cite_document(&document);
        let path = exists_path("documents", &tv(&citation));
        let resp = self.send(Method::PUT, &path, Some(&citation), Some(document.to_text())).await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(citation),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        let resp = self.send(Method::DELETE, &exists_path("documents", &tv(citation)), Some(citation), None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "delete_document", e))?;
                Ok(Some(nebula::codec::decode_document(&text)?))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool> {
        let resp = self.send(Method::HEAD, &exists_path("contracts", &tv(citation)), Some(citation), None).await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>> {
        let resp = self.send(Method::GET, &exists_path("contracts", &tv(citation)), Some(citation), None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "read_contract", e))?;
                Ok(Some(nebula::codec::decode_contract(&text)?))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation> {
        let citation = self.notary.cite_document(&contract.document);
        let path = exists_path("contracts", &tv(&citation));
        let resp = self.send(Method::PUT, &path, Some(&citation), Some(contract.to_text())).await?;
        match resp.status() {
            StatusCode::CREATED => Ok(citation),
            StatusCode::CONFLICT => Err(RepoError::ContractExists(citation)),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool> {
        let resp = self.send(Method::HEAD, &exists_path("messages", &tv(bag)), Some(bag), None).await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn message_count(&self, bag: &Citation) -> RepoResult<usize> {
        let resp = self.send(Method::GET, &exists_path("messages", &tv(bag)), Some(bag), None).await?;
        match resp.status() {
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "message_count", e))?;
                text.trim().parse().map_err(|e| RepoError::unexpected("remote", "message_count", e))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let resp = self.send(Method::POST, &exists_path("messages", &tv(bag)), Some(bag), Some(message.to_text())).await?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(RepoError::MessageExists(self.notary.cite_document(&message.document), bag.clone())),
            StatusCode::NOT_FOUND => Err(RepoError::NoBag(bag.clone())),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>> {
        let resp = self.send(Method::DELETE, &exists_path("messages", &tv(bag)), Some(bag), None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "remove_message", e))?;
                Ok(Some(nebula::codec::decode_contract(&text)?))
            }
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let msg_citation = self.notary.cite_document(&message.document);
        let path = format!("{}/{}", exists_path("messages", &tv(bag)), tv(&msg_citation));
        let mut req = self.client.request(Method::PUT, self.url(&path)).header(ACCEPT_HEADER, BALI_MIME).header(CREDENTIALS_HEADER, self.credentials_header());
        req = req.header(DIGEST_HEADER, bag.digest_hex()).header(SUBDIGEST_HEADER, msg_citation.digest_hex());
        req = req.header(CONTENT_TYPE_HEADER, BALI_MIME).body(message.to_text());
        let resp = req.send().await.map_err(|e| if e.is_timeout() || e.is_connect() { RepoError::ServerDown } else { RepoError::MalformedRequest(e.to_string()) })?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(RepoError::LeaseExpired(msg_citation, bag.clone())),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }

    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message> {
        let path = format!("{}/{}", exists_path("messages", &tv(bag)), tv(citation));
        let mut req = self.client.request(Method::DELETE, self.url(&path)).header(ACCEPT_HEADER, BALI_MIME).header(CREDENTIALS_HEADER, self.credentials_header());
        req = req.header(DIGEST_HEADER, bag.digest_hex()).header(SUBDIGEST_HEADER, citation.digest_hex());
        let resp = req.send().await.map_err(|e| if e.is_timeout() || e.is_connect() { RepoError::ServerDown } else { RepoError::MalformedRequest(e.to_string()) })?;
        match resp.status() {
            StatusCode::OK => {
                let text = resp.text().await.map_err(|e| RepoError::unexpected("remote", "delete_message", e))?;
                nebula::codec::decode_contract(&text)
            }
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(RepoError::LeaseExpired(citation.clone(), bag.clone())),
            other => Err(RepoError::Status(other.as_u16())),
        }
    }
}
