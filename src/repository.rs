// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! The [`DocumentRepository`] facade (§4.2): translates user intents into contract-respecting
//! sequences of [`StorageMechanism`] calls, using the [`Notary`] collaborator to cite and notarize.

use std::sync::Arc;

use tracing::instrument;

use crate::citation::{Citation, Name};
use crate::document::{BagParameters, Contract, Document, Message, Permissions};
use crate::error::{RepoError, RepoResult};
use crate::notary::Notary;
use crate::storage::StorageMechanism;

/// Fixed bag name events are published to (§4.2 `publishEvent`).
pub const EVENTS_BAG_NAME: &str = "/nebula/events/bag/v1";

pub struct DocumentRepository<S: StorageMechanism> {
    storage: S,
    notary: Arc<dyn Notary>,
}

impl<S: StorageMechanism> DocumentRepository<S> {
    pub fn new(storage: S, notary: Arc<dyn Notary>) -> Self { DocumentRepository { storage, notary } }

    pub fn storage(&self) -> &S { &self.storage }

    /// Seeds a new draft of `doc_type` with the given `permissions`, overlaying `template`
    /// key/value attributes onto whatever defaults the type implies (kept minimal here: the
    /// schema-lookup-and-default-fill described in §4.2 is out of this crate's scope since it
    /// belongs to the document component framework; defaults are simply "no attributes").
    pub fn create_draft(&self, doc_type: Name, permissions: Permissions, template: impl IntoIterator<Item = (String, String)>) -> Document {
        let mut doc = Document::new(doc_type, permissions);
        doc.content.extend(template);
        doc
    }

    /// Notarizes `draft` and writes it through as a draft (not yet a contract).
    #[instrument(level = "trace", skip_all, err)]
    pub async fn save_draft(&self, draft: Document) -> RepoResult<Citation> { self.storage.write_document(draft).await }

    #[instrument(level = "trace", skip(self), fields(citation = %citation), err)]
    pub async fn retrieve_draft(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        self.storage.read_document(citation).await
    }

    #[instrument(level = "trace", skip(self), fields(citation = %citation), err)]
    pub async fn discard_draft(&self, citation: &Citation) -> RepoResult<bool> {
        Ok(self.storage.delete_document(citation).await?.is_some())
    }

    /// Notarizes `draft`, writes the resulting contract, and binds `name` to it. Fails
    /// `nameExists` if `name` is already bound — checked before the (irreversible) contract write
    /// so a doomed commit never orphans a contract nobody can name.
    #[instrument(level = "trace", skip(self, draft), fields(name = %name), err)]
    pub async fn commit(&self, name: &Name, draft: Document) -> RepoResult<Citation> {
        if self.storage.name_exists(name).await? {
            return Err(RepoError::NameExists(name.clone()));
        }
        let contract = self.notary.notarize_document(draft);
        let citation = self.storage.write_contract(contract).await?;
        self.storage.write_name(name, citation.clone()).await?;
        Ok(citation)
    }

    #[instrument(level = "trace", skip(self), fields(name = %name), err)]
    pub async fn retrieve_contract(&self, name: &Name) -> RepoResult<Option<Contract>> {
        let Some(citation) = self.storage.read_name(name).await? else { return Ok(None) };
        self.storage.read_contract(&citation).await
    }

    /// Derives the next draft from the contract currently bound to `name`, incrementing `level`
    /// (see [`crate::citation::Version::next`]) and citing the current contract as `previous`.
    #[instrument(level = "trace", skip(self), fields(name = %name, level = ?level), err)]
    pub async fn checkout(&self, name: &Name, level: Option<usize>) -> RepoResult<Document> {
        let citation = self
            .storage
            .read_name(name)
            .await?
            .ok_or_else(|| RepoError::UnknownName(name.clone()))?;
        let contract = self
            .storage
            .read_contract(&citation)
            .await?
            .ok_or_else(|| RepoError::MissingDocument(citation.clone()))?;
        let mut draft = contract.document;
        draft.parameters.version = draft.parameters.version.next(level);
        draft.parameters.previous = Some(citation);
        Ok(draft)
    }

    /// Constructs, notarizes, writes, and names a fresh bag contract.
    #[instrument(level = "trace", skip(self, permissions), fields(name = %name), err)]
    pub async fn create_bag(&self, name: &Name, permissions: Permissions, params: BagParameters) -> RepoResult<Citation> {
        let mut draft = Document::new("/nebula/bag/v1".parse().expect("valid name"), permissions);
        draft.content.extend(params.into_content());
        self.commit(name, draft).await
    }

    /// Resolves `bag` by name, wraps `message` with a `$bag` back-reference, and adds it.
    /// Capacity (`BagFull`) and duplicate (`MessageExists`) rejection are enforced by the
    /// backend's own `add_message`, not here.
    #[instrument(level = "trace", skip(self, message), fields(bag = %bag), err)]
    pub async fn post_message(&self, bag: &Name, mut message: Document) -> RepoResult<Citation> {
        let bag_citation = self
            .storage
            .read_name(bag)
            .await?
            .ok_or_else(|| RepoError::UnknownBag(bag.clone()))?;
        message.parameters.bag = Some(bag_citation.clone());
        let notarized = self.notary.notarize_document(message);
        let msg_citation = self.notary.cite_document(&notarized.document);
        self.storage.add_message(&bag_citation, notarized).await?;
        Ok(msg_citation)
    }

    async fn bag_citation_of(&self, bag: &Name) -> RepoResult<Citation> {
        self.storage
            .read_name(bag)
            .await?
            .ok_or_else(|| RepoError::UnknownBag(bag.clone()))
    }

    #[instrument(level = "trace", skip(self), fields(bag = %bag), err)]
    pub async fn borrow_message(&self, bag: &Name) -> RepoResult<Option<Message>> {
        let bag_citation = self.bag_citation_of(bag).await?;
        self.storage.remove_message(&bag_citation).await
    }

    /// Returns `message` to `available`, using its own `$bag` back-reference.
    #[instrument(level = "trace", skip_all, err)]
    pub async fn reject_message(&self, message: Message) -> RepoResult<()> {
        let bag_citation = message
            .document
            .parameters
            .bag
            .clone()
            .ok_or_else(|| RepoError::MalformedRequest("message carries no $bag reference".into()))?;
        self.storage.return_message(&bag_citation, message).await
    }

    /// Permanently removes `message` from processing, using its own `$bag` back-reference.
    #[instrument(level = "trace", skip_all, err)]
    pub async fn accept_message(&self, message: &Message) -> RepoResult<Message> {
        let bag_citation = message
            .document
            .parameters
            .bag
            .clone()
            .ok_or_else(|| RepoError::MalformedRequest("message carries no $bag reference".into()))?;
        let msg_citation = self.notary.cite_document(&message.document);
        self.storage.delete_message(&bag_citation, &msg_citation).await
    }

    /// Posts `event` into the fixed events bag (§4.2).
    pub async fn publish_event(&self, event: Document) -> RepoResult<Citation> {
        let bag: Name = EVENTS_BAG_NAME.parse().expect("valid fixed name");
        self.post_message(&bag, event).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notary::Ed25519Notary;
    use crate::storage::InMemory;

    fn repo() -> DocumentRepository<InMemory> {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        DocumentRepository::new(InMemory::new(notary.clone()), notary)
    }

    #[tokio::test]
    async fn commit_then_checkout_increments_version_and_sets_previous() {
        let repo = repo();
        let name: Name = "/acme/orders/v1".parse().unwrap();
        let draft = repo.create_draft("/acme/orders-type/v1".parse().unwrap(), Permissions::public("alice"), []);
        let first = repo.commit(&name, draft).await.unwrap();

        let next_draft = repo.checkout(&name, None).await.unwrap();
        assert_eq!(next_draft.parameters.previous, Some(first));
        assert_eq!(next_draft.version().to_string(), "v2");
    }

    #[tokio::test]
    async fn commit_fails_on_name_collision() {
        let repo = repo();
        let name: Name = "/acme/orders/v1".parse().unwrap();
        let draft = repo.create_draft("/acme/orders-type/v1".parse().unwrap(), Permissions::public("alice"), []);
        repo.commit(&name, draft).await.unwrap();

        let draft2 = repo.create_draft("/acme/orders-type/v1".parse().unwrap(), Permissions::public("alice"), []);
        assert!(matches!(repo.commit(&name, draft2).await, Err(RepoError::NameExists(_))));
    }

    #[tokio::test]
    async fn bag_lifecycle_round_trips_s4() {
        let repo = repo();
        let bag_name: Name = "/acme/bag/v1".parse().unwrap();
        repo.create_bag(&bag_name, Permissions::public("alice"), BagParameters { capacity: 2, lease_seconds: 60 })
            .await
            .unwrap();

        let msg_type: Name = "/acme/msg-type/v1".parse().unwrap();
        let m1 = repo.create_draft(msg_type.clone(), Permissions::public("alice"), []);
        let m2 = repo.create_draft(msg_type.clone(), Permissions::public("alice"), []);
        repo.post_message(&bag_name, m1).await.unwrap();
        repo.post_message(&bag_name, m2).await.unwrap();

        let m3 = repo.create_draft(msg_type, Permissions::public("alice"), []);
        assert!(matches!(repo.post_message(&bag_name, m3).await, Err(RepoError::BagFull(_))));

        let borrowed = repo.borrow_message(&bag_name).await.unwrap().unwrap();
        let bag_citation = repo.bag_citation_of(&bag_name).await.unwrap();
        assert_eq!(repo.storage.message_count(&bag_citation).await.unwrap(), 1);

        repo.reject_message(borrowed).await.unwrap();
        assert_eq!(repo.storage.message_count(&bag_citation).await.unwrap(), 2);

        let borrowed_again = repo.borrow_message(&bag_name).await.unwrap().unwrap();
        repo.accept_message(&borrowed_again).await.unwrap();
        assert_eq!(repo.storage.message_count(&bag_citation).await.unwrap(), 1);
    }
}
