// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tokio::sync::RwLock;

use crate::citation::{Citation, Name, Tag, Version};
use crate::document::{BagParameters, Contract, Document, Message};
use crate::error::{RepoError, RepoResult};
use crate::notary::Notary;
use crate::storage::StorageMechanism;

type DraftKey = (Tag, Version);

#[derive(Default)]
struct BagState {
    available: HashMap<DraftKey, Message>,
    processing: HashMap<DraftKey, Message>,
}

/// Pure in-process backend: everything lives in `HashMap`s behind an `RwLock`, lost on drop.
///
/// Used for tests and as the fastest option for ephemeral or single-process deployments; it
/// satisfies the same [`StorageMechanism`] contract as `LocalFS`/`Remote`/`S3`.
pub struct InMemory {
    notary: Arc<dyn Notary>,
    names: RwLock<HashMap<Name, Citation>>,
    documents: RwLock<HashMap<DraftKey, Document>>,
    contracts: RwLock<HashMap<DraftKey, Contract>>,
    bags: RwLock<HashMap<DraftKey, BagState>>,
}

impl InMemory {
    pub fn new(notary: Arc<dyn Notary>) -> Self {
        InMemory {
            notary,
            names: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            contracts: RwLock::new(HashMap::new()),
            bags: RwLock::new(HashMap::new()),
        }
    }

    fn key_of(citation: &Citation) -> DraftKey { (citation.tag, citation.version.clone()) }
}

#[async_trait]
impl StorageMechanism for InMemory {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool> { Ok(self.names.read().await.contains_key(name)) }

    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>> { Ok(self.names.read().await.get(name).cloned()) }

    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation> {
        let mut names = self.names.write().await;
        if names.contains_key(name) {
            return Err(RepoError::NameExists(name.clone()));
        }
        names.insert(name.clone(), citation.clone());
        Ok(citation)
    }

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool> {
        Ok(self.documents.read().await.contains_key(&Self::key_of(citation)))
    }

    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        Ok(self.documents.read().await.get(&Self::key_of(citation)).cloned())
    }

    async fn write_document(&self, document: Document) -> RepoResult<Citation> {
        let citation = self.notary.cite_document(&document);
        let key = Self::key_of(&citation);
        if self.contracts.read().await.contains_key(&key) {
            return Err(RepoError::ContractExists(citation));
        }
        self.documents.write().await.insert(key, document);
        Ok(citation)
    }

    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        Ok(self.documents.write().await.remove(&Self::key_of(citation)))
    }

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool> {
        Ok(self.contracts.read().await.contains_key(&Self::key_of(citation)))
    }

    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>> {
        Ok(self.contracts.read().await.get(&Self::key_of(citation)).cloned())
    }

    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation> {
        let citation = self.notary.cite_document(&contract.document);
        let key = Self::key_of(&citation);
        let mut contracts = self.contracts.write().await;
        if contracts.contains_key(&key) {
            return Err(RepoError::ContractExists(citation));
        }
        contracts.insert(key.clone(), contract);
        drop(contracts);
        self.documents.write().await.remove(&key);
        Ok(citation)
    }

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool> {
        let bags = self.bags.read().await;
        Ok(bags.get(&Self::key_of(bag)).is_some_and(|b| !b.available.is_empty()))
    }

    async fn message_count(&self, bag: &Citation) -> RepoResult<usize> {
        let bags = self.bags.read().await;
        Ok(bags.get(&Self::key_of(bag)).map_or(0, |b| b.available.len()))
    }

    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let contract = self.read_contract(bag).await?.ok_or_else(|| RepoError::NoBag(bag.clone()))?;
        let params = BagParameters::from_content(&contract.document.content);
        let msg_key = (message.document.tag(), message.document.version().clone());
        let mut bags = self.bags.write().await;
        let state = bags.entry(Self::key_of(bag)).or_default();
        if state.available.contains_key(&msg_key) || state.processing.contains_key(&msg_key) {
            let msg_citation = self.notary.cite_document(&message.document);
            return Err(RepoError::MessageExists(msg_citation, bag.clone()));
        }
        if state.available.len() + state.processing.len() >= params.capacity {
            return Err(RepoError::BagFull(bag.clone()));
        }
        state.available.insert(msg_key, message);
        Ok(())
    }

    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>> {
        let mut bags = self.bags.write().await;
        let Some(state) = bags.get_mut(&Self::key_of(bag)) else { return Ok(None) };
        let candidates: Vec<DraftKey> = state.available.keys().cloned().collect();
        let Some(key) = candidates.into_iter().choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };
        let message = state.available.remove(&key).expect("key came from this map");
        state.processing.insert(key, message.clone());
        Ok(Some(message))
    }

    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let mut bags = self.bags.write().await;
        let state = bags.entry(Self::key_of(bag)).or_default();
        let key = (message.document.tag(), message.document.version().clone());
        if state.processing.remove(&key).is_none() {
            let msg_citation = self.notary.cite_document(&message.document);
            return Err(RepoError::LeaseExpired(msg_citation, bag.clone()));
        }
        let mut bumped = message;
        bumped.document.parameters.version = bumped.document.parameters.version.next(None);
        let new_key = (bumped.document.tag(), bumped.document.version().clone());
        state.available.insert(new_key, bumped);
        Ok(())
    }

    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message> {
        let mut bags = self.bags.write().await;
        let state = bags.entry(Self::key_of(bag)).or_default();
        let key = Self::key_of(citation);
        state
            .processing
            .remove(&key)
            .ok_or_else(|| RepoError::LeaseExpired(citation.clone(), bag.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Permissions;
    use crate::notary::Ed25519Notary;

    fn backend() -> (InMemory, Arc<dyn Notary>) {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        (InMemory::new(notary.clone()), notary)
    }

    #[tokio::test]
    async fn name_write_once() {
        let (store, notary) = backend();
        let doc = Document::new("/acme/v1".parse().unwrap(), Permissions::public("alice"));
        let contract = notary.notarize_document(doc);
        let citation = store.write_contract(contract).await.unwrap();
        let name: Name = "/acme/orders/v1".parse().unwrap();
        assert!(!store.name_exists(&name).await.unwrap());
        store.write_name(&name, citation.clone()).await.unwrap();
        assert!(store.name_exists(&name).await.unwrap());
        assert!(matches!(store.write_name(&name, citation).await, Err(RepoError::NameExists(_))));
    }

    #[tokio::test]
    async fn writing_contract_deletes_matching_draft() {
        let (store, notary) = backend();
        let doc = Document::new("/acme/v1".parse().unwrap(), Permissions::public("alice"));
        let draft_citation = store.write_document(doc.clone()).await.unwrap();
        assert!(store.document_exists(&draft_citation).await.unwrap());
        let contract = notary.notarize_document(doc);
        store.write_contract(contract).await.unwrap();
        assert!(!store.document_exists(&draft_citation).await.unwrap());
    }

    #[tokio::test]
    async fn bag_respects_capacity_and_at_most_once_delivery() {
        let (store, notary) = backend();
        let bag_doc = Document::new("/bag/v1".parse().unwrap(), Permissions::public("alice"));
        let bag_contract = notary.notarize_document(bag_doc);
        let bag = store.write_contract(bag_contract).await.unwrap();

        let mut msg_doc = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        msg_doc.parameters.bag = Some(bag.clone());
        let message = notary.notarize_document(msg_doc);

        store.add_message(&bag, message.clone()).await.unwrap();
        assert_eq!(store.message_count(&bag).await.unwrap(), 1);
        assert!(matches!(store.add_message(&bag, message).await, Err(RepoError::MessageExists(..))));

        let borrowed = store.remove_message(&bag).await.unwrap().unwrap();
        assert_eq!(store.message_count(&bag).await.unwrap(), 0);
        assert!(store.remove_message(&bag).await.unwrap().is_none());

        store.return_message(&bag, borrowed).await.unwrap();
        assert_eq!(store.message_count(&bag).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_message_rejects_once_bag_is_at_capacity() {
        let (store, notary) = backend();
        let mut bag_doc = Document::new("/bag/v1".parse().unwrap(), Permissions::public("alice"));
        bag_doc.content.extend(BagParameters { capacity: 1, lease_seconds: 60 }.into_content());
        let bag_contract = notary.notarize_document(bag_doc);
        let bag = store.write_contract(bag_contract).await.unwrap();

        let mut first_doc = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        first_doc.parameters.bag = Some(bag.clone());
        store.add_message(&bag, notary.notarize_document(first_doc)).await.unwrap();

        let mut second_doc = Document::new("/msg/v2".parse().unwrap(), Permissions::public("alice"));
        second_doc.parameters.bag = Some(bag.clone());
        assert!(matches!(store.add_message(&bag, notary.notarize_document(second_doc)).await, Err(RepoError::BagFull(_))));

        store.remove_message(&bag).await.unwrap().unwrap();
        let mut third_doc = Document::new("/msg/v3".parse().unwrap(), Permissions::public("alice"));
        third_doc.parameters.bag = Some(bag.clone());
        assert!(matches!(store.add_message(&bag, notary.notarize_document(third_doc)).await, Err(RepoError::BagFull(_))));
    }
}
