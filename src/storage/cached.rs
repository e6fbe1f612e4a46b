// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::citation::{Citation, Name};
use crate::document::{Contract, Document, Message};
use crate::error::RepoResult;
use crate::storage::StorageMechanism;

const DEFAULT_CAPACITY: usize = 256;

/// A bounded FIFO map: insertion order is eviction order, so `IndexMap` gives this for free
/// (§4.3) — no separate queue structure to keep in sync.
struct FifoCache<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K: std::hash::Hash + Eq, V> FifoCache<K, V> {
    fn new(capacity: usize) -> Self { FifoCache { capacity, entries: IndexMap::new() } }

    fn get(&self, key: &K) -> Option<&V> { self.entries.get(key) }

    fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn contains(&self, key: &K) -> bool { self.entries.contains_key(key) }
}

/// Wraps an inner [`StorageMechanism`] with a hot, in-process cache of immutable kinds only:
/// Names (→ Citation) and Contracts (→ Contract). Drafts, document-by-citation reads, and
/// messages pass straight through (§4.3) — only the write-once kinds are safe to cache without a
/// coherence protocol.
pub struct Cached<S: StorageMechanism> {
    inner: S,
    names: RwLock<FifoCache<Name, Citation>>,
    contracts: RwLock<FifoCache<Citation, Contract>>,
}

impl<S: StorageMechanism> Cached<S> {
    pub fn new(inner: S) -> Self { Self::with_capacity(inner, DEFAULT_CAPACITY) }

    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        Cached {
            inner,
            names: RwLock::new(FifoCache::new(capacity)),
            contracts: RwLock::new(FifoCache::new(capacity)),
        }
    }

    pub fn into_inner(self) -> S { self.inner }
}

#[async_trait]
impl<S: StorageMechanism> StorageMechanism for Cached<S> {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool> {
        if self.names.read().await.contains(name) {
            return Ok(true);
        }
        self.inner.name_exists(name).await
    }

    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>> {
        if let Some(citation) = self.names.read().await.get(name) {
            return Ok(Some(citation.clone()));
        }
        let citation = self.inner.read_name(name).await?;
        if let Some(citation) = &citation {
            self.names.write().await.insert(name.clone(), citation.clone());
        }
        Ok(citation)
    }

    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation> {
        let written = self.inner.write_name(name, citation).await?;
        self.names.write().await.insert(name.clone(), written.clone());
        Ok(written)
    }

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool> { self.inner.document_exists(citation).await }

    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>> { self.inner.read_document(citation).await }

    async fn write_document(&self, document: Document) -> RepoResult<Citation> { self.inner.write_document(document).await }

    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>> { self.inner.delete_document(citation).await }

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool> {
        if self.contracts.read().await.contains(citation) {
            return Ok(true);
        }
        self.inner.contract_exists(citation).await
    }

    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>> {
        if let Some(contract) = self.contracts.read().await.get(citation) {
            return Ok(Some(contract.clone()));
        }
        let contract = self.inner.read_contract(citation).await?;
        if let Some(contract) = &contract {
            self.contracts.write().await.insert(citation.clone(), contract.clone());
        }
        Ok(contract)
    }

    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation> {
        let citation = self.inner.write_contract(contract.clone()).await?;
        self.contracts.write().await.insert(citation.clone(), contract);
        Ok(citation)
    }

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool> { self.inner.message_available(bag).await }

    async fn message_count(&self, bag: &Citation) -> RepoResult<usize> { self.inner.message_count(bag).await }

    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()> { self.inner.add_message(bag, message).await }

    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>> { self.inner.remove_message(bag).await }

    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()> { self.inner.return_message(bag, message).await }

    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message> {
        self.inner.delete_message(bag, citation).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::Permissions;
    use crate::notary::{Ed25519Notary, Notary};
    use crate::storage::InMemory;

    #[tokio::test]
    async fn fifo_cache_evicts_oldest_entry_on_overflow() {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        let cached = Cached::with_capacity(InMemory::new(notary.clone()), 2);

        let mut citations = Vec::new();
        for i in 0..3 {
            let doc = Document::new(format!("/n/{i}").parse().unwrap(), Permissions::public("alice"));
            let contract = notary.notarize_document(doc);
            citations.push(cached.write_contract(contract).await.unwrap());
        }

        // the first-written contract's cache entry was evicted, but the backend still has it.
        assert!(!cached.contracts.read().await.contains(&citations[0]));
        assert!(cached.read_contract(&citations[0]).await.unwrap().is_some());
        assert!(cached.contracts.read().await.contains(&citations[2]));
    }

    #[tokio::test]
    async fn positive_name_cache_hit_short_circuits_backend() {
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        let cached = Cached::new(InMemory::new(notary.clone()));
        let doc = Document::new("/n/v1".parse().unwrap(), Permissions::public("alice"));
        let contract = notary.notarize_document(doc);
        let citation = cached.write_contract(contract).await.unwrap();
        let name: Name = "/acme/v1".parse().unwrap();
        cached.write_name(&name, citation).await.unwrap();
        assert!(cached.name_exists(&name).await.unwrap());
    }
}
