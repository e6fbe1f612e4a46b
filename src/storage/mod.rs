// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! The [`StorageMechanism`] contract (§4.1) — the pivot of the design. Every concrete backend
//! (`InMemory`, and the `LocalFS`/`Remote`/`S3` backends in their own crates) and every wrapper
//! (`Cached`, `Validated`) implements this same trait, so they compose freely:
//! `Cached<Validated<LocalFS>>` and a bare `InMemory` both satisfy a `DocumentRepository<S>`.

pub mod cached;
pub mod inmemory;
pub mod validated;

use async_trait::async_trait;

use crate::citation::{Citation, Name};
use crate::document::{Contract, Document, Message};
use crate::error::RepoResult;

pub use cached::Cached;
pub use inmemory::InMemory;
pub use validated::Validated;

/// Asynchronous storage contract shared by every backend and wrapper (§4.1).
///
/// Every method may suspend at any I/O call; implementations MUST NOT assume a particular
/// executor or threading model (§5).
#[async_trait]
pub trait StorageMechanism: Send + Sync {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool>;
    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>>;
    /// Fails `nameExists` if `name` is already bound.
    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation>;

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool>;
    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>>;
    /// Overwrite at the same `(tag, version)` is allowed; fails `documentExists` if a contract
    /// already exists there.
    async fn write_document(&self, document: Document) -> RepoResult<Citation>;
    /// Returns the prior bytes, if any were present.
    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>>;

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool>;
    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>>;
    /// Fails `contractExists` if already written; deletes any draft at the same `(tag, version)`
    /// as a side effect (invariant 4, §3).
    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation>;

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool>;
    /// Count of `available` only (§4.1).
    async fn message_count(&self, bag: &Citation) -> RepoResult<usize>;
    /// Fails `bagFull` at capacity, `messageExists` on a duplicate `(tag, version)`.
    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()>;
    /// Selects one message at random from `available`, atomically moves it to `processing`.
    /// Returns `None` once the partition is exhausted, retrying internally on lost claim races.
    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>>;
    /// Fails `leaseExpired` if `message` is not currently in `processing`; otherwise bumps its
    /// version and re-adds it to `available`.
    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()>;
    /// Fails `leaseExpired` if not in `processing`; removes permanently.
    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message>;
}

/// Forwards to the boxed backend, letting `Box<dyn StorageMechanism>` itself satisfy any `S:
/// StorageMechanism` bound — the dynamic-dispatch half of the polymorphism described in §4.1:
/// generics fix a single composition at compile time, this lets a binary choose one at runtime
/// (e.g. the server selecting `LocalFs`/`S3`/`Remote` from config).
#[async_trait]
impl StorageMechanism for Box<dyn StorageMechanism> {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool> { (**self).name_exists(name).await }
    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>> { (**self).read_name(name).await }
    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation> { (**self).write_name(name, citation).await }

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool> { (**self).document_exists(citation).await }
    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>> { (**self).read_document(citation).await }
    async fn write_document(&self, document: Document) -> RepoResult<Citation> { (**self).write_document(document).await }
    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>> { (**self).delete_document(citation).await }

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool> { (**self).contract_exists(citation).await }
    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>> { (**self).read_contract(citation).await }
    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation> { (**self).write_contract(contract).await }

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool> { (**self).message_available(bag).await }
    async fn message_count(&self, bag: &Citation) -> RepoResult<usize> { (**self).message_count(bag).await }
    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()> { (**self).add_message(bag, message).await }
    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>> { (**self).remove_message(bag).await }
    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()> { (**self).return_message(bag, message).await }
    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message> { (**self).delete_message(bag, citation).await }
}
