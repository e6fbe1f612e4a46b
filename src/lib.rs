// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
extern crate amplify;

pub mod citation;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod notary;
pub mod repository;
pub mod storage;

pub use citation::{Citation, Name, Tag, Version};
pub use config::{Backend, Config, S3Config};
pub use document::{BagParameters, Contract, Document, DocumentParameters, Message, Permissions};
pub use error::{RepoError, RepoResult};
pub use notary::{Ed25519Notary, Notary};
pub use repository::DocumentRepository;
pub use storage::{Cached, InMemory, StorageMechanism, Validated};
