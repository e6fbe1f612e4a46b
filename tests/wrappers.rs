// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the `Validated` and `Cached` wrappers layered over a real `LocalFs`
//! backend, demonstrating the value each adds over the bare filesystem.

use std::sync::Arc;

use nebula::citation::Name;
use nebula::storage::{Cached, Validated};
use nebula::{Document, Ed25519Notary, Notary, Permissions, RepoError, StorageMechanism};
use nebula_persist_fs::LocalFs;
use tempfile::TempDir;

/// S5. Tampering detection: corrupting a contract's bytes on disk is invisible to the bare
/// filesystem backend but caught by `Validated` on read.
#[tokio::test]
async fn tampered_contract_on_disk_is_caught_only_through_validated() {
    let dir = TempDir::new().unwrap();
    let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
    let fs = LocalFs::open(dir.path(), notary.clone()).await.unwrap();
    fs.write_contract(notary.generate_credentials()).await.unwrap();

    let doc = Document::new("/acme/report/v1".parse().unwrap(), Permissions::public("alice"));
    let contract = notary.notarize_document(doc);
    let citation = fs.write_contract(contract).await.unwrap();

    // Overwrite the stored contract file directly, bypassing every wrapper.
    let path = dir.path().join("contracts").join(format!("{}_{}.contract", citation.tag.filename(), citation.version.filename()));
    let mut text = tokio::fs::read_to_string(&path).await.unwrap();
    text.push_str("content.tampered: yes\n");
    tokio::fs::write(&path, text).await.unwrap();

    // The bare backend has no way to notice: it just returns whatever bytes are on disk.
    assert!(fs.read_contract(&citation).await.unwrap().is_some());

    let validated = Validated::new(fs, notary.clone());
    let err = validated.read_contract(&citation).await.unwrap_err();
    assert!(matches!(err, RepoError::ModifiedDocument(_) | RepoError::ContractInvalid(..)));
}

/// A name written once through `Cached<LocalFs>` is resolvable from the in-process cache even
/// for a fresh reader sharing the same cache instance, without a second filesystem read.
#[tokio::test]
async fn cached_local_fs_serves_names_written_through_it() {
    let dir = TempDir::new().unwrap();
    let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
    let fs = LocalFs::open(dir.path(), notary.clone()).await.unwrap();
    let cached = Cached::new(fs);

    let doc = Document::new("/acme/cert/v1".parse().unwrap(), Permissions::public("alice"));
    let contract = notary.notarize_document(doc);
    let citation = cached.write_contract(contract).await.unwrap();

    let name: Name = "/acme/cert-binding/v1".parse().unwrap();
    cached.write_name(&name, citation.clone()).await.unwrap();

    assert!(cached.name_exists(&name).await.unwrap());
    assert_eq!(cached.read_name(&name).await.unwrap(), Some(citation));
}
