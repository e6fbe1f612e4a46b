// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for [`DocumentRepository`] against the `InMemory` backend, covering the
//! name lifecycle, checkout versioning, and concurrent bag access.

use std::sync::Arc;

use nebula::citation::Name;
use nebula::storage::InMemory;
use nebula::{DocumentRepository, Ed25519Notary, Notary, Permissions, StorageMechanism};

fn repo() -> DocumentRepository<InMemory> {
    let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
    DocumentRepository::new(InMemory::new(notary.clone()), notary)
}

/// S1. Name lifecycle: a self-signed certificate is committed, named once, and a second binding
/// attempt on the same name is rejected regardless of which citation it carries.
#[tokio::test]
async fn name_lifecycle_binds_once() {
    let repo = repo();
    let name: Name = "/demo/cert/v1".parse().unwrap();

    let cert = repo.create_draft("/nebula/certificate/v1".parse().unwrap(), Permissions::public("alice"), []);
    assert!(!repo.storage().name_exists(&name).await.unwrap());

    let cite0 = repo.commit(&name, cert).await.unwrap();
    assert!(repo.storage().name_exists(&name).await.unwrap());
    assert_eq!(repo.storage().read_name(&name).await.unwrap(), Some(cite0.clone()));

    let other = repo.create_draft("/nebula/certificate/v1".parse().unwrap(), Permissions::public("alice"), []);
    let other_name: Name = "/demo/other/v1".parse().unwrap();
    let cite1 = repo.commit(&other_name, other).await.unwrap();
    assert_ne!(cite0, cite1);

    let redo = repo.create_draft("/nebula/certificate/v1".parse().unwrap(), Permissions::public("alice"), []);
    assert!(matches!(repo.commit(&name, redo).await, Err(nebula::RepoError::NameExists(_))));
}

/// S3. Checking out at a given level bumps that component and resets trailing ones to 1,
/// citing the contract it was derived from: `v1.2.3` at `level=2` becomes `v1.3.1`.
#[tokio::test]
async fn checkout_at_explicit_level_resets_trailing_components() {
    use nebula::citation::Version;

    let repo = repo();
    let name: Name = "/acme/widgets/v1".parse().unwrap();
    let mut draft = repo.create_draft("/acme/widget-type/v1".parse().unwrap(), Permissions::public("alice"), []);
    draft.parameters.version = Version::new(vec![1, 2, 3]);
    let first = repo.commit(&name, draft).await.unwrap();

    let next = repo.checkout(&name, Some(2)).await.unwrap();
    assert_eq!(next.version().components(), &[1, 3, 1]);
    assert_eq!(next.parameters.previous, Some(first));
}

/// S6. Two concurrent borrows against a one-message bag: exactly one succeeds, the other finds
/// the bag empty, and nothing is lost or duplicated in between.
#[tokio::test]
async fn concurrent_borrow_on_single_message_bag_is_exclusive() {
    use nebula::BagParameters;

    let repo = Arc::new(repo());
    let bag_name: Name = "/acme/queue/v1".parse().unwrap();
    repo.create_bag(&bag_name, Permissions::public("alice"), BagParameters { capacity: 1, lease_seconds: 60 })
        .await
        .unwrap();
    let msg = repo.create_draft("/acme/task/v1".parse().unwrap(), Permissions::public("alice"), []);
    repo.post_message(&bag_name, msg).await.unwrap();

    let a = tokio::spawn({
        let repo = repo.clone();
        let bag_name = bag_name.clone();
        async move { repo.borrow_message(&bag_name).await.unwrap() }
    });
    let b = tokio::spawn({
        let repo = repo.clone();
        let bag_name = bag_name.clone();
        async move { repo.borrow_message(&bag_name).await.unwrap() }
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let successes = [a.is_some(), b.is_some()].into_iter().filter(|x| *x).count();
    assert_eq!(successes, 1, "exactly one of two concurrent borrows should succeed");

    let bag_citation = repo.storage().read_name(&bag_name).await.unwrap().unwrap();
    assert_eq!(repo.storage().message_count(&bag_citation).await.unwrap(), 0);
}
