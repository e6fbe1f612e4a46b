// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Filesystem [`StorageMechanism`] (§4.5): every kind lives under its own subdirectory of a root,
//! named by tag/version (or, for names, by path). Write-once kinds use `create_new` so the
//! filesystem itself enforces the no-overwrite invariant; bag delivery uses a rename-based claim
//! protocol so `removeMessage` never hands the same message to two callers racing on the same bag.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nebula::{Citation, Contract, Document, Message, Name, Notary, RepoError, RepoResult, StorageMechanism, Tag, Version};
use rand::seq::IteratorRandom;
use tracing::instrument;

type DraftKey = (Tag, Version);

fn io_err(module: &'static str, procedure: &'static str, err: io::Error) -> RepoError {
    if err.kind() == io::ErrorKind::NotFound {
        RepoError::Io(err)
    } else {
        RepoError::unexpected(module, procedure, err)
    }
}

/// Filesystem-backed [`StorageMechanism`] rooted at a single directory (§4.5, §6 filesystem
/// layout).
#[derive(Clone)]
pub struct LocalFs {
    root: PathBuf,
    notary: Arc<dyn Notary>,
}

impl LocalFs {
    /// Creates the backend, ensuring every subdirectory it needs exists.
    pub async fn open(root: impl Into<PathBuf>, notary: Arc<dyn Notary>) -> io::Result<Self> {
        let root = root.into();
        for sub in ["names", "drafts", "contracts", "bags"] {
            tokio::fs::create_dir_all(root.join(sub)).await?;
        }
        Ok(LocalFs { root, notary })
    }

    fn name_path(&self, name: &Name) -> PathBuf { self.root.join("names").join(format!("{}.name", sanitize(name.filename()))) }

    fn draft_path_of(&self, key: &DraftKey) -> PathBuf {
        self.root.join("drafts").join(format!("{}_{}.draft", key.0.filename(), key.1.filename()))
    }

    fn draft_path(&self, citation: &Citation) -> PathBuf { self.draft_path_of(&(citation.tag, citation.version.clone())) }

    fn contract_path(&self, citation: &Citation) -> PathBuf {
        self.root.join("contracts").join(format!("{}.contract", key_of(citation)))
    }

    fn bag_dir(&self, bag: &Citation) -> PathBuf { self.root.join("bags").join(key_of(bag)) }

    fn available_dir(&self, bag: &Citation) -> PathBuf { self.bag_dir(bag).join("available") }

    fn processing_dir(&self, bag: &Citation) -> PathBuf { self.bag_dir(bag).join("processing") }

    fn message_filename(message: &Message) -> String { format!("{}_{}.msg", message.document.tag().filename(), message.document.version().filename()) }

    async fn processing_count(&self, bag: &Citation) -> RepoResult<usize> {
        let dir = self.processing_dir(bag);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else { return Ok(0) };
        let mut count = 0;
        while entries.next_entry().await.map_err(|e| io_err("fs", "processing_count", e))?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

fn key_of(citation: &Citation) -> String { format!("{}_{}", citation.tag.filename(), citation.version.filename()) }

fn sanitize(path: &str) -> String { path.replace('/', "_") }

async fn write_new(path: &Path, text: &str) -> io::Result<bool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = tempfile::NamedTempFile::new_in(path.parent().expect("path has a parent"))?;
    use std::io::Write;
    temp.write_all(text.as_bytes())?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

async fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl StorageMechanism for LocalFs {
    async fn name_exists(&self, name: &Name) -> RepoResult<bool> { Ok(tokio::fs::try_exists(self.name_path(name)).await.map_err(|e| io_err("fs", "name_exists", e))?) }

    async fn read_name(&self, name: &Name) -> RepoResult<Option<Citation>> {
        let Some(text) = read_optional(&self.name_path(name)).await.map_err(|e| io_err("fs", "read_name", e))? else { return Ok(None) };
        Ok(Some(text.trim().parse().map_err(|e: nebula::citation::ParseError| RepoError::unexpected("fs", "read_name", e))?))
    }

    #[instrument(level = "trace", skip(self), fields(name = %name, citation = %citation), err)]
    async fn write_name(&self, name: &Name, citation: Citation) -> RepoResult<Citation> {
        let path = self.name_path(name);
        let ok = write_new(&path, &format!("{citation}\n")).await.map_err(|e| io_err("fs", "write_name", e))?;
        if !ok {
            return Err(RepoError::NameExists(name.clone()));
        }
        Ok(citation)
    }

    async fn document_exists(&self, citation: &Citation) -> RepoResult<bool> {
        Ok(tokio::fs::try_exists(self.draft_path(citation)).await.map_err(|e| io_err("fs", "document_exists", e))?)
    }

    async fn read_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        let Some(text) = read_optional(&self.draft_path(citation)).await.map_err(|e| io_err("fs", "read_document", e))? else { return Ok(None) };
        Ok(Some(nebula::codec::decode_document(&text)?))
    }

    async fn write_document(&self, document: Document) -> RepoResult<Citation> {
        let key = (document.tag(), document.version().clone());
        let path = self.draft_path_of(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_err("fs", "write_document", e))?;
        }
        tokio::fs::write(&path, document.to_text()).await.map_err(|e| io_err("fs", "write_document", e))?;
        Ok(self.notary.cite_document(&document))
    }

    async fn delete_document(&self, citation: &Citation) -> RepoResult<Option<Document>> {
        let previous = self.read_document(citation).await?;
        if previous.is_some() {
            tokio::fs::remove_file(self.draft_path(citation)).await.map_err(|e| io_err("fs", "delete_document", e))?;
        }
        Ok(previous)
    }

    async fn contract_exists(&self, citation: &Citation) -> RepoResult<bool> {
        Ok(tokio::fs::try_exists(self.contract_path(citation)).await.map_err(|e| io_err("fs", "contract_exists", e))?)
    }

    async fn read_contract(&self, citation: &Citation) -> RepoResult<Option<Contract>> {
        let Some(text) = read_optional(&self.contract_path(citation)).await.map_err(|e| io_err("fs", "read_contract", e))? else { return Ok(None) };
        Ok(Some(nebula::codec::decode_contract(&text)?))
    }

    #[instrument(level = "trace", skip_all, err)]
    async fn write_contract(&self, contract: Contract) -> RepoResult<Citation> {
        let citation = self.notary.cite_document(&contract.document);
        let path = self.contract_path(&citation);
        let ok = write_new(&path, &contract.to_text()).await.map_err(|e| io_err("fs", "write_contract", e))?;
        if !ok {
            return Err(RepoError::ContractExists(citation));
        }
        let _ = tokio::fs::remove_file(self.draft_path_of(&(citation.tag, citation.version.clone()))).await;
        Ok(citation)
    }

    async fn message_available(&self, bag: &Citation) -> RepoResult<bool> {
        Ok(self.message_count(bag).await? > 0)
    }

    async fn message_count(&self, bag: &Citation) -> RepoResult<usize> {
        let dir = self.available_dir(bag);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else { return Ok(0) };
        let mut count = 0;
        while entries.next_entry().await.map_err(|e| io_err("fs", "message_count", e))?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn add_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let contract = self.read_contract(bag).await?.ok_or_else(|| RepoError::NoBag(bag.clone()))?;
        let params = nebula::BagParameters::from_content(&contract.document.content);
        let dir = self.available_dir(bag);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err("fs", "add_message", e))?;
        let filename = Self::message_filename(&message);
        let processing_path = self.processing_dir(bag).join(&filename);
        if tokio::fs::try_exists(&processing_path).await.map_err(|e| io_err("fs", "add_message", e))? {
            return Err(RepoError::MessageExists(self.notary.cite_document(&message.document), bag.clone()));
        }
        let in_flight = self.message_count(bag).await? + self.processing_count(bag).await?;
        if in_flight >= params.capacity {
            return Err(RepoError::BagFull(bag.clone()));
        }
        let ok = write_new(&dir.join(&filename), &message.to_text()).await.map_err(|e| io_err("fs", "add_message", e))?;
        if !ok {
            return Err(RepoError::MessageExists(self.notary.cite_document(&message.document), bag.clone()));
        }
        Ok(())
    }

    /// Claims a message by renaming it from `available/` into `processing/`: the rename is atomic
    /// on a POSIX filesystem, so two racing claimants can never both succeed on the same file.
    #[instrument(level = "trace", skip(self), fields(bag = %bag), err)]
    async fn remove_message(&self, bag: &Citation) -> RepoResult<Option<Message>> {
        let available = self.available_dir(bag);
        let processing = self.processing_dir(bag);
        tokio::fs::create_dir_all(&processing).await.map_err(|e| io_err("fs", "remove_message", e))?;
        let Ok(mut entries) = tokio::fs::read_dir(&available).await else { return Ok(None) };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err("fs", "remove_message", e))? {
            names.push(entry.file_name());
        }
        let mut candidates: Vec<_> = names.into_iter().collect();
        loop {
            let chosen = {
                let mut rng = rand::thread_rng();
                candidates.iter().choose(&mut rng).cloned()
            };
            let Some(filename) = chosen else { break };
            let from = available.join(&filename);
            let to = processing.join(&filename);
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {
                    let text = tokio::fs::read_to_string(&to).await.map_err(|e| io_err("fs", "remove_message", e))?;
                    return Ok(Some(nebula::codec::decode_contract(&text)?));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    candidates.retain(|c| c != &filename);
                    continue;
                }
                Err(e) => return Err(io_err("fs", "remove_message", e)),
            }
        }
        Ok(None)
    }

    #[instrument(level = "trace", skip(self, message), fields(bag = %bag), err)]
    async fn return_message(&self, bag: &Citation, message: Message) -> RepoResult<()> {
        let filename = Self::message_filename(&message);
        let from = self.processing_dir(bag).join(&filename);
        if !tokio::fs::try_exists(&from).await.map_err(|e| io_err("fs", "return_message", e))? {
            return Err(RepoError::LeaseExpired(self.notary.cite_document(&message.document), bag.clone()));
        }
        tokio::fs::remove_file(&from).await.map_err(|e| io_err("fs", "return_message", e))?;
        let mut bumped = message;
        bumped.document.parameters.version = bumped.document.parameters.version.next(None);
        let to = self.available_dir(bag).join(Self::message_filename(&bumped));
        tokio::fs::write(&to, bumped.to_text()).await.map_err(|e| io_err("fs", "return_message", e))?;
        Ok(())
    }

    async fn delete_message(&self, bag: &Citation, citation: &Citation) -> RepoResult<Message> {
        let filename = format!("{}_{}.msg", citation.tag.filename(), citation.version.filename());
        let path = self.processing_dir(bag).join(&filename);
        let text = read_optional(&path).await.map_err(|e| io_err("fs", "delete_message", e))?
            .ok_or_else(|| RepoError::LeaseExpired(citation.clone(), bag.clone()))?;
        tokio::fs::remove_file(&path).await.map_err(|e| io_err("fs", "delete_message", e))?;
        nebula::codec::decode_contract(&text)
    }
}

fn parse_bag_key(entry: &str) -> Option<Citation> {
    let (tag_hex, version_part) = entry.rsplit_once('_')?;
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(tag_hex, &mut bytes).ok()?;
    let components = version_part.split('.').map(str::parse).collect::<Result<Vec<u32>, _>>().ok()?;
    Some(Citation { protocol: "nebula", tag: Tag::from_bytes(bytes), version: Version::new(components), digest: [0u8; 32] })
}

impl LocalFs {
    /// Scans every bag's `processing/` directory and returns any message whose lease (the bag
    /// contract's `lease_seconds`) has expired since it was claimed by `remove_message`.
    ///
    /// Returns the number of messages recovered back into `available/`.
    #[instrument(level = "trace", skip(self))]
    pub async fn sweep_expired_leases(&self) -> RepoResult<usize> {
        let bags_dir = self.root.join("bags");
        let Ok(mut bag_entries) = tokio::fs::read_dir(&bags_dir).await else { return Ok(0) };
        let mut swept = 0;
        while let Some(bag_entry) = bag_entries.next_entry().await.map_err(|e| io_err("fs", "sweep_expired_leases", e))? {
            let Some(bag) = parse_bag_key(&bag_entry.file_name().to_string_lossy()) else { continue };
            let Some(contract) = self.read_contract(&bag).await? else { continue };
            let params = nebula::BagParameters::from_content(&contract.document.content);
            let lease = std::time::Duration::from_secs(params.lease_seconds);

            let processing = self.processing_dir(&bag);
            let Ok(mut entries) = tokio::fs::read_dir(&processing).await else { continue };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_err("fs", "sweep_expired_leases", e))? {
                let path = entry.path();
                let Ok(metadata) = entry.metadata().await else { continue };
                let Ok(modified) = metadata.modified() else { continue };
                if modified.elapsed().unwrap_or_default() < lease {
                    continue;
                }
                let Ok(text) = tokio::fs::read_to_string(&path).await else { continue };
                let Ok(message) = nebula::codec::decode_contract(&text) else { continue };
                if self.return_message(&bag, message).await.is_ok() {
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

/// Periodically calls [`LocalFs::sweep_expired_leases`] on an interval (§9 "Lease sweeper").
/// Disabled by default; opt in by spawning it alongside the server or CLI daemon.
pub struct LeaseSweeper {
    storage: Arc<LocalFs>,
    period: std::time::Duration,
}

impl LeaseSweeper {
    pub fn new(storage: Arc<LocalFs>, period: std::time::Duration) -> Self { LeaseSweeper { storage, period } }

    /// Runs until the returned task is aborted or dropped; logs sweep failures rather than
    /// tearing down the caller's process over a single bad scan.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            loop {
                ticker.tick().await;
                match self.storage.sweep_expired_leases().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(recovered = n, "lease sweep recovered expired messages"),
                    Err(err) => tracing::error!(%err, "lease sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nebula::{Document, Ed25519Notary, Notary, Permissions};
    use tempfile::TempDir;

    use super::*;

    async fn backend() -> (LocalFs, TempDir, Arc<dyn Notary>) {
        let dir = TempDir::new().unwrap();
        let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
        let fs = LocalFs::open(dir.path(), notary.clone()).await.unwrap();
        (fs, dir, notary)
    }

    #[tokio::test]
    async fn name_write_once_on_disk() {
        let (fs, _dir, notary) = backend().await;
        let doc = Document::new("/acme/v1".parse().unwrap(), Permissions::public("alice"));
        let contract = notary.notarize_document(doc);
        let citation = fs.write_contract(contract).await.unwrap();
        let name: Name = "/acme/orders/v1".parse().unwrap();
        fs.write_name(&name, citation.clone()).await.unwrap();
        assert!(matches!(fs.write_name(&name, citation).await, Err(RepoError::NameExists(_))));
    }

    #[tokio::test]
    async fn writing_contract_removes_matching_draft_on_disk() {
        let (fs, _dir, notary) = backend().await;
        let doc = Document::new("/acme/v1".parse().unwrap(), Permissions::public("alice"));
        let draft_citation = fs.write_document(doc.clone()).await.unwrap();
        assert!(fs.document_exists(&draft_citation).await.unwrap());
        let contract = notary.notarize_document(doc);
        fs.write_contract(contract).await.unwrap();
        assert!(!fs.document_exists(&draft_citation).await.unwrap());
    }

    #[tokio::test]
    async fn bag_claim_is_at_most_once_across_concurrent_claimants() {
        let (fs, _dir, notary) = backend().await;
        let bag_doc = Document::new("/bag/v1".parse().unwrap(), Permissions::public("alice"));
        let bag_contract = notary.notarize_document(bag_doc);
        let bag = fs.write_contract(bag_contract).await.unwrap();

        let mut msg_doc = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        msg_doc.parameters.bag = Some(bag.clone());
        let message = notary.notarize_document(msg_doc);
        fs.add_message(&bag, message).await.unwrap();

        let a = fs.remove_message(&bag).await.unwrap();
        let b = fs.remove_message(&bag).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn add_message_rejects_once_bag_is_at_capacity() {
        let (fs, _dir, notary) = backend().await;
        let mut bag_doc = Document::new("/bag/v1".parse().unwrap(), Permissions::public("alice"));
        bag_doc.content.extend(nebula::BagParameters { capacity: 1, lease_seconds: 60 }.into_content());
        let bag_contract = notary.notarize_document(bag_doc);
        let bag = fs.write_contract(bag_contract).await.unwrap();

        let mut first_doc = Document::new("/msg/v1".parse().unwrap(), Permissions::public("alice"));
        first_doc.parameters.bag = Some(bag.clone());
        fs.add_message(&bag, notary.notarize_document(first_doc)).await.unwrap();

        let mut second_doc = Document::new("/msg/v2".parse().unwrap(), Permissions::public("alice"));
        second_doc.parameters.bag = Some(bag.clone());
        assert!(matches!(fs.add_message(&bag, notary.notarize_document(second_doc)).await, Err(RepoError::BagFull(_))));

        // Even a claimed (processing, not available) message still counts against capacity.
        fs.remove_message(&bag).await.unwrap().unwrap();
        let mut third_doc = Document::new("/msg/v3".parse().unwrap(), Permissions::public("alice"));
        third_doc.parameters.bag = Some(bag.clone());
        assert!(matches!(fs.add_message(&bag, notary.notarize_document(third_doc)).await, Err(RepoError::BagFull(_))));
    }
}
