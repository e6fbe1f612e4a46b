// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nebula::{BagParameters, DocumentRepository, Name, Notary, Permissions, StorageMechanism};
use nebula_persist_fs::LocalFs;

use crate::notary_store;

type Repo = DocumentRepository<nebula::Cached<nebula::Validated<LocalFs>>>;

#[derive(Parser)]
pub enum Cmd {
    /// Create the filesystem layout for a repository at `root`
    Init {
        root: PathBuf,
    },

    /// Generate a signing identity for `root` and write its self-signed certificate
    IssueCert {
        root: PathBuf,
    },

    /// Seed and save a new draft document, printing its citation
    Draft {
        root: PathBuf,
        /// Name of the document type this draft belongs to
        doc_type: String,
        /// Owning identity
        owner: String,
        #[clap(long)]
        private: bool,
        /// Repeatable `key=value` content attribute
        #[clap(long = "attr")]
        attrs: Vec<String>,
        /// Write the draft's text here instead of stdout
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Notarize a draft and bind `name` to the resulting contract
    Commit {
        root: PathBuf,
        name: String,
        /// Path to the draft text produced by `draft` or `checkout`
        draft: PathBuf,
    },

    /// Derive the next draft from the contract bound to `name`
    Checkout {
        root: PathBuf,
        name: String,
        #[clap(long)]
        level: Option<usize>,
        #[clap(long)]
        output: Option<PathBuf>,
    },

    #[clap(subcommand)]
    Bag(BagCmd),
}

#[derive(Subcommand)]
pub enum BagCmd {
    /// Create a bag contract
    Create {
        root: PathBuf,
        name: String,
        owner: String,
        #[clap(long, default_value_t = 10)]
        capacity: usize,
        #[clap(long, default_value_t = 60)]
        lease: u64,
    },
    /// Post a message document into a bag
    Post {
        root: PathBuf,
        bag: String,
        doc_type: String,
        owner: String,
        #[clap(long = "attr")]
        attrs: Vec<String>,
    },
    /// Claim one available message, printing its text and citation
    Borrow {
        root: PathBuf,
        bag: String,
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Permanently remove a borrowed message, given the file `borrow` wrote
    Accept {
        root: PathBuf,
        input: PathBuf,
    },
    /// Return a borrowed message to `available`, given the file `borrow` wrote
    Reject {
        root: PathBuf,
        input: PathBuf,
    },
}

fn parse_attrs(attrs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    attrs
        .iter()
        .map(|kv| {
            let (k, v) = kv.split_once('=').with_context(|| format!("attribute '{kv}' is not in key=value form"))?;
            Ok((k.to_owned(), v.to_owned()))
        })
        .collect()
}

async fn open_repo(root: &std::path::Path) -> anyhow::Result<Repo> {
    let notary = notary_store::load(root)?;
    let notary: Arc<dyn Notary> = Arc::new(notary);
    let fs = LocalFs::open(root, notary.clone()).await.context("opening filesystem repository root")?;
    let validated = nebula::Validated::new(fs, notary.clone());
    let cached = nebula::Cached::new(validated);
    Ok(DocumentRepository::new(cached, notary))
}

impl Cmd {
    pub async fn exec(self) -> anyhow::Result<()> {
        match self {
            Cmd::Init { root } => init(&root).await,
            Cmd::IssueCert { root } => issue_cert(&root).await,
            Cmd::Draft { root, doc_type, owner, private, attrs, output } => draft(&root, doc_type, owner, private, attrs, output).await,
            Cmd::Commit { root, name, draft } => commit(&root, name, draft).await,
            Cmd::Checkout { root, name, level, output } => checkout(&root, name, level, output).await,
            Cmd::Bag(bag) => bag.exec().await,
        }
    }
}

impl BagCmd {
    pub async fn exec(self) -> anyhow::Result<()> {
        match self {
            BagCmd::Create { root, name, owner, capacity, lease } => bag_create(&root, name, owner, capacity, lease).await,
            BagCmd::Post { root, bag, doc_type, owner, attrs } => bag_post(&root, bag, doc_type, owner, attrs).await,
            BagCmd::Borrow { root, bag, output } => bag_borrow(&root, bag, output).await,
            BagCmd::Accept { root, input } => bag_accept(&root, input).await,
            BagCmd::Reject { root, input } => bag_reject(&root, input).await,
        }
    }
}

async fn init(root: &std::path::Path) -> anyhow::Result<()> {
    let notary = notary_store::load(root).or_else(|_| notary_store::generate_and_save(root))?;
    LocalFs::open(root, Arc::new(notary)).await.context("creating repository layout")?;
    println!("initialized nebula repository at {}", root.display());
    Ok(())
}

async fn issue_cert(root: &std::path::Path) -> anyhow::Result<()> {
    let notary = notary_store::load(root).or_else(|_| notary_store::generate_and_save(root))?;
    let notary: Arc<dyn Notary> = Arc::new(notary);
    let fs = LocalFs::open(root, notary.clone()).await.context("creating repository layout")?;
    let credentials = notary.generate_credentials();
    match fs.write_contract(credentials).await {
        Ok(_) | Err(nebula::RepoError::ContractExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    println!("issued signing identity for {}", root.display());
    Ok(())
}

async fn draft(
    root: &std::path::Path,
    doc_type: String,
    owner: String,
    private: bool,
    attrs: Vec<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let doc_type: Name = doc_type.parse()?;
    let permissions = if private { Permissions::private(owner) } else { Permissions::public(owner) };
    let draft = repo.create_draft(doc_type, permissions, parse_attrs(&attrs)?);
    let citation = repo.save_draft(draft.clone()).await?;
    write_or_print(draft.to_text(), output)?;
    eprintln!("draft citation: {citation}");
    Ok(())
}

async fn commit(root: &std::path::Path, name: String, draft_path: PathBuf) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let name: Name = name.parse()?;
    let text = std::fs::read_to_string(&draft_path).with_context(|| format!("reading {}", draft_path.display()))?;
    let draft = nebula::codec::decode_document(&text)?;
    let citation = repo.commit(&name, draft).await?;
    println!("{citation}");
    Ok(())
}

async fn checkout(root: &std::path::Path, name: String, level: Option<usize>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let name: Name = name.parse()?;
    let draft = repo.checkout(&name, level).await?;
    repo.save_draft(draft.clone()).await?;
    write_or_print(draft.to_text(), output)
}

async fn bag_create(root: &std::path::Path, name: String, owner: String, capacity: usize, lease: u64) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let name: Name = name.parse()?;
    let citation = repo.create_bag(&name, Permissions::public(owner), BagParameters { capacity, lease_seconds: lease }).await?;
    println!("{citation}");
    Ok(())
}

async fn bag_post(root: &std::path::Path, bag: String, doc_type: String, owner: String, attrs: Vec<String>) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let bag: Name = bag.parse()?;
    let doc_type: Name = doc_type.parse()?;
    let message = repo.create_draft(doc_type, Permissions::public(owner), parse_attrs(&attrs)?);
    let citation = repo.post_message(&bag, message).await?;
    println!("{citation}");
    Ok(())
}

async fn bag_borrow(root: &std::path::Path, bag: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let bag: Name = bag.parse()?;
    match repo.borrow_message(&bag).await? {
        Some(message) => write_or_print(message.to_text(), output),
        None => {
            eprintln!("bag is empty");
            Ok(())
        }
    }
}

async fn bag_accept(root: &std::path::Path, input: PathBuf) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let text = std::fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
    let message = nebula::codec::decode_contract(&text)?;
    let message = repo.accept_message(&message).await?;
    println!("accepted {}", message.document.tag());
    Ok(())
}

async fn bag_reject(root: &std::path::Path, input: PathBuf) -> anyhow::Result<()> {
    let repo = open_repo(root).await?;
    let text = std::fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
    let message = nebula::codec::decode_contract(&text)?;
    repo.reject_message(message).await?;
    println!("rejected");
    Ok(())
}

fn write_or_print(text: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) => std::fs::write(&path, text).with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
