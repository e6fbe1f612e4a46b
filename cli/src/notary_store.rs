// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Persists the CLI's signing key as 32 raw bytes under `<root>/notary.key`, so `issue-cert` and
//! every later command against the same root share one identity.

use std::path::Path;

use anyhow::{bail, Context};
use ed25519_dalek::SigningKey;
use nebula::Ed25519Notary;

const KEY_FILENAME: &str = "notary.key";

pub fn generate_and_save(root: &Path) -> anyhow::Result<Ed25519Notary> {
    std::fs::create_dir_all(root).context("creating repository root")?;
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    std::fs::write(root.join(KEY_FILENAME), key.to_bytes()).context("saving notary key")?;
    Ok(Ed25519Notary::from_signing_key(key))
}

pub fn load(root: &Path) -> anyhow::Result<Ed25519Notary> {
    let path = root.join(KEY_FILENAME);
    let bytes = std::fs::read(&path).with_context(|| format!("reading {} (run `nebula issue-cert` first)", path.display()))?;
    let Ok(array) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("{} does not hold a 32-byte signing key", path.display());
    };
    Ok(Ed25519Notary::from_signing_key(SigningKey::from_bytes(&array)))
}
