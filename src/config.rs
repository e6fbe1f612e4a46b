// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration (§6A): `Defaults → TOML file → NEBULA_`-prefixed environment variables.

use serde::Deserialize;

/// S3 backend bucket/region settings (§4.6A, §9). Field names match
/// `nebula_persist_s3::Buckets` exactly: `type_bucket` holds drafts and `queue_bucket` holds
/// messages (the bucket-naming Open Question resolved in DESIGN.md), so there is no separate
/// `draft_bucket`.
#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub citation_bucket: String,
    pub document_bucket: String,
    pub type_bucket: String,
    pub queue_bucket: String,
    pub region: String,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            citation_bucket: "nebula-names".into(),
            document_bucket: "nebula-contracts".into(),
            type_bucket: "nebula-drafts".into(),
            queue_bucket: "nebula-messages".into(),
            region: "us-east-1".into(),
        }
    }
}

/// Which terminal [`StorageMechanism`](crate::storage::StorageMechanism) a binary should open
/// (§4.1 polymorphism, §6A): dynamic selection from config is the `Box<dyn StorageMechanism>`
/// case, as opposed to a single composition fixed at compile time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Remote,
    S3,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub root: String,
    #[serde(default)]
    pub backend: Backend,
    pub remote_uri: Option<String>,
    pub remote_timeout: u64,
    pub s3: S3Config,
    pub debug: u8,
    pub cache_capacity: usize,
    pub bag_capacity: usize,
    pub bag_lease: u64,
    /// Lease sweeper tick period in seconds. `0` disables the sweeper (the default).
    pub lease_sweep_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: default_root(),
            backend: Backend::default(),
            remote_uri: None,
            remote_timeout: 10,
            s3: S3Config::default(),
            debug: 1,
            cache_capacity: 256,
            bag_capacity: 10,
            bag_lease: 60,
            lease_sweep_interval: 0,
        }
    }
}

fn default_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    format!("{home}/.bali")
}

impl Config {
    /// Loads `Defaults → <path, if present> → NEBULA_*` (§6A). `path` is optional: a missing file
    /// is not an error, matching the teacher's tolerant params-file loading.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("root", defaults.root.clone())?
            .set_default("backend", "local")?
            .set_default("remote_timeout", defaults.remote_timeout)?
            .set_default("debug", defaults.debug as i64)?
            .set_default("cache_capacity", defaults.cache_capacity as i64)?
            .set_default("bag_capacity", defaults.bag_capacity as i64)?
            .set_default("bag_lease", defaults.bag_lease as i64)?
            .set_default("lease_sweep_interval", defaults.lease_sweep_interval as i64)?
            .set_default("s3.citation_bucket", defaults.s3.citation_bucket.clone())?
            .set_default("s3.document_bucket", defaults.s3.document_bucket.clone())?
            .set_default("s3.type_bucket", defaults.s3.type_bucket.clone())?
            .set_default("s3.queue_bucket", defaults.s3.queue_bucket.clone())?
            .set_default("s3.region", defaults.s3.region.clone())?;
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("NEBULA").separator("_"));
        builder.build()?.try_deserialize()
    }

    /// Maps `debug` (§6A) onto a `tracing_subscriber::EnvFilter` directive.
    pub fn log_filter(&self) -> &'static str {
        match self.debug {
            0 => "off",
            1 => "error",
            2 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.bag_capacity, 10);
        assert_eq!(cfg.cache_capacity, 256);
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let cfg = Config::load(Some("/nonexistent/nebula.toml")).unwrap();
        assert_eq!(cfg.remote_timeout, 10);
        assert_eq!(cfg.s3.queue_bucket, "nebula-messages");
    }
}
