// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

//! Thin `axum` router translating real HTTP requests into [`RequestEngine`] calls (§9 "Server").

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, RawPathParams, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{on, MethodFilter};
use axum::Router;
use clap::Parser;
use nebula::citation::{Tag, Version};
use nebula::{Backend, Config, Ed25519Notary, Name, Notary, RepoError, StorageMechanism};
use nebula_api::RequestEngine;
use nebula_persist_fs::{LeaseSweeper, LocalFs};
use nebula_persist_remote::Remote;
use nebula_persist_s3::{Buckets, S3Backend};
use rusoto_core::Region;

#[derive(Parser, Debug)]
#[command(version, about = "Serves a Nebula document repository over HTTP")]
struct Cli {
    /// Path to a TOML config file, layered under defaults and NEBULA_ environment variables.
    #[arg(long)]
    config: Option<String>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<RequestEngine<Box<dyn StorageMechanism>>>,
}

/// Writes the notary's self-signed credentials contract if it isn't already present, the
/// bootstrap step every backend needs before anything citing those credentials can validate.
async fn bootstrap_credentials(storage: &dyn StorageMechanism, notary: &dyn Notary) -> anyhow::Result<()> {
    match storage.write_contract(notary.generate_credentials()).await {
        Ok(_) | Err(RepoError::ContractExists(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Opens the `StorageMechanism` named by `config.backend` (§4.1 polymorphism, §6A): `local` and
/// `s3` are self-contained stores that need their own credentials bootstrap, `remote` is a client
/// to a peer that already manages its own.
async fn open_backend(config: &Config, notary: Arc<dyn Notary>) -> anyhow::Result<Box<dyn StorageMechanism>> {
    match config.backend {
        Backend::Local => {
            let storage = LocalFs::open(&config.root, notary.clone()).await.context("opening filesystem repository root")?;
            bootstrap_credentials(&storage, notary.as_ref()).await?;
            if config.lease_sweep_interval > 0 {
                let sweeper = LeaseSweeper::new(Arc::new(storage.clone()), std::time::Duration::from_secs(config.lease_sweep_interval));
                sweeper.spawn();
            }
            Ok(Box::new(storage))
        }
        Backend::S3 => {
            let region: Region = config.s3.region.parse().with_context(|| format!("invalid s3 region '{}'", config.s3.region))?;
            let buckets = Buckets {
                citation_bucket: config.s3.citation_bucket.clone(),
                document_bucket: config.s3.document_bucket.clone(),
                type_bucket: config.s3.type_bucket.clone(),
                queue_bucket: config.s3.queue_bucket.clone(),
            };
            let storage = S3Backend::new(region, buckets, notary.clone());
            bootstrap_credentials(&storage, notary.as_ref()).await?;
            Ok(Box::new(storage))
        }
        Backend::Remote => {
            let uri = config.remote_uri.clone().context("backend=remote requires remote_uri to be set")?;
            let storage = Remote::new(uri, notary, std::time::Duration::from_secs(config.remote_timeout)).context("building remote client")?;
            Ok(Box::new(storage))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    tracing_subscriber::fmt().with_env_filter(config.log_filter()).init();

    let notary: Arc<dyn Notary> = Arc::new(Ed25519Notary::generate());
    let storage = open_backend(&config, notary).await?;
    let state = AppState { engine: Arc::new(RequestEngine::new(Arc::new(storage))) };

    let app = Router::new()
        .route("/repository/names/{*path}", on(MethodFilter::HEAD.or(MethodFilter::GET).or(MethodFilter::PUT), handle_names))
        .route(
            "/repository/documents/{tag}/{version}",
            on(MethodFilter::HEAD.or(MethodFilter::GET).or(MethodFilter::PUT).or(MethodFilter::DELETE), handle_documents),
        )
        .route("/repository/contracts/{tag}/{version}", on(MethodFilter::HEAD.or(MethodFilter::GET).or(MethodFilter::PUT), handle_contracts))
        .route(
            "/repository/messages/{tag}/{version}",
            on(MethodFilter::HEAD.or(MethodFilter::GET).or(MethodFilter::POST).or(MethodFilter::DELETE), handle_messages),
        )
        .route(
            "/repository/messages/{tag}/{version}/{mtag}/{mversion}",
            on(MethodFilter::PUT.or(MethodFilter::DELETE), handle_messages),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cli.listen).await.with_context(|| format!("binding {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "nebula-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn parse_path_param<T: std::str::FromStr>(params: &RawPathParams, key: &str) -> Result<T, StatusCode>
where
    T::Err: std::fmt::Display,
{
    params.iter().find(|(k, _)| *k == key).and_then(|(_, v)| v.parse().ok()).ok_or(StatusCode::BAD_REQUEST)
}

async fn handle_names(State(state): State<AppState>, method: Method, Path(path): Path<String>, body: Bytes) -> impl IntoResponse {
    let name: Name = match format!("/{path}").parse() {
        Ok(name) => name,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body = if body.is_empty() { None } else { Some(body) };
    respond(state.engine.handle_name(method, &name, body).await)
}

async fn handle_documents(State(state): State<AppState>, method: Method, params: RawPathParams, body: Bytes) -> impl IntoResponse {
    let (tag, version) = match (parse_path_param::<Tag>(&params, "tag"), parse_path_param::<Version>(&params, "version")) {
        (Ok(t), Ok(v)) => (t, v),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body = if body.is_empty() { None } else { Some(body) };
    respond(state.engine.handle_document(method, tag, version, body).await)
}

async fn handle_contracts(State(state): State<AppState>, method: Method, params: RawPathParams, body: Bytes) -> impl IntoResponse {
    let (tag, version) = match (parse_path_param::<Tag>(&params, "tag"), parse_path_param::<Version>(&params, "version")) {
        (Ok(t), Ok(v)) => (t, v),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body = if body.is_empty() { None } else { Some(body) };
    respond(state.engine.handle_contract(method, tag, version, body).await)
}

async fn handle_messages(State(state): State<AppState>, method: Method, params: RawPathParams, body: Bytes) -> impl IntoResponse {
    let (tag, version) = match (parse_path_param::<Tag>(&params, "tag"), parse_path_param::<Version>(&params, "version")) {
        (Ok(t), Ok(v)) => (t, v),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    let sub = match (parse_path_param::<Tag>(&params, "mtag"), parse_path_param::<Version>(&params, "mversion")) {
        (Ok(mt), Ok(mv)) => Some((mt, mv)),
        _ => None,
    };
    let body = if body.is_empty() { None } else { Some(body) };
    respond(state.engine.handle_message(method, tag, version, sub, body).await)
}

fn respond(result: Result<(StatusCode, Option<Bytes>, HeaderMap), RepoError>) -> axum::response::Response {
    match result {
        Ok((status, body, headers)) => (status, headers, body.unwrap_or_default()).into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::error!(%err, %status, "request failed");
            (status, err.to_string()).into_response()
        }
    }
}
