// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0

mod cmd;
mod notary_store;

use clap::Parser;
use cmd::Cmd;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("error").init();
    Cmd::parse().exec().await
}
