// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sutra_model::Message;
use sutra_proxy::ProxyService;
use sutra_router::{extract_context, Router};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = sutra_config::load(args.config.as_deref())?;

    match args.command {
        Command::Classify { text } => {
            let classification = sutra_classify::classify(&text);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Command::Route { text, memory_hits } => {
            let messages = vec![Message::user(&text)];
            let context = extract_context(&messages, None, &[], memory_hits, &config.router);
            let router = Router::new(config.router.clone());
            let decision = router.classify(context);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Proxy { listen } => {
            let service = Arc::new(ProxyService::new(config.proxy.clone()));
            sutra_proxy::serve(service, listen).await?;
        }
    }
    Ok(())
}
