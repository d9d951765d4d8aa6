// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sutra", version, about = "Multi-agent coding orchestrator")]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify an input and print the intent/route decision as JSON
    Classify {
        /// The raw input text
        text: String,
    },
    /// Print the contextual router's tier decision for an input as JSON
    Route {
        /// The raw input text
        text: String,
        /// Prior memory hits to factor into the context
        #[arg(long, default_value_t = 0)]
        memory_hits: usize,
    },
    /// Run the protocol-mirror proxy
    Proxy {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8484")]
        listen: SocketAddr,
    },
}
