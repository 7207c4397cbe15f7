//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Sequential agent service runtime
#[derive(Debug, Parser)]
#[command(name = "agent-runtime")]
#[command(about = "Runs a declared agent pipeline over HTTP, SSE and WebSocket")]
#[command(version)]
pub struct Cli {
    /// Service manifest (defaults to settings.manifest_path)
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Remote plugin catalog (defaults to settings.catalog_path)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to (defaults to server.host:server.port)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Invoke the service once and print the response
    Run {
        /// Inputs as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
    /// List catalog entries, or load one plugin and print its functions
    Catalog {
        #[arg(long)]
        plugin: Option<String>,
    },
}
