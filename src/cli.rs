//! Command line interface for the `wiremux` echo server.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wiremux` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wiremux",
    version,
    about = "Stream-multiplexing echo server"
)]
pub struct Cli {
    /// Address to accept connections on.
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    pub bind: SocketAddr,

    /// Number of accept workers. Defaults to one per CPU.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
