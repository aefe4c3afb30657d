//! Echo server built on `wiremux`.
//!
//! Every interaction model answers with the payloads it was sent.

mod cli;

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use log::info;
use wiremux::{
    HandlerError,
    InboundChannel,
    MuxServer,
    Payload,
    PayloadStream,
    RequestHandler,
};

struct Echo;

#[async_trait]
impl RequestHandler for Echo {
    async fn fire_and_forget(&self, payload: Payload) -> Result<(), HandlerError> {
        info!("fire-and-forget received: bytes={}", payload.data().len());
        Ok(())
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, HandlerError> {
        Ok(payload)
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        futures::stream::once(async move { Ok(payload) }).boxed()
    }

    fn request_channel(&self, inbound: InboundChannel) -> PayloadStream { inbound.boxed() }

    async fn metadata_push(&self, payload: Payload) -> Result<(), HandlerError> {
        info!(
            "metadata push received: bytes={}",
            payload.metadata().map_or(0, |m| m.len())
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("serving metrics: addr={addr}");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        log::warn!("--metrics-addr ignored: built without the metrics feature");
    }

    let mut server = MuxServer::new(|| -> Arc<dyn RequestHandler> { Arc::new(Echo) });
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    server.bind(cli.bind)?.run().await?;
    Ok(())
}
