//! Echo Worker - a worker process answering fetch requests over a pipe.
//!
//! This example demonstrates:
//! - Reading worker options from `WORKER_ENVIRONMENT`
//! - Announcing the pipe with a `$ready` line on stdout
//! - Routing requests by entry, with a default entry and a fallback handler
//!
//! # Running
//!
//! ```text
//! WORKER_ENVIRONMENT='{"name":"echo","entry":"upper"}' RUST_LOG=debug cargo run --example echo_worker
//! ```
//!
//! The parent reads the `$ready` line, connects to the announced pipe and
//! sends requests with a `Dispatcher`.

use tracing_subscriber::EnvFilter;
use worker_fetch::control::{listen, WorkerOptions};
use worker_fetch::{Request, Response, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout is the control plane
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = WorkerOptions::from_env().unwrap_or_else(|e| {
        tracing::warn!("Using default options: {}", e);
        WorkerOptions::default()
    });

    let channel = listen(&options).await?;

    let mut builder = Server::builder();
    if let Some(entry) = &options.entry {
        // requests that name no entry go to the configured one
        builder = builder.default_entry(entry.as_str());
    }

    builder
        .handle("upper", |mut req: Request| async move {
            let text = match req.take_body() {
                Some(body) => body.text().await?,
                None => String::new(),
            };
            Ok(Response::ok(text.to_uppercase()))
        })
        .fallback(|mut req: Request| async move {
            let content_type = req
                .headers()
                .get("content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = req.take_body().unwrap_or_default();
            Ok(Response::ok(body).with_header("content-type", content_type))
        })
        .build(channel)
        .run()
        .await;

    // Parent closed the pipe
    Ok(())
}
