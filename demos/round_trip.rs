//! Round Trip - caller and worker in one process, connected by a real pipe.
//!
//! This example demonstrates:
//! - The `$ready` handshake between `listen` and `connect`
//! - Streaming a request body in chunks
//! - Several requests in flight on one channel
//!
//! # Running
//!
//! ```text
//! RUST_LOG=trace cargo run --example round_trip
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use worker_fetch::control::{connect, listen_with, WorkerOptions};
use worker_fetch::{Body, Dispatcher, Request, Response, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (ready_tx, ready_rx) = oneshot::channel();
    let worker = tokio::spawn(async move {
        let options = WorkerOptions {
            name: "round-trip".into(),
            ..Default::default()
        };
        let channel = listen_with(&options, |ready| {
            let _ = ready_tx.send(ready.clone());
            Ok(())
        })
        .await?;

        Server::builder()
            .fallback(|mut req: Request| async move {
                let delay = req.url().len() as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let size = match req.take_body() {
                    Some(body) => body.collect().await?.len(),
                    None => 0,
                };
                Ok(Response::ok(format!("{} {} ({} bytes)", req.method(), req.url(), size)))
            })
            .build(channel)
            .run()
            .await;
        Ok::<_, worker_fetch::BridgeError>(())
    });

    let ready = ready_rx.await?;
    println!("worker ready on {}", ready.pipe);

    let dispatcher = Dispatcher::new(connect(&ready).await?);

    // Chunked upload
    let (sender, body) = Body::channel();
    tokio::spawn(async move {
        for i in 0..4 {
            sender.send_chunk(Bytes::from(vec![b'x'; 1024 * (i + 1)]));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let response = dispatcher.dispatch(Request::post("/upload", body)).await?;
    println!("{} {}", response.status(), response.text().await?);

    // Concurrent requests finish out of order
    let urls = ["/a-much-longer-path", "/b", "/medium-path"];
    let responses = join_all(urls.iter().map(|url| dispatcher.dispatch(Request::get(*url)))).await;
    for response in responses {
        println!("{}", response?.text().await?);
    }

    drop(dispatcher);
    worker.await??;
    Ok(())
}
