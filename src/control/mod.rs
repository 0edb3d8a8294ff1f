//! Control plane module - worker options, the `$ready` handshake and stdio.
//!
//! The control plane uses JSON over the environment and stdout only to set
//! up the data plane. After the handshake every message travels over the
//! pipe as binary frames.
//!
//! # Workflow
//!
//! 1. Parent spawns the worker with [`WorkerOptions`] in `WORKER_ENVIRONMENT`
//! 2. Worker binds a pipe and prints a [`ReadyMessage`] on stdout
//! 3. Parent reads the ready line and connects to the pipe
//! 4. Both sides wrap the connection in a [`StreamChannel`](crate::StreamChannel)
//!
//! # Example
//!
//! ```ignore
//! use worker_fetch::control::{listen, WorkerOptions};
//! use worker_fetch::{serve, Response};
//!
//! let options = WorkerOptions::from_env()?;
//! let channel = listen(&options).await?;
//! serve(channel, |_req| async { Ok(Response::ok("hello")) }).await;
//! ```

mod options;
mod ready;
mod stdio;

use tracing::info;

pub use options::{WorkerOptions, WORKER_ENVIRONMENT_VAR};
pub use ready::{ReadyMessage, PROTOCOL_VERSION};
pub use stdio::{read_ready_line, write_stdout_json, write_stdout_line};

use crate::channel::StreamChannel;
use crate::error::Result;
use crate::transport::{generate_pipe_path, PipeListener, PipeStream};

/// Worker side: bind a pipe, print the ready line and accept the parent.
pub async fn listen(options: &WorkerOptions) -> Result<StreamChannel> {
    listen_with(options, |ready| write_stdout_json(ready)).await
}

/// Like [`listen`], announcing readiness through `announce` instead of
/// stdout.
pub async fn listen_with<F>(options: &WorkerOptions, announce: F) -> Result<StreamChannel>
where
    F: FnOnce(&ReadyMessage) -> Result<()>,
{
    let path = options.pipe.clone().unwrap_or_else(generate_pipe_path);
    let listener = PipeListener::bind(&path).await?;

    announce(&ReadyMessage::new(&options.name, listener.path()))?;

    let stream = listener.accept().await?;
    info!(name = %options.name, pipe = %path, "Parent connected");
    Ok(StreamChannel::new(stream))
}

/// Parent side: connect to the pipe a worker announced.
pub async fn connect(ready: &ReadyMessage) -> Result<StreamChannel> {
    let stream = PipeStream::connect(&ready.pipe).await?;
    info!(name = %ready.name, pipe = %ready.pipe, "Connected to worker");
    Ok(StreamChannel::new(stream))
}
