//! # worker-fetch
//!
//! Request/response bridge between a caller and a worker over one ordered
//! message channel.
//!
//! A [`Dispatcher`] turns a [`Request`] into protocol messages and resolves
//! with a [`Response`] whose body streams in as chunks arrive. A [`Server`]
//! rebuilds each request on the worker side, runs the fetch handler and
//! streams the response back. Many requests share the channel at once; every
//! message carries the id of the transfer it belongs to.
//!
//! ## Architecture
//!
//! - **Control Plane** (env + stdout): worker options and the `$ready` line
//! - **Data Plane** (named pipe): binary frames carrying protocol messages
//! - **In process**: [`MemoryChannel`] connects both sides without a pipe
//!
//! ## Example
//!
//! ```
//! use worker_fetch::{serve, Dispatcher, MemoryChannel, Request, Response};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> worker_fetch::Result<()> {
//! let (caller, worker) = MemoryChannel::pair();
//!
//! tokio::spawn(serve(worker, |req: Request| async move {
//!     Ok(Response::ok(format!("hello from {}", req.url())))
//! }));
//!
//! let dispatcher = Dispatcher::new(caller);
//! let response = dispatcher.dispatch(Request::get("/greet")).await?;
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.text().await?, "hello from /greet");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod http;
pub mod protocol;
pub mod pump;
pub mod registry;
pub mod server;
pub mod transport;

mod writer;

pub use channel::{Channel, ControlCallback, MemoryChannel, StreamChannel, Subscription};
pub use control::{ReadyMessage, WorkerOptions};
pub use dispatcher::{Dispatcher, DispatcherBuilder, Extra};
pub use error::{BridgeError, RemoteError, Result, Side};
pub use handler::{BoxError, Handler, HandlerResult};
pub use http::{Body, BodySender, Headers, Request, Response};
pub use server::{serve, ControlPort, Server, ServerBuilder};
