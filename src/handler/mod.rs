//! Handler module - the fetch handlers a [`Server`](crate::Server) runs.
//!
//! Provides:
//! - [`Handler`] - a function from a [`Request`](crate::Request) to a
//!   [`Response`](crate::Response)
//! - [`HandlerRegistry`] - maps entry keys to handlers, with a fallback

mod registry;

pub use registry::{BoxError, BoxFuture, Handler, HandlerRegistry, HandlerResult};
