//! HTTP-shaped values carried across the channel.
//!
//! These are deliberately small: a method, a URL, ordered headers and a
//! streaming body for requests; a status, status text, ordered headers and a
//! streaming body for responses. Interpretation is left to handlers.

mod body;
mod headers;
mod request;
mod response;

pub use body::{Body, BodySender};
pub use headers::Headers;
pub use request::Request;
pub use response::Response;
