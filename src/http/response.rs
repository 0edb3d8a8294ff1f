//! Response values returned by handlers and resolved by the dispatcher.

use bytes::Bytes;

use super::{Body, Headers};
use crate::error::Result;
use crate::protocol::ResponseHead;

/// An HTTP-style response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Option<Body>,
}

impl Response {
    /// Create a response with the given status and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// A `200` response with a body.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub(crate) fn from_head(head: ResponseHead, body: Option<Body>) -> Self {
        Self {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body,
        }
    }

    /// Metadata sent in `response-open`.
    pub(crate) fn head(&self) -> ResponseHead {
        ResponseHead {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            has_body: self.has_transferable_body(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the body, if any.
    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    /// Take the body out of the response.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Whether a body will be streamed for this response.
    ///
    /// A `204` never carries a body, even if one was attached.
    pub fn has_transferable_body(&self) -> bool {
        self.body.is_some() && self.status != 204
    }

    /// Drain the body into one buffer (empty if there is none).
    pub async fn bytes(mut self) -> Result<Bytes> {
        match self.body.take() {
            Some(body) => body.collect().await,
            None => Ok(Bytes::new()),
        }
    }

    /// Drain the body as UTF-8 text (empty if there is none).
    pub async fn text(mut self) -> Result<String> {
        match self.body.take() {
            Some(body) => body.text().await,
            None => Ok(String::new()),
        }
    }
}
