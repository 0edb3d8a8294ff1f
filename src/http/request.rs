//! Request values handed to [`Dispatcher::dispatch`](crate::Dispatcher::dispatch)
//! and rebuilt for handlers on the server side.

use tokio_util::sync::CancellationToken;

use super::{Body, Headers};
use crate::protocol::{ExtraFields, RequestHead};

/// An HTTP-style request.
#[derive(Debug)]
pub struct Request {
    method: String,
    url: String,
    headers: Headers,
    body: Option<Body>,
    signal: Option<CancellationToken>,
}

impl Request {
    /// Create a request without headers or body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
            signal: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Shorthand for a `POST` request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<Body>) -> Self {
        Self::new("POST", url).with_body(body)
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

    /// Attach a cancellation signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub(crate) fn from_head(
        head: RequestHead,
        body: Option<Body>,
        signal: CancellationToken,
    ) -> Self {
        Self {
            method: head.method,
            url: head.url,
            headers: head.headers,
            body,
            signal: Some(signal),
        }
    }

    /// Metadata sent in `request-open`.
    pub(crate) fn head(&self, entry: Option<String>, extra: ExtraFields) -> RequestHead {
        RequestHead {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            has_body: self.has_transferable_body(),
            entry,
            extra,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the body, if any.
    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    /// Take the body out of the request.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// The cancellation signal, if any.
    ///
    /// On the server side every request carries one; it fires when the
    /// caller cancels the transfer.
    pub fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }

    /// Whether a body will be streamed for this request.
    ///
    /// `GET` and `HEAD` never send a body.
    pub fn has_transferable_body(&self) -> bool {
        let method = self.method.as_str();
        !method.eq_ignore_ascii_case("GET")
            && !method.eq_ignore_ascii_case("HEAD")
            && self.body.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_never_transfers_body() {
        let req = Request::get("/").with_body("ignored");
        assert!(!req.has_transferable_body());

        let req = Request::new("head", "/").with_body("ignored");
        assert!(!req.has_transferable_body());
    }

    #[test]
    fn test_post_with_and_without_body() {
        assert!(Request::post("/", "data").has_transferable_body());
        assert!(!Request::new("POST", "/").has_transferable_body());
    }

    #[test]
    fn test_builder_fields() {
        let token = CancellationToken::new();
        let mut req = Request::new("PUT", "http://localhost/x")
            .with_header("a", "1")
            .with_header("a", "2")
            .with_signal(token.clone());

        assert_eq!(req.method(), "PUT");
        assert_eq!(req.url(), "http://localhost/x");
        assert_eq!(req.headers().len(), 2);
        assert!(req.signal().is_some());
        assert!(req.take_body().is_none());
    }

    #[test]
    fn test_head_carries_routing_fields() {
        let mut extra = ExtraFields::new();
        extra.insert("trace".into(), serde_json::json!(1));
        let req = Request::post("/render", "body").with_header("x", "y");

        let head = req.head(Some("ssr".into()), extra.clone());
        assert_eq!(head.method, "POST");
        assert!(head.has_body);
        assert_eq!(head.entry.as_deref(), Some("ssr"));
        assert_eq!(head.extra, extra);
    }
}
