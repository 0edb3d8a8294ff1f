//! Worker side of the bridge.
//!
//! The [`ServerBuilder`] provides a fluent API for registering fetch
//! handlers. The [`Server`] owns one subscription on its channel and:
//! 1. Rebuilds a [`Request`] for every `request-open`, feeding its body from
//!    the `request-body` / `request-error` messages that follow
//! 2. Runs the selected handler on its own task
//! 3. Sends `response-open` and pumps the response body, or sends
//!    `response-error` if the handler fails first
//!
//! # Example
//!
//! ```no_run
//! use worker_fetch::{MemoryChannel, Request, Response, Server};
//!
//! # async fn run(channel: MemoryChannel) {
//! Server::builder()
//!     .handle("ssr", |req: Request| async move {
//!         Ok(Response::ok(format!("rendered {}", req.url())))
//!     })
//!     .fallback(|_req: Request| async move { Ok(Response::new(404)) })
//!     .max_concurrent_handlers(64)
//!     .build(channel)
//!     .run()
//!     .await;
//! # }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ControlCallback, Subscription};
use crate::error::{BridgeError, Result, Side};
use crate::handler::{Handler, HandlerRegistry, HandlerResult};
use crate::http::{Body, BodySender, Request};
use crate::protocol::{BodyPart, ErrorPayload, Message, RequestHead, RequestId};
use crate::pump::{pump_body, BodyDirection, PumpOutcome};
use crate::registry::Registry;

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    registry: HandlerRegistry,
    on_control: Option<ControlCallback>,
    max_concurrent_handlers: usize,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            on_control: None,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    /// Register a handler for requests routed to `entry`.
    pub fn handle<F, Fut>(mut self, entry: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(entry, handler);
        self
    }

    /// Register the handler for requests without a registered entry.
    pub fn fallback<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.set_fallback(handler);
        self
    }

    /// Route requests that name no entry to `entry`.
    ///
    /// Workers started with [`WorkerOptions`](crate::WorkerOptions) pass its
    /// `entry` here.
    pub fn default_entry(mut self, entry: impl Into<String>) -> Self {
        self.registry.set_default_entry(entry);
        self
    }

    /// Receive `runner-control` payloads sent by the dispatcher.
    pub fn on_control<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.on_control = Some(Arc::new(callback));
        self
    }

    /// Set the maximum number of concurrent handlers.
    ///
    /// When this limit is reached, new requests are answered with
    /// `response-error`.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Subscribe to `channel` and build the server.
    ///
    /// Messages that arrive before [`Server::run`] is polled are queued.
    pub fn build<C: Channel>(self, channel: C) -> Server {
        let inbox = channel.subscribe();
        Server {
            shared: Arc::new(Shared {
                channel: Box::new(channel),
                transfers: Mutex::new(Registry::new()),
            }),
            inbox,
            registry: self.registry,
            on_control: self.on_control,
            semaphore: Arc::new(Semaphore::new(self.max_concurrent_handlers)),
            max_concurrent_handlers: self.max_concurrent_handlers,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side state for one id, from `request-open` until the response ends.
struct Transfer {
    /// Feeds the handler's request body; `None` once that body has ended.
    body: Option<BodySender>,
    /// The handler's request signal. Also stops the response pump.
    cancel: CancellationToken,
}

struct Shared {
    channel: Box<dyn Channel>,
    transfers: Mutex<Registry<Transfer>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry<Transfer>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.channel.send(message) {
            tracing::debug!("Could not send {}: {}", kind, e);
        }
    }

    fn on_request_body(&self, id: RequestId, part: BodyPart) {
        let mut transfers = self.lock();
        let transfer = match transfers.get_mut(id) {
            Some(transfer) => transfer,
            None => {
                tracing::trace!("Dropping request-body for unknown id {}", id);
                return;
            }
        };
        let sink = match &transfer.body {
            Some(sink) => sink,
            None => {
                tracing::warn!("Dropping request-body for id {} without an open body", id);
                return;
            }
        };

        let (ended, stopped_reading) = match part {
            BodyPart::Chunk(chunk) => {
                let stopped = !sink.send_chunk(chunk);
                (stopped, stopped)
            }
            BodyPart::Done => (true, false),
        };
        if ended {
            transfer.body = None;
        }
        drop(transfers);

        if stopped_reading {
            tracing::debug!("Handler stopped reading the body of request {}", id);
            self.send(Message::ResponseCancel { id });
        }
    }

    fn on_request_error(&self, id: RequestId, error: ErrorPayload) {
        let sink = self.lock().get_mut(id).and_then(|transfer| transfer.body.take());
        match sink {
            Some(sink) => {
                tracing::debug!("Request body {} failed: {}", id, error.message);
                sink.fail(BridgeError::Remote(error.into_remote(Side::Dispatcher)));
            }
            None => tracing::trace!("Dropping request-error for id {} without an open body", id),
        }
    }

    fn on_request_cancel(&self, id: RequestId) {
        let transfer = self.lock().retire(id);
        match transfer {
            Some(transfer) => {
                tracing::debug!("Request {} cancelled by the caller", id);
                transfer.cancel.cancel();
                if let Some(sink) = transfer.body {
                    sink.fail(BridgeError::Cancelled);
                }
            }
            None => tracing::trace!("Dropping request-cancel for unknown id {}", id),
        }
    }

    /// Retire `id` after its response has ended.
    fn finish(&self, id: RequestId) {
        let transfer = self.lock().retire(id);
        if let Some(Transfer {
            body: Some(sink), ..
        }) = transfer
        {
            sink.fail(BridgeError::Cancelled);
        }
    }

    /// Retire `id` and report `error`, unless it already retired.
    fn finish_with_error(&self, id: RequestId, error: ErrorPayload) {
        if self.lock().retire(id).is_some() {
            self.send(Message::ResponseError { id, error });
        }
    }

    /// Fail everything in flight after the channel closed.
    fn close(&self) {
        let drained = self.lock().drain();
        if !drained.is_empty() {
            tracing::debug!("Cancelling {} in-flight requests", drained.len());
        }
        for (_, transfer) in drained {
            transfer.cancel.cancel();
            if let Some(sink) = transfer.body {
                sink.fail(BridgeError::ConnectionClosed);
            }
        }
    }
}

/// A running server: routes requests from a channel to fetch handlers.
///
/// Use [`run`](Self::run) to process messages until the channel closes.
pub struct Server {
    shared: Arc<Shared>,
    inbox: Subscription,
    registry: HandlerRegistry,
    on_control: Option<ControlCallback>,
    semaphore: Arc<Semaphore>,
    max_concurrent_handlers: usize,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Handle to send `runner-control` messages while the server runs.
    pub fn control_port(&self) -> ControlPort {
        ControlPort {
            shared: self.shared.clone(),
        }
    }

    /// Number of requests currently in flight.
    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    /// Process messages until the channel closes.
    ///
    /// In-flight handlers are cancelled when it does.
    pub async fn run(mut self) {
        tracing::debug!("Server started");
        while let Some(message) = self.inbox.recv().await {
            self.handle_message(message);
        }
        tracing::debug!("Server channel closed");
        self.shared.close();
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::RequestOpen { id, head } => self.on_request_open(id, head),
            Message::RequestBody { id, part } => self.shared.on_request_body(id, part),
            Message::RequestError { id, error } => self.shared.on_request_error(id, error),
            Message::RequestCancel { id } => self.shared.on_request_cancel(id),
            Message::RunnerControl { payload } => match &self.on_control {
                Some(callback) => callback(payload),
                None => tracing::trace!("Ignoring runner-control message"),
            },
            other => tracing::trace!("Server ignoring {} message", other.kind()),
        }
    }

    fn on_request_open(&self, id: RequestId, head: RequestHead) {
        if self.shared.lock().contains(id) {
            tracing::warn!("Dropping request-open for id {} which is still pending", id);
            return;
        }

        let handler = match self.registry.resolve(head.entry.as_deref()) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::error!("Request {} for {} rejected: {}", id, head.url, e);
                self.shared.send(Message::ResponseError {
                    id,
                    error: ErrorPayload::from_error(&e),
                });
                return;
            }
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("Handler capacity reached, rejecting request {}", id);
                self.shared.send(Message::ResponseError {
                    id,
                    error: ErrorPayload::new(
                        format!(
                            "Handler capacity reached ({} concurrent requests)",
                            self.max_concurrent_handlers
                        ),
                        None,
                    ),
                });
                return;
            }
        };

        let cancel = CancellationToken::new();
        let (sink, body) = if head.has_body {
            let (sink, body) = Body::channel();
            (Some(sink), Some(body))
        } else {
            (None, None)
        };

        tracing::trace!("Request {} {} {}", id, head.method, head.url);
        let request = Request::from_head(head, body, cancel.clone());
        if let Err(e) = self.shared.lock().register(
            id,
            Transfer {
                body: sink,
                cancel: cancel.clone(),
            },
        ) {
            tracing::warn!("Dropping request-open: {}", e);
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;
            run_transfer(shared, id, handler, request, cancel).await;
        });
    }
}

/// Run one handler and stream its response back.
async fn run_transfer(
    shared: Arc<Shared>,
    id: RequestId,
    handler: Arc<dyn Handler>,
    request: Request,
    cancel: CancellationToken,
) {
    let invocation = AssertUnwindSafe(async move { handler.call(request).await }).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("Handler for request {} cancelled", id);
            return;
        }
        outcome = invocation => outcome,
    };

    let mut response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!("Fetch handler failed for request {}: {}", id, err);
            shared.finish_with_error(id, ErrorPayload::from_error(&*err));
            return;
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Fetch handler panicked for request {}: {}", id, message);
            shared.finish_with_error(id, ErrorPayload::new(message, None));
            return;
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    let head = response.head();
    let body = if head.has_body {
        response.take_body()
    } else {
        None
    };
    drop(response);

    if shared.channel.send(Message::ResponseOpen { id, head }).is_err() {
        tracing::debug!("Channel closed before response {} was opened", id);
        shared.finish(id);
        return;
    }

    if let Some(body) = body {
        match pump_body(&shared.channel, id, BodyDirection::Response, body, &cancel).await {
            PumpOutcome::Failed(err) => {
                tracing::error!("Response body for request {} failed: {}", id, err)
            }
            PumpOutcome::Cancelled => tracing::trace!("Response body {} pump cancelled", id),
            PumpOutcome::ChannelClosed => {
                tracing::debug!("Channel closed while sending response body {}", id)
            }
            PumpOutcome::Completed => {}
        }
    }

    shared.finish(id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {}", message)
    } else {
        "Handler panicked".to_string()
    }
}

/// Sends `runner-control` messages on a server's channel.
#[derive(Clone)]
pub struct ControlPort {
    shared: Arc<Shared>,
}

impl ControlPort {
    /// Send an opaque payload to the dispatcher.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.shared.channel.send(Message::RunnerControl {
            payload: payload.into(),
        })
    }
}

/// Serve every request arriving on `channel` with `handler`.
///
/// Resolves when the channel closes.
pub async fn serve<C, F, Fut>(channel: C, handler: F)
where
    C: Channel,
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Server::builder().fallback(handler).build(channel).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::http::{Headers, Response};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn open(id: RequestId, method: &str, has_body: bool, entry: Option<&str>) -> Message {
        Message::RequestOpen {
            id,
            head: RequestHead {
                url: "http://localhost/".into(),
                method: method.into(),
                headers: Headers::new(),
                has_body,
                entry: entry.map(str::to_string),
                extra: Default::default(),
            },
        }
    }

    fn chunk(id: RequestId, data: &'static [u8]) -> Message {
        Message::RequestBody {
            id,
            part: BodyPart::Chunk(Bytes::from_static(data)),
        }
    }

    async fn next(inbox: &mut Subscription) -> Message {
        tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_get_response_with_body() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |_req: Request| async move {
            Ok(Response::ok("hi").with_header("content-type", "text/plain"))
        }));

        caller.send(open(0, "GET", false, None)).unwrap();

        match next(&mut inbox).await {
            Message::ResponseOpen { id: 0, head } => {
                assert_eq!(head.status, 200);
                assert!(head.has_body);
                assert_eq!(head.headers.get("content-type"), Some("text/plain"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            next(&mut inbox).await,
            Message::ResponseBody {
                id: 0,
                part: BodyPart::Chunk(Bytes::from_static(b"hi"))
            }
        );
        assert_eq!(
            next(&mut inbox).await,
            Message::ResponseBody {
                id: 0,
                part: BodyPart::Done
            }
        );
    }

    #[tokio::test]
    async fn test_204_is_sent_without_body() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |_req: Request| async move {
            Ok(Response::new(204).with_body("ignored"))
        }));

        caller.send(open(0, "DELETE", false, None)).unwrap();
        match next(&mut inbox).await {
            Message::ResponseOpen { head, .. } => {
                assert_eq!(head.status, 204);
                assert!(!head.has_body);
            }
            other => panic!("unexpected {:?}", other),
        }

        caller.send(open(1, "DELETE", false, None)).unwrap();
        assert!(matches!(next(&mut inbox).await, Message::ResponseOpen { id: 1, .. }));
    }

    #[tokio::test]
    async fn test_handler_error_sends_only_response_error() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |_req: Request| async move {
            Err(BridgeError::Protocol("bad template".into()).into())
        }));

        caller.send(open(4, "GET", false, None)).unwrap();
        assert_eq!(
            next(&mut inbox).await,
            Message::ResponseError {
                id: 4,
                error: ErrorPayload::new("Protocol error: bad template", None),
            }
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_reports_error() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |req: Request| async move {
            if req.url().ends_with('/') {
                panic!("render failed");
            }
            Ok(Response::new(200))
        }));

        caller.send(open(0, "GET", false, None)).unwrap();
        match next(&mut inbox).await {
            Message::ResponseError { id: 0, error } => {
                assert_eq!(error.message, "Handler panicked: render failed");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_entry_routing() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        let server = Server::builder()
            .handle("ssr", |_req: Request| async move { Ok(Response::new(201)) })
            .build(worker);
        tokio::spawn(server.run());

        caller.send(open(0, "GET", false, Some("ssr"))).unwrap();
        assert!(matches!(
            next(&mut inbox).await,
            Message::ResponseOpen { id: 0, ref head } if head.status == 201
        ));

        caller.send(open(1, "GET", false, Some("missing"))).unwrap();
        match next(&mut inbox).await {
            Message::ResponseError { id: 1, error } => {
                assert_eq!(error.message, "No fetch handler registered for entry 'missing'");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_entry_serves_requests_without_entry() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        let server = Server::builder()
            .handle("ssr", |_req: Request| async move { Ok(Response::new(201)) })
            .handle("api", |_req: Request| async move { Ok(Response::new(202)) })
            .default_entry("ssr")
            .build(worker);
        tokio::spawn(server.run());

        caller.send(open(0, "GET", false, None)).unwrap();
        assert!(matches!(
            next(&mut inbox).await,
            Message::ResponseOpen { id: 0, ref head } if head.status == 201
        ));

        caller.send(open(1, "GET", false, Some("api"))).unwrap();
        assert!(matches!(
            next(&mut inbox).await,
            Message::ResponseOpen { id: 1, ref head } if head.status == 202
        ));
    }

    #[tokio::test]
    async fn test_interleaved_request_bodies_stay_separate() {
        use std::collections::HashMap;

        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |mut req: Request| async move {
            let body = req.take_body().unwrap_or_default().collect().await?;
            Ok(Response::ok(body))
        }));

        let done = |id| Message::RequestBody {
            id,
            part: BodyPart::Done,
        };
        caller.send(open(0, "POST", true, None)).unwrap();
        caller.send(open(1, "POST", true, None)).unwrap();
        caller.send(chunk(0, b"A1")).unwrap();
        caller.send(chunk(1, b"B1")).unwrap();
        caller.send(chunk(0, b"A2")).unwrap();
        caller.send(chunk(1, b"B2")).unwrap();
        caller.send(done(0)).unwrap();
        caller.send(done(1)).unwrap();

        let mut bodies: HashMap<RequestId, Vec<u8>> = HashMap::new();
        let mut finished = 0;
        while finished < 2 {
            match next(&mut inbox).await {
                Message::ResponseOpen { .. } => {}
                Message::ResponseBody {
                    id,
                    part: BodyPart::Chunk(data),
                } => bodies.entry(id).or_default().extend_from_slice(&data),
                Message::ResponseBody {
                    part: BodyPart::Done,
                    ..
                } => finished += 1,
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(bodies[&0], b"A1A2");
        assert_eq!(bodies[&1], b"B1B2");
    }

    #[tokio::test]
    async fn test_request_body_reaches_handler_in_order() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |mut req: Request| async move {
            let body = req.take_body().unwrap_or_default().collect().await?;
            Ok(Response::ok(body))
        }));

        caller.send(open(0, "POST", true, None)).unwrap();
        caller.send(chunk(0, b"one,")).unwrap();
        caller.send(chunk(0, b"two,")).unwrap();
        caller.send(chunk(0, b"three")).unwrap();
        caller
            .send(Message::RequestBody {
                id: 0,
                part: BodyPart::Done,
            })
            .unwrap();

        assert!(matches!(next(&mut inbox).await, Message::ResponseOpen { id: 0, .. }));
        assert_eq!(
            next(&mut inbox).await,
            Message::ResponseBody {
                id: 0,
                part: BodyPart::Chunk(Bytes::from_static(b"one,two,three"))
            }
        );
    }

    #[tokio::test]
    async fn test_request_error_fails_handler_body() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |mut req: Request| async move {
            let body = req.take_body().unwrap_or_default().collect().await?;
            Ok(Response::ok(body))
        }));

        caller.send(open(0, "POST", true, None)).unwrap();
        caller.send(chunk(0, b"partial")).unwrap();
        caller
            .send(Message::RequestError {
                id: 0,
                error: ErrorPayload::new("upload aborted", None),
            })
            .unwrap();

        assert_eq!(
            next(&mut inbox).await,
            Message::ResponseError {
                id: 0,
                error: ErrorPayload::new("upload aborted", None),
            }
        );
    }

    #[tokio::test]
    async fn test_capacity_answers_with_error() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        let release = Arc::new(Notify::new());
        let server = {
            let release = release.clone();
            Server::builder()
                .fallback(move |_req: Request| {
                    let release = release.clone();
                    async move {
                        release.notified().await;
                        Ok(Response::new(200))
                    }
                })
                .max_concurrent_handlers(1)
                .build(worker)
        };
        tokio::spawn(server.run());

        caller.send(open(0, "GET", false, None)).unwrap();
        caller.send(open(1, "GET", false, None)).unwrap();

        match next(&mut inbox).await {
            Message::ResponseError { id: 1, error } => {
                assert!(error.message.contains("capacity"));
            }
            other => panic!("unexpected {:?}", other),
        }

        release.notify_one();
        assert!(matches!(next(&mut inbox).await, Message::ResponseOpen { id: 0, .. }));
    }

    #[tokio::test]
    async fn test_request_cancel_fires_signal() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        let observed = Arc::new(AtomicBool::new(false));
        let started = Arc::new(Notify::new());

        let server = {
            let observed = observed.clone();
            let started = started.clone();
            Server::builder()
                .fallback(move |req: Request| {
                    let observed = observed.clone();
                    let started = started.clone();
                    async move {
                        let signal = req.signal().cloned().unwrap_or_default();
                        // The handler future is dropped on cancel, so watch from a task.
                        tokio::spawn(async move {
                            signal.cancelled().await;
                            observed.store(true, Ordering::SeqCst);
                        });
                        started.notify_one();
                        std::future::pending::<()>().await;
                        Ok(Response::new(200))
                    }
                })
                .build(worker)
        };
        let port = server.control_port();
        tokio::spawn(server.run());

        caller.send(open(0, "GET", false, None)).unwrap();
        started.notified().await;
        caller.send(Message::RequestCancel { id: 0 }).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !observed.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        // Nothing is sent for a cancelled request.
        port.send("marker").unwrap();
        assert_eq!(
            next(&mut inbox).await,
            Message::RunnerControl {
                payload: Bytes::from_static(b"marker")
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_request_body_sends_response_cancel() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        let release = Arc::new(Notify::new());
        let server = {
            let release = release.clone();
            Server::builder()
                .fallback(move |mut req: Request| {
                    let release = release.clone();
                    async move {
                        drop(req.take_body());
                        release.notified().await;
                        Ok(Response::new(200))
                    }
                })
                .build(worker)
        };
        tokio::spawn(server.run());

        caller.send(open(0, "POST", true, None)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.send(chunk(0, b"ignored")).unwrap();

        assert_eq!(next(&mut inbox).await, Message::ResponseCancel { id: 0 });
        release.notify_one();
        assert!(matches!(next(&mut inbox).await, Message::ResponseOpen { id: 0, .. }));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_dropped() {
        let (caller, worker) = MemoryChannel::pair();
        let mut inbox = caller.subscribe();
        tokio::spawn(serve(worker, |_req: Request| async move { Ok(Response::new(200)) }));

        caller.send(chunk(42, b"stray")).unwrap();
        caller.send(Message::RequestCancel { id: 43 }).unwrap();
        caller.send(open(0, "GET", false, None)).unwrap();

        assert!(matches!(next(&mut inbox).await, Message::ResponseOpen { id: 0, .. }));
    }

    #[tokio::test]
    async fn test_control_callback() {
        let (caller, worker) = MemoryChannel::pair();
        let seen = Arc::new(Notify::new());
        let server = {
            let seen = seen.clone();
            Server::builder()
                .on_control(move |payload| {
                    assert_eq!(payload, Bytes::from_static(b"invalidate"));
                    seen.notify_one();
                })
                .build(worker)
        };
        tokio::spawn(server.run());

        caller
            .send(Message::RunnerControl {
                payload: Bytes::from_static(b"invalidate"),
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), seen.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_when_channel_closes() {
        let (caller, worker) = MemoryChannel::pair();
        let server = Server::builder().build(worker);
        let run = tokio::spawn(server.run());

        caller.close();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
    }
}
