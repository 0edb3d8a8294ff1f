//! Caller side of the bridge.
//!
//! A [`Dispatcher`] owns one subscription on its channel and one
//! demultiplexing task. Each [`dispatch`](Dispatcher::dispatch) registers a
//! [`PendingResponse`] under a fresh id; the demux task moves it from
//! awaiting the `response-open` to streaming the response body and retires it
//! on the single terminal message for that id.
//!
//! ```text
//! dispatch() ── request-open ─────────────────────────►
//!            ── request-body* (pump task) ────────────►   Server
//!   demux    ◄─ response-open / response-body* / -error ─
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ControlCallback, Subscription};
use crate::error::{BridgeError, Result, Side};
use crate::http::{Body, BodySender, Request, Response};
use crate::protocol::{BodyPart, ErrorPayload, ExtraFields, Message, RequestId, ResponseHead};
use crate::pump::{pump_body, BodyDirection, PumpOutcome};
use crate::registry::Registry;

/// Routing metadata merged into `request-open`.
///
/// The bridge carries these fields without interpreting them; the server
/// uses `entry` to pick a handler.
#[derive(Debug, Clone, Default)]
pub struct Extra {
    /// Routing key selecting the handler on the server.
    pub entry: Option<String>,
    /// Free-form fields.
    pub fields: ExtraFields,
}

impl Extra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route to the handler registered under `entry`.
    pub fn entry(entry: impl Into<String>) -> Self {
        Self {
            entry: Some(entry.into()),
            fields: ExtraFields::new(),
        }
    }

    /// Add a free-form field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Dispatcher-side state for one id.
enum PendingResponse {
    /// Waiting for `response-open`.
    AwaitingOpen {
        resolve: oneshot::Sender<Result<Response>>,
        transfer: CancellationToken,
        pump: CancellationToken,
    },
    /// Response resolved; feeding its body.
    Streaming {
        sink: BodySender,
        transfer: CancellationToken,
        pump: CancellationToken,
    },
}

impl PendingResponse {
    fn transfer(&self) -> &CancellationToken {
        match self {
            PendingResponse::AwaitingOpen { transfer, .. }
            | PendingResponse::Streaming { transfer, .. } => transfer,
        }
    }

    fn pump(&self) -> &CancellationToken {
        match self {
            PendingResponse::AwaitingOpen { pump, .. } | PendingResponse::Streaming { pump, .. } => {
                pump
            }
        }
    }

    /// Deliver `err` as the terminal event and stop the transfer.
    fn fail(self, err: BridgeError) {
        match self {
            PendingResponse::AwaitingOpen {
                resolve, transfer, ..
            } => {
                let _ = resolve.send(Err(err));
                transfer.cancel();
            }
            PendingResponse::Streaming { sink, transfer, .. } => {
                sink.fail(err);
                transfer.cancel();
            }
        }
    }
}

struct State {
    registry: Registry<PendingResponse>,
    closed: bool,
}

struct Shared<C> {
    channel: C,
    state: Mutex<State>,
}

impl<C: Channel> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign an id and register the pending response under it.
    fn begin(&self, pending: PendingResponse) -> Result<RequestId> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::ConnectionClosed);
        }
        let id = state.registry.next_id();
        state.registry.register(id, pending)?;
        Ok(id)
    }

    fn on_response_open(&self, id: RequestId, head: ResponseHead) {
        let mut state = self.lock();
        let (resolve, transfer, pump) = match state.registry.retire(id) {
            Some(PendingResponse::AwaitingOpen {
                resolve,
                transfer,
                pump,
            }) => (resolve, transfer, pump),
            Some(streaming) => {
                tracing::warn!("Dropping duplicate response-open for id {}", id);
                let _ = state.registry.register(id, streaming);
                return;
            }
            None => {
                tracing::trace!("Dropping response-open for unknown id {}", id);
                return;
            }
        };

        if !head.has_body {
            drop(state);
            tracing::trace!("Response {} complete without body", id);
            let _ = resolve.send(Ok(Response::from_head(head, None)));
            transfer.cancel();
            return;
        }

        let (sink, body) = Body::channel();
        match resolve.send(Ok(Response::from_head(head, Some(body)))) {
            Ok(()) => {
                let _ = state.registry.register(
                    id,
                    PendingResponse::Streaming {
                        sink,
                        transfer,
                        pump,
                    },
                );
            }
            Err(_) => {
                drop(state);
                tracing::debug!("Caller dropped request {} before its response arrived", id);
                transfer.cancel();
                self.send_cancel(id);
            }
        }
    }

    fn on_response_body(&self, id: RequestId, part: BodyPart) {
        let mut state = self.lock();
        let abandoned = match state.registry.get(id) {
            Some(PendingResponse::Streaming { sink, .. }) => match part {
                BodyPart::Chunk(chunk) => {
                    if sink.send_chunk(chunk) {
                        return;
                    }
                    true
                }
                BodyPart::Done => false,
            },
            Some(PendingResponse::AwaitingOpen { .. }) => {
                tracing::warn!("Dropping response-body before response-open for id {}", id);
                return;
            }
            None => {
                tracing::trace!("Dropping response-body for unknown id {}", id);
                return;
            }
        };

        let pending = state.registry.retire(id);
        drop(state);

        if let Some(pending) = pending {
            pending.transfer().cancel();
            drop(pending);
            if abandoned {
                tracing::debug!("Response body {} dropped by its reader", id);
                self.send_cancel(id);
            }
        }
    }

    fn on_response_error(&self, id: RequestId, error: ErrorPayload) {
        let pending = self.lock().registry.retire(id);
        match pending {
            Some(pending) => {
                tracing::debug!("Request {} failed on the server: {}", id, error.message);
                pending.fail(BridgeError::Remote(error.into_remote(Side::Server)));
            }
            None => tracing::trace!("Dropping response-error for unknown id {}", id),
        }
    }

    fn on_response_cancel(&self, id: RequestId) {
        if let Some(pending) = self.lock().registry.get(id) {
            tracing::debug!("Server stopped reading the body of request {}", id);
            pending.pump().cancel();
        }
    }

    /// The caller gave up on `id`: fail it locally and tell the server.
    fn abort(&self, id: RequestId) {
        let pending = self.lock().registry.retire(id);
        if let Some(pending) = pending {
            pending.fail(BridgeError::Cancelled);
            self.send_cancel(id);
        }
    }

    /// The request body failed before the response was resolved.
    fn fail_before_open(&self, id: RequestId, err: BridgeError) {
        let pending = {
            let mut state = self.lock();
            if matches!(
                state.registry.get(id),
                Some(PendingResponse::AwaitingOpen { .. })
            ) {
                state.registry.retire(id)
            } else {
                None
            }
        };
        if let Some(pending) = pending {
            pending.fail(err);
            self.send_cancel(id);
        }
    }

    /// Fail every pending transfer and refuse new ones.
    fn close(&self, notify_peer: bool) {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state.registry.drain()
        };
        if !drained.is_empty() {
            tracing::debug!("Failing {} pending requests", drained.len());
        }
        for (id, pending) in drained {
            pending.fail(BridgeError::ConnectionClosed);
            if notify_peer {
                self.send_cancel(id);
            }
        }
    }

    fn send_cancel(&self, id: RequestId) {
        if let Err(e) = self.channel.send(Message::RequestCancel { id }) {
            tracing::debug!("Could not send request-cancel for id {}: {}", id, e);
        }
    }
}

/// Retires the id if the dispatch future is dropped before it resolves.
struct AbandonOnDrop<'a, C: Channel> {
    shared: &'a Shared<C>,
    id: RequestId,
    armed: bool,
}

impl<C: Channel> AbandonOnDrop<'_, C> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Channel> Drop for AbandonOnDrop<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Dispatch of request {} abandoned", self.id);
            self.shared.abort(self.id);
        }
    }
}

/// Builder for a [`Dispatcher`].
pub struct DispatcherBuilder<C> {
    channel: C,
    on_control: Option<ControlCallback>,
}

impl<C: Channel> DispatcherBuilder<C> {
    /// Receive `runner-control` payloads sent by the server.
    pub fn on_control<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.on_control = Some(Arc::new(callback));
        self
    }

    /// Subscribe to the channel and start the demultiplexing task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Dispatcher<C> {
        let inbox = self.channel.subscribe();
        let shared = Arc::new(Shared {
            channel: self.channel,
            state: Mutex::new(State {
                registry: Registry::new(),
                closed: false,
            }),
        });
        let demux = tokio::spawn(demux_loop(shared.clone(), inbox, self.on_control));
        Dispatcher { shared, demux }
    }
}

/// Sends requests over a channel and resolves their responses.
///
/// Any number of requests may be in flight at once; they share the channel
/// and are told apart by id. Dropping the dispatcher fails every pending
/// transfer with [`BridgeError::ConnectionClosed`] and asks the server to
/// cancel them.
///
/// # Example
///
/// ```
/// use worker_fetch::{serve, Dispatcher, MemoryChannel, Request, Response};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> worker_fetch::Result<()> {
/// let (caller, worker) = MemoryChannel::pair();
/// tokio::spawn(serve(worker, |_req: Request| async move { Ok(Response::ok("hi")) }));
///
/// let dispatcher = Dispatcher::new(caller);
/// let response = dispatcher.dispatch(Request::get("http://localhost/")).await?;
/// assert_eq!(response.text().await?, "hi");
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<C: Channel> {
    shared: Arc<Shared<C>>,
    demux: JoinHandle<()>,
}

impl<C: Channel> Dispatcher<C> {
    /// Create a dispatcher with default settings.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(channel: C) -> Self {
        Self::builder(channel).build()
    }

    pub fn builder(channel: C) -> DispatcherBuilder<C> {
        DispatcherBuilder {
            channel,
            on_control: None,
        }
    }

    /// Send `request` and wait for the response metadata.
    ///
    /// The returned response's body is fed as `response-body` messages
    /// arrive.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Remote`] if the handler or the request body failed
    ///   before the response was opened
    /// - [`BridgeError::Cancelled`] if the request's signal fired first
    /// - [`BridgeError::ConnectionClosed`] if the channel closed first
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        self.dispatch_with(request, Extra::default()).await
    }

    /// Like [`dispatch`](Self::dispatch), merging `extra` into `request-open`.
    pub async fn dispatch_with(&self, mut request: Request, extra: Extra) -> Result<Response> {
        let signal = request.signal().cloned();
        if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(BridgeError::Cancelled);
        }

        let head = request.head(extra.entry, extra.fields);
        let body = if head.has_body {
            request.take_body()
        } else {
            None
        };
        drop(request);

        let (resolve, response) = oneshot::channel();
        let transfer = CancellationToken::new();
        let pump = transfer.child_token();
        let id = self.shared.begin(PendingResponse::AwaitingOpen {
            resolve,
            transfer: transfer.clone(),
            pump: pump.clone(),
        })?;

        tracing::trace!("Dispatching request {} {} {}", id, head.method, head.url);
        if let Err(e) = self.shared.channel.send(Message::RequestOpen { id, head }) {
            self.shared.lock().registry.retire(id);
            transfer.cancel();
            return Err(e);
        }

        let mut guard = AbandonOnDrop {
            shared: &self.shared,
            id,
            armed: true,
        };

        if let Some(body) = body {
            self.spawn_request_pump(id, body, pump);
        }
        if let Some(signal) = signal {
            self.spawn_signal_watch(id, signal, transfer);
        }

        let result = response
            .await
            .unwrap_or(Err(BridgeError::ConnectionClosed));
        guard.disarm();
        result
    }

    fn spawn_request_pump(&self, id: RequestId, body: Body, pump: CancellationToken) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match pump_body(&shared.channel, id, BodyDirection::Request, body, &pump).await {
                PumpOutcome::Failed(err) => shared.fail_before_open(id, err),
                PumpOutcome::Cancelled => tracing::trace!("Request body {} pump cancelled", id),
                PumpOutcome::ChannelClosed => {
                    tracing::debug!("Channel closed while sending request body {}", id)
                }
                PumpOutcome::Completed => {}
            }
        });
    }

    fn spawn_signal_watch(&self, id: RequestId, signal: CancellationToken, transfer: CancellationToken) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal.cancelled() => {
                    tracing::debug!("Request {} cancelled by its signal", id);
                    shared.abort(id);
                }
                _ = transfer.cancelled() => {}
            }
        });
    }

    /// Send an opaque `runner-control` payload to the server.
    pub fn send_control(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.shared.channel.send(Message::RunnerControl {
            payload: payload.into(),
        })
    }

    /// Number of transfers still pending.
    pub fn pending(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// The underlying channel.
    pub fn channel(&self) -> &C {
        &self.shared.channel
    }
}

impl<C: Channel> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        self.demux.abort();
        self.shared.close(true);
    }
}

async fn demux_loop<C: Channel>(
    shared: Arc<Shared<C>>,
    mut inbox: Subscription,
    on_control: Option<ControlCallback>,
) {
    while let Some(message) = inbox.recv().await {
        match message {
            Message::ResponseOpen { id, head } => shared.on_response_open(id, head),
            Message::ResponseBody { id, part } => shared.on_response_body(id, part),
            Message::ResponseError { id, error } => shared.on_response_error(id, error),
            Message::ResponseCancel { id } => shared.on_response_cancel(id),
            Message::RunnerControl { payload } => match &on_control {
                Some(callback) => callback(payload),
                None => tracing::trace!("Ignoring runner-control message"),
            },
            other => tracing::trace!("Dispatcher ignoring {} message", other.kind()),
        }
    }

    tracing::debug!("Dispatcher channel closed");
    shared.close(false);
}
