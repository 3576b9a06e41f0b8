//! Router: correlates calls and replies on one endpoint and dispatches
//! inbound calls to the local handler.
//!
//! Each bound endpoint gets one router and one read loop task. Outbound
//! requests are registered in a pending table keyed by call id; replies
//! complete them in whatever order they arrive. Inbound requests run on
//! their own tasks so a slow handler never blocks replies. Inbound
//! notifications are queued to a single worker per router so they reach
//! the handler in arrival order.
//!
//! A router can be closed at once, failing every outstanding call, or
//! drained: new calls are refused, and the endpoint closes once every
//! inbound request has been answered and every outbound call has its reply.

use crate::bindings::{CallArgs, CallOutcome, ServiceHandler};
use crate::channel::{Endpoint, EndpointReceiver, EndpointSender, HandleId, Message};
use crate::message::{decode_message, encode_message, CallResult, WireError, WireMessage};
use relay_types::{ApplicationError, RelayError, RelayResult, ServiceDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type PendingReply = oneshot::Sender<RelayResult<CallOutcome>>;

/// Callback invoked when the connection fails or delivers garbage.
pub(crate) type ErrorHandler = Arc<dyn Fn(&RelayError) + Send + Sync>;

struct QueuedNotification {
    handler: Arc<dyn ServiceHandler>,
    method: String,
    args: CallArgs,
}

pub(crate) struct Router {
    /// Interface of the remote side; outbound calls are validated against it.
    remote: &'static ServiceDescriptor,
    sender: EndpointSender,
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_call_id: AtomicU64,
    handler: RwLock<Option<Weak<dyn ServiceHandler>>>,
    error_handler: RwLock<Option<ErrorHandler>>,
    notifications: mpsc::UnboundedSender<QueuedNotification>,
    closed: AtomicBool,
    draining: AtomicBool,
    /// Inbound requests whose reply has not been sent yet.
    in_flight: AtomicUsize,
    remote_closed: AtomicBool,
    max_message_size: u32,
}

impl Router {
    /// Create a router for `endpoint`. The read loop is not running until
    /// [`Router::start`] is called, so a handler can be attached first.
    pub(crate) fn new(
        endpoint: Endpoint,
        remote: &'static ServiceDescriptor,
        max_message_size: u32,
    ) -> (Arc<Self>, EndpointReceiver) {
        let (sender, receiver) = endpoint.split();
        let (notifications, queue) = mpsc::unbounded_channel();
        tokio::spawn(notification_worker(queue));
        let router = Arc::new(Self {
            remote,
            sender,
            pending: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            handler: RwLock::new(None),
            error_handler: RwLock::new(None),
            notifications,
            closed: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            remote_closed: AtomicBool::new(false),
            max_message_size,
        });
        (router, receiver)
    }

    /// Spawn the read loop. The loop holds the router weakly; dropping the
    /// last strong reference closes the endpoint and ends the loop.
    pub(crate) fn start(router: &Arc<Self>, receiver: EndpointReceiver) {
        tokio::spawn(read_loop(Arc::downgrade(router), receiver));
    }

    pub(crate) fn remote(&self) -> &'static ServiceDescriptor {
        self.remote
    }

    pub(crate) fn id(&self) -> HandleId {
        self.sender.id()
    }

    pub(crate) fn set_handler(&self, handler: Option<Weak<dyn ServiceHandler>>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Install the error callback. If the peer already went away, it fires
    /// immediately so the close is never missed.
    pub(crate) fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler.clone());
        if self.remote_closed.load(Ordering::SeqCst) {
            handler(&RelayError::ChannelClosed);
        }
    }

    /// Whether new calls are refused: closed, draining, or the pipe is gone.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.draining.load(Ordering::SeqCst)
            || self.sender.is_closed()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Send a request. Returns the call id and the receiver for its reply.
    pub(crate) fn call(
        &self,
        method: &str,
        params: Value,
        endpoints: Vec<Endpoint>,
    ) -> RelayResult<(u64, oneshot::Receiver<RelayResult<CallOutcome>>)> {
        self.check_method(method, true)?;
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call_id, tx);

        let msg = WireMessage::Request {
            call_id,
            method: method.to_string(),
            params,
            endpoints: endpoints.len(),
        };
        if let Err(e) = self.send(&msg, endpoints) {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&call_id);
            return Err(e.into());
        }
        debug!(service = self.remote.name, method, call_id, "Sent request");
        Ok((call_id, rx))
    }

    /// Send a notification.
    pub(crate) fn notify(
        &self,
        method: &str,
        params: Value,
        endpoints: Vec<Endpoint>,
    ) -> RelayResult<()> {
        self.check_method(method, false)?;
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        let msg = WireMessage::Notification {
            method: method.to_string(),
            params,
            endpoints: endpoints.len(),
        };
        self.send(&msg, endpoints)?;
        debug!(service = self.remote.name, method, "Sent notification");
        Ok(())
    }

    /// Close the endpoint and fail every outstanding call.
    pub(crate) fn close(&self) {
        self.shut();
    }

    /// Returns whether this call did the closing.
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sender.close();
        self.fail_pending();
        true
    }

    /// Refuse new calls and close once nothing is outstanding in either
    /// direction. Replies already queued by the peer are still delivered.
    /// The error callback receives `ChannelClosed` when the close happens.
    pub(crate) fn close_when_idle(&self) {
        if self.closed.load(Ordering::SeqCst) || self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(endpoint = %self.id(), service = self.remote.name, "Draining");
        self.close_if_idle();
    }

    fn close_if_idle(&self) {
        if !self.draining.load(Ordering::SeqCst) || self.in_flight.load(Ordering::SeqCst) > 0 {
            return;
        }
        if self.pending_calls() == 0 && self.shut() {
            debug!(endpoint = %self.id(), service = self.remote.name, "Drained; closed");
            self.report(&RelayError::ChannelClosed);
        }
    }

    fn finish_request(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.close_if_idle();
    }

    fn check_method(&self, method: &str, expects_reply: bool) -> RelayResult<()> {
        let Some(descriptor) = self.remote.method(method) else {
            return Err(RelayError::UnknownMethod {
                service: self.remote.name.to_string(),
                method: method.to_string(),
            });
        };
        if descriptor.returns != expects_reply {
            return Err(RelayError::MethodKindMismatch {
                service: self.remote.name.to_string(),
                method: method.to_string(),
                expected: if descriptor.returns {
                    "expects a reply"
                } else {
                    "is a notification"
                },
            });
        }
        Ok(())
    }

    fn send(&self, msg: &WireMessage, endpoints: Vec<Endpoint>) -> Result<(), WireError> {
        let payload = encode_message(msg, self.max_message_size)?;
        self.sender.send(Message::with_endpoints(payload, endpoints))
    }

    fn fail_pending(&self) {
        let drained: Vec<PendingReply> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in drained {
            let _ = tx.send(Err(RelayError::ChannelClosed));
        }
    }

    fn report(&self, err: &RelayError) {
        let handler = self
            .error_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(err),
            None => debug!(endpoint = %self.id(), error = %err, "Unhandled connection error"),
        }
    }

    /// The peer went away (or sent something we could not read past).
    fn on_disconnect(&self) {
        let was_closed = self.closed.swap(true, Ordering::SeqCst);
        self.sender.close();
        self.fail_pending();
        if !was_closed {
            self.remote_closed.store(true, Ordering::SeqCst);
            debug!(endpoint = %self.id(), service = self.remote.name, "Peer closed connection");
            self.report(&RelayError::ChannelClosed);
        }
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        let Message { payload, endpoints } = message;
        let msg = match decode_message(&payload, self.max_message_size) {
            Ok(m) => m,
            Err(e) => {
                warn!(endpoint = %self.id(), error = %e, "Dropping undecodable message");
                self.report(&RelayError::from(e));
                return;
            }
        };
        if msg.endpoint_count() != endpoints.len() {
            let err = WireError::EndpointCountMismatch {
                declared: msg.endpoint_count(),
                actual: endpoints.len(),
            };
            warn!(endpoint = %self.id(), error = %err, "Dropping malformed message");
            self.report(&RelayError::from(err));
            return;
        }

        match msg {
            WireMessage::Response { call_id, result } => {
                let tx = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&call_id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(result.into()));
                        self.close_if_idle();
                    }
                    None => warn!(call_id, "Discarding reply for unknown call id"),
                }
            }
            WireMessage::Request {
                call_id,
                method,
                params,
                ..
            } => {
                let args = CallArgs::with_endpoints(params, endpoints);
                match self.resolve_handler(&method, true) {
                    Ok(handler) => {
                        // The task keeps the router alive until the reply is out.
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                        let router = Arc::clone(self);
                        tokio::spawn(async move {
                            let outcome = handler.handle(&method, args).await;
                            reply(&router.sender, call_id, outcome, router.max_message_size);
                            router.finish_request();
                        });
                    }
                    Err(err) => {
                        debug!(call_id, method = %method, error = %err, "Rejecting request");
                        reply(&self.sender, call_id, Err(err), self.max_message_size);
                    }
                }
            }
            WireMessage::Notification { method, params, .. } => {
                let args = CallArgs::with_endpoints(params, endpoints);
                match self.resolve_handler(&method, false) {
                    Ok(handler) => {
                        let _ = self.notifications.send(QueuedNotification {
                            handler,
                            method,
                            args,
                        });
                    }
                    Err(err) => {
                        warn!(method = %method, error = %err, "Dropping notification");
                    }
                }
            }
        }
    }

    fn resolve_handler(
        &self,
        method: &str,
        expects_reply: bool,
    ) -> Result<Arc<dyn ServiceHandler>, ApplicationError> {
        let weak = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(weak) = weak else {
            return Err(ApplicationError::new(501, "no local handler is bound"));
        };
        let Some(handler) = weak.upgrade() else {
            return Err(ApplicationError::new(410, "local handler is gone"));
        };
        let descriptor = handler.descriptor();
        match descriptor.method(method) {
            None => Err(ApplicationError::unknown_method(descriptor.name, method)),
            Some(m) if m.returns != expects_reply => Err(ApplicationError::bad_params(format!(
                "{}.{method} was sent as the wrong call kind",
                descriptor.name
            ))),
            Some(_) => Ok(handler),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.sender.close();
        self.fail_pending();
    }
}

fn reply(sender: &EndpointSender, call_id: u64, outcome: CallOutcome, max: u32) {
    let msg = WireMessage::Response {
        call_id,
        result: CallResult::from(outcome),
    };
    let sent = encode_message(&msg, max).and_then(|payload| sender.send(Message::new(payload)));
    if let Err(e) = sent {
        debug!(call_id, error = %e, "Could not deliver reply");
    }
}

async fn read_loop(router: Weak<Router>, mut receiver: EndpointReceiver) {
    loop {
        let message = receiver.recv().await;
        let Some(router) = router.upgrade() else {
            break;
        };
        match message {
            Some(message) => router.dispatch(message),
            None => {
                router.on_disconnect();
                break;
            }
        }
    }
    debug!(endpoint = %receiver.id(), "Read loop finished");
}

async fn notification_worker(mut queue: mpsc::UnboundedReceiver<QueuedNotification>) {
    while let Some(QueuedNotification {
        handler,
        method,
        args,
    }) = queue.recv().await
    {
        if let Err(e) = handler.handle(&method, args).await {
            warn!(method = %method, error = %e, "Notification handler failed");
        }
    }
}
