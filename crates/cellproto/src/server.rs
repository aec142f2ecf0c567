//! RPC server: dispatches incoming requests to named handlers.
//!
//! Handlers are registered before [`open`](RpcServer::open). Each request is
//! validated, dispatched on its own task, and answered with either a
//! `response` carrying the handler's [`Reply`] or a `failure` carrying a
//! description of what went wrong.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::{ServerChannel, Subscription};
use crate::packet::{RequestPacket, ResponsePacket};
use crate::reply::Reply;

/// Failure payload for a request without an id.
pub const UNKNOWN_ID: &str = "Unknown ID";
/// Failure payload for a request without a method name.
pub const NO_METHOD: &str = "No method called.";
/// Failure payload for a method nobody registered.
pub const UNKNOWN_METHOD: &str = "Unknown method.";

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Reply>>;

type Handler = Arc<dyn Fn(Value, Vec<Bytes>) -> HandlerFuture + Send + Sync>;

type Functions = Arc<HashMap<String, Handler>>;

/// Name-dispatching RPC server over a [`ServerChannel`].
pub struct RpcServer {
    name: String,
    channel: Arc<ServerChannel>,
    functions: Functions,
    listening: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    pub fn new(channel: Arc<ServerChannel>) -> Self {
        Self::with_name("rpc-server", channel)
    }

    pub fn with_name(name: &str, channel: Arc<ServerChannel>) -> Self {
        Self {
            name: name.to_string(),
            channel,
            functions: Arc::new(HashMap::new()),
            listening: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        }
    }

    /// Register an async handler. Registering a name twice replaces it.
    pub fn register<F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        F: Fn(Value, Vec<Bytes>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload, buffers| handler(payload, buffers).boxed());
        Arc::make_mut(&mut self.functions).insert(method.to_string(), handler);
        self
    }

    /// Register a synchronous handler; it is awaited like any other.
    pub fn register_fn<F>(&mut self, method: &str, handler: F) -> &mut Self
    where
        F: Fn(Value, Vec<Bytes>) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.register(method, move |payload, buffers| {
            futures::future::ready(handler(payload, buffers))
        })
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start serving requests. Must be called from within a Tokio runtime.
    ///
    /// Opening again replaces the subscription. Handlers registered after
    /// opening take effect on the next `open`.
    pub fn open(&self) {
        let subscription = self.channel.subscribe();
        self.listening.store(true, Ordering::Release);

        let handle = tokio::spawn(serve(
            subscription,
            self.channel.clone(),
            self.functions.clone(),
            self.listening.clone(),
            self.name.clone(),
        ));

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
        info!("{}: Serving {} methods", self.name, self.functions.len());
    }

    /// Stop serving. Requests already being handled finish but their
    /// responses are not sent.
    pub fn close(&self) {
        self.listening.store(false, Ordering::Release);
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
            debug!("{}: Listener closed", self.name);
        }
    }

    pub fn is_open(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.listening.store(false, Ordering::Release);
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Listener task: one handling task per incoming request.
async fn serve(
    mut subscription: Subscription<RequestPacket>,
    channel: Arc<ServerChannel>,
    functions: Functions,
    listening: Arc<AtomicBool>,
    name: String,
) {
    debug!("{}: Listener started", name);

    while let Some(request) = subscription.recv().await {
        let channel = channel.clone();
        let functions = functions.clone();
        let listening = listening.clone();
        let name = name.clone();

        tokio::spawn(async move {
            let response = dispatch(&functions, request, &name).await;
            if !listening.load(Ordering::Acquire) {
                debug!("{}: Dropping response for {}, server closed", name, response.id);
                return;
            }
            if let Err(e) = channel.send(response).await {
                warn!("{}: Failed to send response: {}", name, e);
            }
        });
    }

    debug!("{}: Listener exiting, subscription ended", name);
}

/// Validate one request and run its handler.
async fn dispatch(
    functions: &HashMap<String, Handler>,
    request: RequestPacket,
    name: &str,
) -> ResponsePacket {
    if request.id.is_empty() {
        warn!("{}: Request without id", name);
        return ResponsePacket::failure("", Value::from(UNKNOWN_ID));
    }
    if request.method.is_empty() {
        warn!("{}: Request {} names no method", name, request.id);
        return ResponsePacket::failure(request.id, Value::from(NO_METHOD));
    }
    let Some(handler) = functions.get(&request.method) else {
        warn!("{}: Request {} for unknown method {}", name, request.id, request.method);
        return ResponsePacket::failure(request.id, Value::from(UNKNOWN_METHOD));
    };

    let RequestPacket {
        id,
        method,
        payload,
        buffers,
    } = request;
    trace!("{}: Handling {} ({}, {} buffers)", name, id, method, buffers.len());

    match AssertUnwindSafe(handler(payload, buffers)).catch_unwind().await {
        Ok(Ok(reply)) => ResponsePacket::response(id, reply.payload, reply.buffers),
        Ok(Err(e)) => {
            debug!("{}: Handler {} failed for {}: {:#}", name, method, id, e);
            ResponsePacket::failure(id, Value::String(e.to_string()))
        }
        Err(_) => {
            warn!("{}: Handler {} panicked for {}", name, method, id);
            ResponsePacket::failure(id, Value::from(format!("{method} panicked")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn functions(server: &RpcServer) -> Functions {
        server.functions.clone()
    }

    fn test_server() -> RpcServer {
        let (_client_end, server_end) = crate::channel::rpc_pair();
        let mut server = RpcServer::new(Arc::new(server_end));
        server
            .register_fn("ping", |_, _| Ok(Reply::new(json!("pong"))))
            .register("fail", |_, _| async { Err(anyhow::anyhow!("no such clip")) })
            .register("boom", |payload, _| async move {
                assert!(payload.is_null(), "handler bug");
                Ok(Reply::default())
            });
        server
    }

    #[tokio::test]
    async fn validation_order() {
        let server = test_server();
        let functions = functions(&server);

        let response = dispatch(&functions, RequestPacket::new("", "", json!({})), "t").await;
        assert_eq!(response, ResponsePacket::failure("", json!(UNKNOWN_ID)));

        let response = dispatch(&functions, RequestPacket::new("1--0", "", json!({})), "t").await;
        assert_eq!(response, ResponsePacket::failure("1--0", json!(NO_METHOD)));

        let response = dispatch(&functions, RequestPacket::new("1--1", "foo", json!({})), "t").await;
        assert_eq!(response, ResponsePacket::failure("1--1", json!(UNKNOWN_METHOD)));
    }

    #[tokio::test]
    async fn handler_outcomes() {
        let server = test_server();
        let functions = functions(&server);

        let response = dispatch(&functions, RequestPacket::new("1--2", "ping", json!({})), "t").await;
        assert_eq!(response, ResponsePacket::response("1--2", json!("pong"), Vec::new()));

        let response = dispatch(&functions, RequestPacket::new("1--3", "fail", json!({})), "t").await;
        assert_eq!(response, ResponsePacket::failure("1--3", json!("no such clip")));

        let response = dispatch(&functions, RequestPacket::new("1--4", "boom", json!({})), "t").await;
        assert!(response.is_failure());
    }

    #[test]
    fn methods_are_sorted() {
        let server = test_server();
        assert_eq!(server.methods(), vec!["boom", "fail", "ping"]);
    }
}
