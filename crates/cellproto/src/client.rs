//! RPC client: correlates responses with the calls that caused them.
//!
//! Architecture:
//! - Every call registers a oneshot sender in the pending map, keyed by a
//!   correlation id of the form `{instance}--{sequence}`
//! - A listener task owns the channel subscription and routes each response
//!   to its pending call, removing the entry under the map lock so a response
//!   is delivered at most once
//! - Callers race their oneshot against the armed [`CancelPolicy`]
//!
//! Usage:
//! ```ignore
//! let client = RpcClient::new(channel);
//! client.open();
//! let reply = client.call("meta", json!({}), Vec::new(), &CancelPolicy::none()).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelPolicy;
use crate::channel::{ClientChannel, Subscription};
use crate::error::RpcError;
use crate::packet::{RequestPacket, ResponseKind, ResponsePacket};
use crate::reply::{Reply, Response};
use crate::stub::RpcStub;

/// Process-wide counter giving each client a distinct id prefix.
static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A call waiting for its response.
struct PendingCall {
    response_tx: oneshot::Sender<Result<ResponsePacket, RpcError>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingCall>>>;

/// Removes a pending entry when the call future goes away, however it ends.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

/// Listener task: routes responses from the subscription to pending calls.
async fn listen(mut subscription: Subscription<ResponsePacket>, pending: PendingMap, name: String) {
    debug!("{}: Listener started", name);

    while let Some(packet) = subscription.recv().await {
        let call = pending.lock().remove(&packet.id);
        match call {
            Some(call) => {
                trace!("{}: Routing {} response for {}", name, kind_str(packet.kind), packet.id);
                let _ = call.response_tx.send(Ok(packet));
            }
            None => {
                debug!(
                    "{}: Discarding orphan response for {} (not in {} pending)",
                    name,
                    packet.id,
                    pending.lock().len()
                );
            }
        }
    }

    debug!("{}: Listener exiting, subscription ended", name);
}

fn kind_str(kind: ResponseKind) -> &'static str {
    match kind {
        ResponseKind::Response => "response",
        ResponseKind::Failure => "failure",
    }
}

/// Correlating RPC client over a [`ClientChannel`].
pub struct RpcClient {
    name: String,
    instance: u64,
    sequence: AtomicU64,
    channel: Arc<ClientChannel>,
    pending: PendingMap,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    pub fn new(channel: Arc<ClientChannel>) -> Arc<Self> {
        Self::with_name("rpc", channel)
    }

    /// Create a client whose log lines are prefixed with `name`.
    pub fn with_name(name: &str, channel: Arc<ClientChannel>) -> Arc<Self> {
        let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!("{}: Created client instance {}", name, instance);
        Arc::new(Self {
            name: name.to_string(),
            instance,
            sequence: AtomicU64::new(0),
            channel,
            pending: Arc::new(Mutex::new(HashMap::new())),
            listener: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Start listening for responses.
    ///
    /// Must be called from within a Tokio runtime. Opening again replaces the
    /// subscription, so a client never holds more than one.
    pub fn open(&self) {
        let subscription = self.channel.subscribe();
        let handle = tokio::spawn(listen(
            subscription,
            self.pending.clone(),
            self.name.clone(),
        ));

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
            debug!("{}: Replaced previous listener", self.name);
        }
    }

    /// Stop listening. Pending calls stay pending.
    pub fn close(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
            debug!("{}: Listener closed", self.name);
        }
    }

    pub fn is_open(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Close, then fail every pending call with [`RpcError::Shutdown`].
    pub fn shutdown(&self) {
        self.close();

        let drained: Vec<(String, PendingCall)> = self.pending.lock().drain().collect();
        info!("{}: Shutting down, failing {} pending calls", self.name, drained.len());
        for (id, call) in drained {
            let _ = call.response_tx.send(Err(RpcError::Shutdown));
            trace!("{}: Failed pending call {} due to shutdown", self.name, id);
        }
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}--{}", self.instance, sequence)
    }

    /// Issue one call and wait for its response or its cancellation.
    pub async fn call(
        &self,
        method: &str,
        payload: Value,
        buffers: Vec<Bytes>,
        cancel: &CancelPolicy,
    ) -> Result<Reply, RpcError> {
        let id = self.next_id();
        let (response_tx, response_rx) = oneshot::channel();
        let trigger = cancel.arm();

        self.pending
            .lock()
            .insert(id.clone(), PendingCall { response_tx });
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        trace!("{}: Sending {} request {}", self.name, method, id);
        let request = RequestPacket::new(id.as_str(), method, payload).with_buffers(buffers);
        if let Err(e) = self.channel.send(request).await {
            warn!("{}: Send failed for {}: {}", self.name, id, e);
            return Err(e.into());
        }

        tokio::select! {
            // A response that already arrived wins over a cancel firing in the same poll.
            biased;

            result = response_rx => match result {
                Ok(Ok(packet)) => settle(packet),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RpcError::Dropped),
            },

            _ = trigger => {
                debug!("{}: Call {} ({}) cancelled", self.name, id, method);
                Err(RpcError::Cancelled)
            }
        }
    }

    /// Typed call: serialize `payload`, decode the reply into `R`.
    pub async fn invoke<P, R>(
        &self,
        method: &str,
        payload: &P,
        buffers: Vec<Bytes>,
        cancel: &CancelPolicy,
    ) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: Response,
    {
        let payload = serde_json::to_value(payload).map_err(RpcError::Encode)?;
        self.call(method, payload, buffers, cancel).await?.decode()
    }

    /// Build a typed stub bound to this client.
    pub fn make_proxy<T: RpcStub>(self: &Arc<Self>, cancel: CancelPolicy) -> T {
        T::from_client(Arc::clone(self), cancel)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

fn settle(packet: ResponsePacket) -> Result<Reply, RpcError> {
    match packet.kind {
        ResponseKind::Response => Ok(Reply {
            payload: packet.payload,
            buffers: packet.buffers,
        }),
        ResponseKind::Failure => Err(RpcError::Failure(packet.payload)),
    }
}
