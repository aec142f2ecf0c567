//! The duplex message channel the transport runs over.
//!
//! The host (a notebook widget model, a websocket, a test harness) supplies
//! the channel; the RPC layer only needs `send` and `subscribe`. A
//! [`Subscription`] yields every message the peer sends from the moment it was
//! taken; dropping it unsubscribes.
//!
//! [`MemoryChannel`] is the in-process implementation used by tests and the
//! loopback binary. It pushes every packet through the wire codec so that
//! both ends see exactly what a real host would deliver.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{trace, warn};

use crate::error::ChannelError;
use crate::packet::{RequestPacket, ResponsePacket, WireMessage, WirePacket};

/// Messages received from the peer, in arrival order.
pub struct Subscription<T> {
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn from_receiver(rx: mpsc::UnboundedReceiver<T>) -> Self
    where
        T: Send + 'static,
    {
        Self::new(UnboundedReceiverStream::new(rx))
    }

    /// Next message, or `None` once the channel can deliver nothing more.
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.next().await
    }
}

/// A duplex transport: receives `In`, sends `Out`.
#[async_trait]
pub trait Channel<In, Out>: Send + Sync + 'static
where
    In: Send + 'static,
    Out: Send + 'static,
{
    async fn send(&self, message: Out) -> Result<(), ChannelError>;

    fn subscribe(&self) -> Subscription<In>;
}

/// The client's view: sends requests, receives responses.
pub type ClientChannel = dyn Channel<ResponsePacket, RequestPacket>;

/// The server's view: sends responses, receives requests.
pub type ServerChannel = dyn Channel<RequestPacket, ResponsePacket>;

/// Fan-out point for one direction of a memory link.
#[derive(Default)]
struct Hub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WireMessage>>>,
}

impl Hub {
    fn attach(&self) -> mpsc::UnboundedReceiver<WireMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, pruning dropped ones.
    fn publish(&self, message: WireMessage) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        subscribers.len()
    }

    fn live(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[derive(Default)]
struct Link {
    to_first: Hub,
    to_second: Hub,
    disconnected: AtomicBool,
}

/// One end of an in-process duplex link. Create both ends with [`memory_pair`].
pub struct MemoryChannel<In, Out> {
    link: Arc<Link>,
    first: bool,
    _marker: PhantomData<fn() -> (In, Out)>,
}

/// Create both ends of a memory link.
pub fn memory_pair<A, B>() -> (MemoryChannel<A, B>, MemoryChannel<B, A>) {
    let link = Arc::new(Link::default());
    (
        MemoryChannel {
            link: link.clone(),
            first: true,
            _marker: PhantomData,
        },
        MemoryChannel {
            link,
            first: false,
            _marker: PhantomData,
        },
    )
}

/// A memory link shaped for one RPC client and one RPC server.
pub fn rpc_pair() -> (
    MemoryChannel<ResponsePacket, RequestPacket>,
    MemoryChannel<RequestPacket, ResponsePacket>,
) {
    memory_pair()
}

impl<In, Out> MemoryChannel<In, Out> {
    fn inbound(&self) -> &Hub {
        if self.first {
            &self.link.to_first
        } else {
            &self.link.to_second
        }
    }

    fn outbound(&self) -> &Hub {
        if self.first {
            &self.link.to_second
        } else {
            &self.link.to_first
        }
    }

    /// Send an already-encoded message, bypassing the packet codec.
    pub fn send_raw(&self, message: WireMessage) -> Result<usize, ChannelError> {
        if self.link.disconnected.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        Ok(self.outbound().publish(message))
    }

    /// Fail every further send on both ends.
    pub fn disconnect(&self) {
        self.link.disconnected.store(true, Ordering::Release);
    }

    /// Number of live subscriptions on this end.
    pub fn subscriber_count(&self) -> usize {
        self.inbound().live()
    }
}

#[async_trait]
impl<In, Out> Channel<In, Out> for MemoryChannel<In, Out>
where
    In: WirePacket + Send + 'static,
    Out: WirePacket + Send + 'static,
{
    async fn send(&self, message: Out) -> Result<(), ChannelError> {
        let wire = message.to_wire()?;
        let delivered = self.send_raw(wire)?;
        trace!("memory channel delivered message to {} subscribers", delivered);
        Ok(())
    }

    fn subscribe(&self) -> Subscription<In> {
        let rx = self.inbound().attach();
        let decoded = UnboundedReceiverStream::new(rx).filter_map(|wire| async move {
            match In::from_wire(wire) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!("dropping undecodable message: {}", e);
                    None
                }
            }
        });
        Subscription::new(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn packets_cross_the_link_with_buffers() {
        let (client_end, server_end) = rpc_pair();
        let mut requests = server_end.subscribe();

        let packet = RequestPacket::new("1--0", "frame", json!({"frame": 2}))
            .with_buffers(vec![bytes::Bytes::from_static(b"abc")]);
        client_end.send(packet.clone()).await.unwrap();

        assert_eq!(requests.recv().await, Some(packet));
    }

    #[tokio::test]
    async fn every_live_subscriber_sees_each_message() {
        let (client_end, server_end) = rpc_pair();
        let mut a = client_end.subscribe();
        let mut b = client_end.subscribe();

        server_end
            .send(ResponsePacket::response("1--0", json!(1), Vec::new()))
            .await
            .unwrap();

        assert_eq!(a.recv().await.map(|p| p.id), Some("1--0".to_string()));
        assert_eq!(b.recv().await.map(|p| p.id), Some("1--0".to_string()));
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let (client_end, _server_end) = rpc_pair();
        let first = client_end.subscribe();
        let _second = client_end.subscribe();
        assert_eq!(client_end.subscriber_count(), 2);

        drop(first);
        assert_eq!(client_end.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let (client_end, server_end) = rpc_pair();
        let mut requests = server_end.subscribe();

        client_end.send_raw(WireMessage::json("not json")).unwrap();
        client_end
            .send(RequestPacket::new("1--1", "length", json!({})))
            .await
            .unwrap();

        assert_eq!(requests.recv().await.map(|p| p.id), Some("1--1".to_string()));
    }

    #[tokio::test]
    async fn disconnect_fails_sends() {
        let (client_end, server_end) = rpc_pair();
        server_end.disconnect();

        let result = client_end.send(RequestPacket::new("1--0", "ping", json!({}))).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
    }
}
