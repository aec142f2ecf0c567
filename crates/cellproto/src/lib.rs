//! cellproto - correlated RPC over notebook comm channels
//!
//! A client and a server exchange packets over any duplex [`Channel`] that
//! can carry a JSON body plus binary attachments. Each request carries a
//! correlation id; the client matches responses back to the call that is
//! waiting for them, and abandons calls according to a [`CancelPolicy`].
//!
//! On top of the transport sit typed stubs generated with
//! [`rpc_interface!`], the [`ResultCache`] used by the preview client, and
//! the service stubs for the audio, preview, and encode backends.

pub mod audio;
pub mod cache;
pub mod cancel;
pub mod channel;
pub mod client;
pub mod encode;
pub mod error;
pub mod packet;
pub mod preview;
pub mod reply;
pub mod server;
pub mod stub;

pub use cache::ResultCache;
pub use cancel::{CancelPolicy, CancelTrigger};
pub use channel::{
    memory_pair, rpc_pair, Channel, ClientChannel, MemoryChannel, ServerChannel, Subscription,
};
pub use client::RpcClient;
pub use error::{ChannelError, RpcError, WireError};
pub use packet::{RequestPacket, ResponseKind, ResponsePacket, WireMessage, WirePacket};
pub use reply::{Reply, Response};
pub use server::{HandlerFuture, RpcServer};
pub use stub::RpcStub;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
