//! Typed client stubs.
//!
//! A stub is a thin struct over an [`RpcClient`](crate::RpcClient) and a
//! [`CancelPolicy`](crate::CancelPolicy) with one async method per remote
//! method. [`rpc_interface!`](crate::rpc_interface) generates them:
//!
//! ```ignore
//! rpc_interface! {
//!     /// Remote clip previews.
//!     pub struct PreviewRpc {
//!         fn length() -> u64;
//!         fn frame(FrameRequest) -> FrameResult;
//!     }
//! }
//!
//! let preview: PreviewRpc = client.make_proxy(CancelPolicy::timeout(Duration::from_secs(10)));
//! let result = preview.frame(FrameRequest::clip(3)).await?;
//! ```
//!
//! A method declared without a payload type sends an empty JSON object.

use std::sync::Arc;

use crate::cancel::CancelPolicy;
use crate::client::RpcClient;

/// Implemented by every generated stub.
pub trait RpcStub: Sized {
    /// Remote method names, in declaration order.
    const METHODS: &'static [&'static str];

    fn from_client(client: Arc<RpcClient>, cancel: CancelPolicy) -> Self;
}

#[doc(hidden)]
#[macro_export]
macro_rules! __stub_payload {
    () => {
        &$crate::__private::serde_json::Map::new()
    };
    ({ $payload:ident : $ty:ty }) => {
        &$payload
    };
}

/// Generate a typed stub. See the [module docs](crate::stub).
#[macro_export]
macro_rules! rpc_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident($($payload:ty)?) -> $reply:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        $vis struct $name {
            client: ::std::sync::Arc<$crate::RpcClient>,
            cancel: $crate::CancelPolicy,
        }

        impl $name {
            /// Start receiving responses.
            pub fn open(&self) {
                self.client.open()
            }

            /// Stop receiving responses.
            pub fn close(&self) {
                self.client.close()
            }

            pub fn client(&self) -> &::std::sync::Arc<$crate::RpcClient> {
                &self.client
            }

            /// The same stub with a different cancellation policy.
            pub fn with_cancel(&self, cancel: $crate::CancelPolicy) -> Self {
                Self {
                    client: self.client.clone(),
                    cancel,
                }
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(
                    &self
                    $(, payload: $payload)?
                ) -> ::std::result::Result<$reply, $crate::RpcError> {
                    self.client
                        .invoke(
                            stringify!($method),
                            $crate::__stub_payload!($({ payload: $payload })?),
                            ::std::vec::Vec::new(),
                            &self.cancel,
                        )
                        .await
                }
            )*
        }

        impl $crate::RpcStub for $name {
            const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];

            fn from_client(
                client: ::std::sync::Arc<$crate::RpcClient>,
                cancel: $crate::CancelPolicy,
            ) -> Self {
                Self { client, cancel }
            }
        }
    };
}
