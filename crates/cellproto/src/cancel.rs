//! Cancellation policies for RPC calls.
//!
//! A policy is armed once per call. The armed future completes when the call
//! must be abandoned; if the call finishes first the armed future is simply
//! dropped, which clears whatever it was waiting on (a timer, a shared
//! handle on another operation).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

/// Future returned by arming a policy.
pub type CancelTrigger = Pin<Box<dyn Future<Output = ()> + Send>>;

type ArmFn = dyn Fn() -> CancelTrigger + Send + Sync;

/// How a pending call can be abandoned before its response arrives.
#[derive(Clone, Default)]
pub struct CancelPolicy {
    arm: Option<Arc<ArmFn>>,
}

impl CancelPolicy {
    /// Never cancel; the call waits for its response.
    pub fn none() -> Self {
        Self { arm: None }
    }

    /// Cancel once `duration` has elapsed since the call was issued.
    pub fn timeout(duration: Duration) -> Self {
        Self::from_fn(move || Box::pin(tokio::time::sleep(duration)))
    }

    /// Cancel as soon as `other` settles, whatever its outcome.
    ///
    /// `other` is polled only while some call is waiting on it, and it is
    /// shared between every call issued with this policy.
    pub fn race<F>(other: F) -> Self
    where
        F: Future + Send + 'static,
    {
        let settled = other.map(|_| ()).boxed().shared();
        Self::from_fn(move || Box::pin(settled.clone()))
    }

    /// Build a policy from a custom rendezvous.
    pub fn from_fn<F>(arm: F) -> Self
    where
        F: Fn() -> CancelTrigger + Send + Sync + 'static,
    {
        Self {
            arm: Some(Arc::new(arm)),
        }
    }

    pub fn is_none(&self) -> bool {
        self.arm.is_none()
    }

    /// Arm the policy for one call.
    pub(crate) fn arm(&self) -> CancelTrigger {
        match &self.arm {
            Some(arm) => arm(),
            None => Box::pin(futures::future::pending()),
        }
    }
}

impl fmt::Debug for CancelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.arm.is_some() { "armed" } else { "none" };
        f.debug_tuple("CancelPolicy").field(&kind).finish()
    }
}
