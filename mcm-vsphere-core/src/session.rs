//! Scoped platform session
//!
//! One session per lifecycle operation, released on every exit path. The
//! operation calls [`SessionGuard::release`] itself; if the guard is dropped
//! while still holding the session (the operation future was dropped), the
//! close is handed to the running Tokio runtime instead.

use std::ops::Deref;

use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::platform::{Platform, Session};
use crate::spec::Secrets;

pub struct SessionGuard {
    session: Option<Box<dyn Session>>,
}

impl SessionGuard {
    /// Opens a session, subject to the operation's cancellation.
    pub async fn open<P: Platform + ?Sized>(
        platform: &P,
        secrets: &Secrets,
        ctx: &OperationContext,
    ) -> Result<Self, ProviderError> {
        let session = ctx.call(platform.open_session(secrets)).await?;
        debug!(operation = %ctx.operation(), host = %secrets.vsphere_host, "platform session opened");
        Ok(Self {
            session: Some(session),
        })
    }

    /// Closes the session. Close failures are logged, never returned, so
    /// they cannot mask the operation's own result.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("failed to close platform session: {}", e);
            }
        }
    }
}

impl Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        // `session` is only taken by `release(self)` and `drop`.
        self.session.as_deref().unwrap_or_else(|| unreachable!("session already released"))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("platform session dropped without release, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("failed to close abandoned platform session: {}", e);
                    }
                });
            }
            Err(_) => warn!("platform session dropped outside a runtime, not closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Operation, PlatformError};
    use crate::simulator::Simulator;
    use crate::spec::PlacementScope;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_release_closes_session() {
        let sim = Simulator::new("dc1");
        let token = CancellationToken::new();
        let ctx = OperationContext::new(Operation::List, &token);

        let guard = SessionGuard::open(&sim, &Secrets::default(), &ctx).await.unwrap();
        assert_eq!(sim.sessions_open(), 1);
        guard.find_by_name(&PlacementScope::default(), "x").await.unwrap();
        guard.release().await;
        assert_eq!(sim.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_closes_in_background() {
        let sim = Simulator::new("dc1");
        let token = CancellationToken::new();
        let ctx = OperationContext::new(Operation::Delete, &token);

        let guard = SessionGuard::open(&sim, &Secrets::default(), &ctx).await.unwrap();
        drop(guard);
        for _ in 0..10 {
            if sim.sessions_open() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sim.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_a_connection_error() {
        let sim = Simulator::new("dc1");
        sim.refuse_connect(true);
        let token = CancellationToken::new();
        let ctx = OperationContext::new(Operation::Create, &token);

        let err = SessionGuard::open(&sim, &Secrets::default(), &ctx).await.err().unwrap();
        assert!(matches!(
            err,
            ProviderError::Connection { source: PlatformError::Connect(_), .. }
        ));
        assert_eq!(sim.sessions_opened(), 0);
    }
}
