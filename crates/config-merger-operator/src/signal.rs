//! Graceful shutdown on process termination.
use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to install the SIGTERM handler"))]
pub struct SignalError {
    source: std::io::Error,
}

/// Fans a single shutdown request out to every acquired [`handle`](SignalWatcher::handle).
pub struct SignalWatcher {
    requested: watch::Receiver<bool>,
}

impl SignalWatcher {
    /// Requests shutdown once either `SIGTERM` or `SIGINT` (Ctrl-C) is received.
    pub fn termination() -> Result<Self, SignalError> {
        let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

        Ok(Self::new(async move {
            let signal = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = tokio::signal::ctrl_c() => "SIGINT",
            };
            tracing::info!(signal, "received termination signal, shutting down");
        }))
    }

    /// Requests shutdown once `trigger` completes.
    pub fn new<F>(trigger: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (requested_tx, requested) = watch::channel(false);

        tokio::spawn(async move {
            trigger.await;
            requested_tx.send_replace(true);
        });

        Self { requested }
    }

    /// Acquires a future which completes once shutdown has been requested.
    ///
    /// Handles acquired after the request complete immediately.
    pub fn handle(&self) -> impl Future<Output = ()> + use<> {
        let mut requested = self.requested.clone();

        async move {
            // An error means the trigger task is gone without ever requesting shutdown
            if requested.wait_for(|requested| *requested).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn all_handles_complete_on_request() {
        let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
        let signal = SignalWatcher::new(async move {
            trigger_rx.await.ok();
        });

        let first = signal.handle();
        let second = signal.handle();
        trigger_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            first.await;
            second.await;
        })
        .await
        .unwrap();

        // Late handles still observe the request
        tokio::time::timeout(Duration::from_secs(5), signal.handle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handle_stays_pending_without_request() {
        let signal = SignalWatcher::new(std::future::pending());

        let result = tokio::time::timeout(Duration::from_millis(20), signal.handle()).await;
        assert!(result.is_err());
    }
}
