//! Fatal Sink - connection-level failures nobody is waiting on
//!
//! A transport that dies between calls has no caller to return an error
//! to. Such errors land here and are drained by one task that lives as
//! long as the connection that owns it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BrowserError;

/// User hook invoked once per fatal error
pub type FatalHandler = Arc<dyn Fn(BrowserError) + Send + Sync>;

#[derive(Clone)]
pub struct FatalSink {
    tx: mpsc::UnboundedSender<BrowserError>,
}

impl FatalSink {
    /// Create the sink and spawn its drain task.
    ///
    /// The task stops when `shutdown` fires; errors still queued at that
    /// point are handled before it exits.
    pub fn spawn(
        handler: Option<FatalHandler>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<BrowserError>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    err = rx.recv() => match err {
                        Some(err) => dispatch(handler.as_ref(), err),
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        rx.close();
                        while let Some(err) = rx.recv().await {
                            dispatch(handler.as_ref(), err);
                        }
                        break;
                    }
                }
            }
            tracing::debug!("Fatal sink drained");
        });

        (Self { tx }, task)
    }

    /// Hand an error to the drain task. Dropped silently after shutdown.
    pub fn report(&self, err: BrowserError) {
        if let Err(mpsc::error::SendError(err)) = self.tx.send(err) {
            tracing::debug!("Fatal error after sink shutdown: {}", err);
        }
    }
}

fn dispatch(handler: Option<&FatalHandler>, err: BrowserError) {
    match handler {
        Some(handler) => handler(err),
        None => tracing::error!(error = ?err, "Fatal browser error: {}", err),
    }
}
