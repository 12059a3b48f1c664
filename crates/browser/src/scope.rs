//! Execution scopes - cancellation and deadlines for every outgoing call
//!
//! A `Scope` is immutable. Deriving produces a new value whose token is a
//! child of the parent's, so cancelling a parent cancels every descendant
//! but never the other way round. Deadlines only shrink along a chain.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BrowserError, Result};

#[derive(Clone, Debug)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

/// Cancels the scope it was created with (and all of its descendants).
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Scope {
    /// New root scope: no parent, no deadline.
    pub fn root() -> (Self, CancelHandle) {
        let token = CancellationToken::new();
        let handle = CancelHandle {
            token: token.clone(),
        };
        (
            Self {
                token,
                deadline: None,
            },
            handle,
        )
    }

    /// Child scope with the same deadline as `self`.
    pub fn derive(&self) -> Scope {
        Scope {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope that expires after `timeout`, or earlier if the parent does.
    pub fn with_timeout(&self, timeout: Duration) -> (Scope, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> (Scope, CancelHandle) {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        let token = self.token.child_token();
        let handle = CancelHandle {
            token: token.clone(),
        };
        (
            Scope {
                token,
                deadline: Some(deadline),
            },
            handle,
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if the scope has none.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns the error this scope fired with, if it already fired.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(BrowserError::Cancelled)
        } else if self.is_expired() {
            Err(BrowserError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Resolves once the scope fires, yielding the matching error.
    pub async fn done(&self) -> BrowserError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => BrowserError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => BrowserError::Timeout,
            },
            None => {
                self.token.cancelled().await;
                BrowserError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the scope fires first.
    ///
    /// `fut` is dropped as soon as the scope fires, so whatever it was
    /// waiting on (a response, a subscription) is released with it.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }

    /// Sleep for `duration`, aborting early if the scope fires.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
