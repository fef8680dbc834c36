use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// Context for a storage operation: request identity plus cancellation.
///
/// Every provider call takes one of these. Cancelling the token (client
/// disconnect, shutdown) or passing the deadline unwinds the operation at its
/// next suspension point.
#[derive(Debug, Clone)]
pub struct StorageCtx {
    pub request_id: String,
    pub actor_id: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl StorageCtx {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            actor_id: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_actor<S: Into<String>>(mut self, actor_id: S) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Bound the operation; an earlier existing deadline wins
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Use an externally owned cancellation token (e.g. tied to the HTTP request)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// `Err(Cancelled)` or `Err(Timeout)` once the operation should stop.
    ///
    /// For checkpoints between steps, where no future is being driven by [`run`](Self::run).
    pub fn check(&self) -> StorageResult<()> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        match self.remaining() {
            Some(left) if left.is_zero() => Err(StorageError::Timeout),
            _ => Ok(()),
        }
    }

    /// Same request, child cancellation token: cancelling `self` cancels the child
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            actor_id: self.actor_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Same request, but not linked to the caller's cancellation.
    ///
    /// Compensating actions run on a detached context so that a client
    /// disconnect cannot abort the cleanup of state it caused.
    pub fn detached(&self, timeout: Duration) -> Self {
        Self {
            request_id: self.request_id.clone(),
            actor_id: self.actor_id.clone(),
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Drive `fut` unless the context is cancelled or its deadline passes first
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StorageError>,
    {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled.into());
        }

        let work = async {
            match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Timeout.into()),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled.into()),
            result = work => result,
        }
    }
}

impl Default for StorageCtx {
    fn default() -> Self {
        Self::new()
    }
}
