//! Per-call cancellation scope
//!
//! Every orchestration call runs under a child of the manager's root token.
//! An optional deadline cancels the child token when it expires.

use crate::error::TransferError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handle tasks use to observe the call being cancelled or timing out
#[derive(Debug, Clone)]
pub struct Interrupt {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The error an interrupted item resolves with
    pub fn error(&self) -> TransferError {
        if self.timed_out.load(Ordering::Acquire) {
            TransferError::Timeout
        } else {
            TransferError::Cancelled
        }
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` unless the call is interrupted first
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.error()),
            result = fut => result,
        }
    }
}

/// Cancellation scope of a single orchestration call
pub struct CallScope {
    interrupt: Interrupt,
    timer: Option<JoinHandle<()>>,
}

impl CallScope {
    pub fn new(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        let interrupt = Interrupt {
            token: parent.child_token(),
            timed_out: Arc::new(AtomicBool::new(false)),
        };

        let timer = timeout.map(|timeout| {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!("Transfer deadline of {:?} expired, cancelling", timeout);
                        interrupt.timed_out.store(true, Ordering::Release);
                        interrupt.token.cancel();
                    }
                    _ = interrupt.token.cancelled() => {}
                }
            })
        });

        Self { interrupt, timer }
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
