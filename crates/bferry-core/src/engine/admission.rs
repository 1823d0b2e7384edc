//! Bounded admission gate
//!
//! A FIFO-fair semaphore with `limit` permits. The orchestrator acquires a
//! permit before spawning each unit of work, in input order, and the spawned
//! task holds it until its store call has settled.

use super::scope::Interrupt;
use crate::error::TransferError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits how many transfers are in flight at once
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `limit` units; 0 is rejected
    pub fn new(limit: usize) -> Result<Self, TransferError> {
        if limit == 0 {
            return Err(TransferError::InvalidConfig(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Units currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of units that held a permit at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Wait for a permit, giving up if the call is interrupted first
    pub async fn acquire(&self, interrupt: &Interrupt) -> Result<AdmissionPermit, TransferError> {
        let permit = tokio::select! {
            biased;
            _ = interrupt.cancelled() => return Err(interrupt.error()),
            permit = self.semaphore.clone().acquire_owned() => permit,
        };
        // The semaphore is never closed while the gate is alive
        let permit = permit.map_err(|_| interrupt.error())?;

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);

        Ok(AdmissionPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }
}

/// Held by a running unit of work; releases its slot on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scope::CallScope;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_zero_limit_rejected() {
        assert!(matches!(
            AdmissionGate::new(0),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_permits_are_bounded_and_released() {
        let root = CancellationToken::new();
        let scope = CallScope::new(&root, None);
        let gate = AdmissionGate::new(2).unwrap();

        let a = gate.acquire(scope.interrupt()).await.unwrap();
        let _b = gate.acquire(scope.interrupt()).await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let gate2 = gate.clone();
        let interrupt = scope.interrupt().clone();
        let waiter = tokio::spawn(async move { gate2.acquire(&interrupt).await.map(|_| ()) });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(a);
        tokio_test::assert_ok!(waiter.await.unwrap());
        assert_eq!(gate.peak(), 2);
    }

    #[tokio::test]
    async fn test_waiting_acquire_observes_cancel() {
        let root = CancellationToken::new();
        let scope = CallScope::new(&root, None);
        let gate = AdmissionGate::new(1).unwrap();
        let _held = gate.acquire(scope.interrupt()).await.unwrap();

        root.cancel();
        let err = gate.acquire(scope.interrupt()).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(gate.in_flight(), 1);
    }
}
