//! Ordered, bounded fan-out of independent transfers
//!
//! Units are admitted in input order through an [`AdmissionGate`] and run
//! on a `JoinSet`. Each task reports its input index, so results land in
//! position-indexed slots no matter in which order they complete.

use super::admission::AdmissionGate;
use super::scope::Interrupt;
use crate::error::TransferError;
use bferry_types::{ObjectHandle, ObjectMetadata, TransferEvent, TransferKind};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Settled outcome of a multi-item operation
#[derive(Debug)]
pub struct TransferBatch<T> {
    /// One entry per input item, in input order
    pub results: Vec<Result<T, TransferError>>,
    /// Input index of the failure that settled first
    pub first_failure: Option<usize>,
}

impl<T> TransferBatch<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.first_failure.is_none()
    }

    /// All successes in input order, or the first failure
    pub fn into_result(self) -> Result<Vec<T>, TransferError> {
        let mut results = self.results;
        let first = self
            .first_failure
            .filter(|&i| matches!(results.get(i), Some(Err(_))));
        if let Some(index) = first {
            if let Err(error) = results.swap_remove(index) {
                return Err(error);
            }
        }
        results.into_iter().collect()
    }
}

/// Size reported in `ItemCompleted` events
pub trait Transferred {
    fn transferred_bytes(&self) -> u64;
}

impl Transferred for Vec<u8> {
    fn transferred_bytes(&self) -> u64 {
        self.len() as u64
    }
}

impl Transferred for (ObjectHandle, ObjectMetadata) {
    fn transferred_bytes(&self) -> u64 {
        self.1.size
    }
}

/// Runs one batch of units under a gate and an interrupt
pub struct FanOut<'a> {
    pub kind: TransferKind,
    pub gate: &'a AdmissionGate,
    pub interrupt: &'a Interrupt,
    pub events: &'a broadcast::Sender<TransferEvent>,
}

impl FanOut<'_> {
    /// Admit every item in order and wait for all of them to settle.
    ///
    /// A failing item never stops admission of its siblings. Once the call
    /// is interrupted, items not yet admitted resolve with the interrupt
    /// error without being started.
    pub async fn run<I, T, L, F>(&self, items: Vec<I>, label: L, task: F) -> TransferBatch<T>
    where
        I: Send + 'static,
        T: Transferred + Send + 'static,
        L: Fn(&I) -> String,
        F: Fn(usize, I) -> BoxFuture<'static, Result<T, TransferError>>,
    {
        let total = items.len();
        let mut slots: Vec<Option<(usize, Result<T, TransferError>)>> =
            (0..total).map(|_| None).collect();
        let settled = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = match self.gate.acquire(self.interrupt).await {
                Ok(permit) => permit,
                Err(e) => {
                    let order = settled.fetch_add(1, Ordering::AcqRel);
                    slots[index] = Some((order, Err(e)));
                    continue;
                }
            };

            let name = label(&item);
            debug!(
                "Admitting {} item {} ({}), {} in flight",
                self.kind,
                index,
                name,
                self.gate.in_flight()
            );
            let _ = self.events.send(TransferEvent::ItemStarted {
                kind: self.kind,
                index,
                name,
            });

            let fut = task(index, item);
            let kind = self.kind;
            let events = self.events.clone();
            let settled = settled.clone();
            join_set.spawn(async move {
                let result = fut.await;
                drop(permit);
                let order = settled.fetch_add(1, Ordering::AcqRel);

                let event = match result {
                    Ok(ref value) => TransferEvent::ItemCompleted {
                        kind,
                        index,
                        bytes: value.transferred_bytes(),
                    },
                    Err(ref e) => {
                        warn!("{} item {} failed: {}", kind, index, e);
                        TransferEvent::ItemFailed {
                            kind,
                            index,
                            error: e.to_string(),
                        }
                    }
                };
                let _ = events.send(event);
                (index, order, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, order, result)) => slots[index] = Some((order, result)),
                Err(e) => error!("{} task failed to complete: {}", self.kind, e),
            }
        }

        debug!("{} settled {} items, peak {} in flight", self.kind, total, self.gate.peak());

        let mut first_failure: Option<(usize, usize)> = None;
        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let (order, result) = slot.unwrap_or_else(|| {
                    (
                        usize::MAX,
                        Err(TransferError::TaskFailed(format!("item {} did not complete", index))),
                    )
                });
                if result.is_err() && first_failure.map_or(true, |(first, _)| order < first) {
                    first_failure = Some((order, index));
                }
                result
            })
            .collect();

        TransferBatch {
            results,
            first_failure: first_failure.map(|(_, index)| index),
        }
    }
}
