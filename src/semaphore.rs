//! Fixed-capacity admission control for verification subprocesses
//!
//! [`AdmissionSemaphore`] bounds how many tool subprocesses run at once.
//! Waiters are served strictly in arrival order; a released slot is handed
//! directly to the longest-waiting acquirer instead of being returned to the
//! pool, so a burst of late arrivals can never starve an early waiter.
//!
//! Permits are RAII. A waiter dropped mid-wait (timeout, task abort) either
//! removes itself cleanly or, when a slot had already been handed to it,
//! forwards that slot to the next waiter. Accounting never goes negative.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

struct SemState {
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting semaphore with FIFO waiters and RAII permits
///
/// Capacity is fixed at construction and clamped to at least one so a
/// misconfigured limit of zero cannot wedge every acquirer forever.
pub struct AdmissionSemaphore {
    capacity: usize,
    state: Mutex<SemState>,
}

impl AdmissionSemaphore {
    /// Creates a semaphore admitting at most `capacity` concurrent holders
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(SemState {
                in_use: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Maximum concurrent holders
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Waits for a slot, borrowed-permit form
    pub async fn acquire(&self) -> AdmissionPermit<'_> {
        self.wait_for_slot().await;
        AdmissionPermit { semaphore: self }
    }

    /// Waits for a slot, owned-permit form for use in spawned tasks
    pub async fn acquire_owned(self: Arc<Self>) -> OwnedAdmissionPermit {
        self.wait_for_slot().await;
        OwnedAdmissionPermit { semaphore: self }
    }

    async fn wait_for_slot(&self) {
        loop {
            let rx = {
                let mut state = self.lock();
                if state.in_use < self.capacity {
                    state.in_use += 1;
                    return;
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            if (SlotWaiter {
                semaphore: self,
                rx,
                granted: false,
            })
            .await
            {
                // Slot handed over by a releaser; accounting already counts it.
                return;
            }
            // Sender dropped without a grant; start over.
        }
    }

    /// Returns one slot: hands it to the longest waiter still listening,
    /// otherwise decrements the held count.
    fn release_slot(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
            // That waiter was cancelled; try the next one.
        }
        state.in_use = state.in_use.saturating_sub(1);
    }

    fn lock(&self) -> MutexGuard<'_, SemState> {
        // Waiter bookkeeping stays valid even if a panic poisoned the lock.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AdmissionSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AdmissionSemaphore")
            .field("capacity", &self.capacity)
            .field("in_use", &state.in_use)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Pending wait for a slot hand-off
///
/// Dropping it mid-wait forwards an already-granted slot to the next waiter,
/// closing the race between cancellation and a concurrent release.
struct SlotWaiter<'a> {
    semaphore: &'a AdmissionSemaphore,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Future for SlotWaiter<'_> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                this.granted = true;
                Poll::Ready(true)
            }
            Poll::Ready(Err(_)) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SlotWaiter<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            // A release raced our cancellation; the slot is ours to pass on.
            self.semaphore.release_slot();
        }
    }
}

/// Borrowed admission slot; dropping it releases the slot exactly once
#[must_use]
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    semaphore: &'a AdmissionSemaphore,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release_slot();
    }
}

/// Owned admission slot for spawned tasks; dropping it releases the slot
/// exactly once
#[must_use]
#[derive(Debug)]
pub struct OwnedAdmissionPermit {
    semaphore: Arc<AdmissionSemaphore>,
}

impl Drop for OwnedAdmissionPermit {
    fn drop(&mut self) {
        self.semaphore.release_slot();
    }
}
