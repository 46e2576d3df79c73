//! Process-wide byte accounting for a single task.
//!
//! [`MemoryAccount`] is pure bookkeeping: it does not know what is using the
//! memory, only how much is reserved. The core's only contract with it is
//! `reserve(bytes) -> Future<()>` and `release(bytes)`, per spec §2.2; the
//! two-phase wait-then-commit shape follows the teacher's `sync::Semaphore`
//! (wait for availability is cancel-safe, the commit step cannot fail).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

/// A task's byte budget.
///
/// `reserve` blocks (via an incomplete future, never a blocked thread) until
/// the account has room; `release` gives bytes back and wakes the oldest
/// waiter. Memory exhaustion is not a failure mode for the core — per spec
/// §7, a task experiencing sustained pressure simply stays below its
/// high-water mark until the control plane cancels it or consumption
/// elsewhere frees room.
#[derive(Debug)]
pub struct MemoryAccount {
    state: Mutex<MemoryState>,
    limit_bytes: u64,
}

#[derive(Debug)]
struct MemoryState {
    used_bytes: u64,
    waiters: VecDeque<Waker>,
}

impl MemoryAccount {
    /// Creates an account with the given byte limit (the "high-water
    /// mark").
    #[must_use]
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                used_bytes: 0,
                waiters: VecDeque::new(),
            }),
            limit_bytes,
        }
    }

    /// Bytes currently charged to this task.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().expect("memory account lock poisoned").used_bytes
    }

    /// The configured high-water mark.
    #[must_use]
    pub const fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// True if the account is currently below its limit.
    #[must_use]
    pub fn has_headroom(&self) -> bool {
        self.used_bytes() < self.limit_bytes
    }

    /// Reserves `bytes`, waiting (without blocking a worker thread) until
    /// there is room. Reservations larger than the total limit will never
    /// be satisfied and the caller will wait forever; this mirrors the
    /// account being pure bookkeeping with no admission-size cap of its own.
    pub fn reserve(self: &std::sync::Arc<Self>, bytes: u64) -> ReserveFuture {
        ReserveFuture {
            account: self.clone(),
            bytes,
        }
    }

    /// Releases previously reserved bytes back to the account, waking the
    /// oldest waiter if the account now has room.
    pub fn release(&self, bytes: u64) {
        let mut state = self.state.lock().expect("memory account lock poisoned");
        state.used_bytes = state.used_bytes.saturating_sub(bytes);
        if state.used_bytes < self.limit_bytes {
            if let Some(waker) = state.waiters.pop_front() {
                waker.wake();
            }
        }
    }

    /// A future that resolves the next time the account has headroom,
    /// without reserving anything. This is the backpressure ticket
    /// referenced in spec §5 ("the future returned by the account's
    /// `not_full()` query").
    pub fn not_full(self: &std::sync::Arc<Self>) -> NotFullFuture {
        NotFullFuture {
            account: self.clone(),
        }
    }
}

/// Future returned by [`MemoryAccount::reserve`].
pub struct ReserveFuture {
    account: std::sync::Arc<MemoryAccount>,
    bytes: u64,
}

impl Future for ReserveFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self
            .account
            .state
            .lock()
            .expect("memory account lock poisoned");
        if state.used_bytes.saturating_add(self.bytes) <= self.account.limit_bytes {
            state.used_bytes = state.used_bytes.saturating_add(self.bytes);
            Poll::Ready(())
        } else {
            state.waiters.push_back(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Future returned by [`MemoryAccount::not_full`].
pub struct NotFullFuture {
    account: std::sync::Arc<MemoryAccount>,
}

impl Future for NotFullFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self
            .account
            .state
            .lock()
            .expect("memory account lock poisoned");
        if state.used_bytes < self.account.limit_bytes {
            Poll::Ready(())
        } else {
            state.waiters.push_back(cx.waker().clone());
            Poll::Pending
        }
    }
}
