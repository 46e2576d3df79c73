//! The abstract output buffer contract and a concrete local implementation.
//!
//! The wire format and the HTTP surface that actually moves pages between
//! nodes are out of scope (spec §1); this module defines only the seam the
//! conductor couples task completion to (spec §4.7), plus
//! [`LocalOutputBuffer`], a single-process implementation used by tests and
//! by embedders that do not need cross-node page transport.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Lifecycle state of an [`OutputBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting pages, not yet told there are no more.
    Open,
    /// `no_more_pages()` has been called; still draining to consumers.
    NoMorePages,
    /// Actively flushing remaining buffered pages to consumers.
    Flushing,
    /// Fully drained. Terminal.
    Finished,
    /// A producer or consumer failure tore the buffer down. Terminal.
    Failed,
    /// Aborted by the control plane (typically following task abort).
    /// Terminal.
    Aborted,
}

impl BufferState {
    /// True for the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Aborted)
    }
}

/// A listener invoked on every buffer state transition.
///
/// Per spec §4.7, listeners must not assume they hold the buffer's internal
/// lock while running — [`LocalOutputBuffer`] always calls these after
/// releasing it.
pub type StateChangeListener = Box<dyn Fn(BufferState) + Send + Sync>;

/// The sink that output drivers push pages into.
///
/// Abstract to this crate: the conductor only ever touches a buffer through
/// this trait, never a concrete page-transport implementation (spec §1,
/// §2.3).
pub trait OutputBuffer: Send + Sync {
    /// The buffer's current lifecycle state.
    fn state(&self) -> BufferState;

    /// Fraction of capacity currently in use, in `[0.0, 1.0]`.
    fn utilization(&self) -> f64;

    /// Idempotently transitions `OPEN -> NO_MORE_PAGES`.
    fn no_more_pages(&self);

    /// Registers a listener fired on every subsequent state transition.
    fn add_state_change_listener(&self, listener: StateChangeListener);

    /// The recorded failure cause, if the buffer is in `FAILED` state.
    fn failure_cause(&self) -> Option<String> {
        None
    }

    /// Forces the buffer into a terminal `ABORTED` state. Idempotent.
    fn abort(&self);
}

struct SharedState {
    buffer_state: BufferState,
    used_bytes: u64,
    failure_cause: Option<String>,
    capacity_waiters: VecDeque<Waker>,
}

/// A bounded, single-process [`OutputBuffer`] backed by byte accounting
/// only (it does not actually store page contents — callers account for
/// bytes in and bytes drained; the real payload lives wherever the page
/// transport the control plane wires up keeps it).
///
/// Modeled on [`crate::memory::MemoryAccount`]'s wait-then-commit shape for
/// `wait_for_capacity()`.
pub struct LocalOutputBuffer {
    capacity_bytes: u64,
    state: Mutex<SharedState>,
    listeners: Mutex<Vec<StateChangeListener>>,
}

impl LocalOutputBuffer {
    /// Creates an empty, `OPEN` buffer with the given byte capacity.
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            capacity_bytes,
            state: Mutex::new(SharedState {
                buffer_state: BufferState::Open,
                used_bytes: 0,
                failure_cause: None,
                capacity_waiters: VecDeque::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Accounts for `bytes` worth of a newly produced page. Never blocks;
    /// callers that need backpressure await [`Self::wait_for_capacity`]
    /// first.
    pub fn add_page(&self, bytes: u64) {
        let mut state = self.state.lock().expect("output buffer lock poisoned");
        state.used_bytes = state.used_bytes.saturating_add(bytes);
    }

    /// A future that resolves once the buffer has room for more pages.
    #[must_use]
    pub fn wait_for_capacity(self: &Arc<Self>) -> CapacityFuture {
        CapacityFuture {
            buffer: self.clone(),
        }
    }

    /// Accounts for a consumer draining `bytes` worth of pages, waking
    /// capacity waiters and advancing `NO_MORE_PAGES -> FLUSHING ->
    /// FINISHED` when draining completes.
    pub fn drain(&self, bytes: u64) {
        let mut transition = None;
        {
            let mut state = self.state.lock().expect("output buffer lock poisoned");
            state.used_bytes = state.used_bytes.saturating_sub(bytes);
            if state.used_bytes < self.capacity_bytes {
                if let Some(waker) = state.capacity_waiters.pop_front() {
                    waker.wake();
                }
            }
            if state.buffer_state == BufferState::NoMorePages && state.used_bytes == 0 {
                state.buffer_state = BufferState::Flushing;
                transition = Some(BufferState::Flushing);
            } else if state.buffer_state == BufferState::Flushing && state.used_bytes == 0 {
                state.buffer_state = BufferState::Finished;
                transition = Some(BufferState::Finished);
            }
        }
        if let Some(new_state) = transition {
            self.notify_listeners(new_state);
        }
    }

    /// Forces the buffer into `FAILED` with the given cause. Idempotent:
    /// a no-op once the buffer is already terminal.
    pub fn fail(&self, cause: impl Into<String>) {
        let fired = {
            let mut state = self.state.lock().expect("output buffer lock poisoned");
            if state.buffer_state.is_terminal() {
                false
            } else {
                state.buffer_state = BufferState::Failed;
                state.failure_cause = Some(cause.into());
                true
            }
        };
        if fired {
            self.notify_listeners(BufferState::Failed);
        }
    }

    /// Forces the buffer into `ABORTED`. Idempotent.
    pub fn abort(&self) {
        let fired = {
            let mut state = self.state.lock().expect("output buffer lock poisoned");
            if state.buffer_state.is_terminal() {
                false
            } else {
                state.buffer_state = BufferState::Aborted;
                true
            }
        };
        if fired {
            self.notify_listeners(BufferState::Aborted);
        }
    }

    fn notify_listeners(&self, new_state: BufferState) {
        let listeners = self.listeners.lock().expect("output buffer listeners lock poisoned");
        for listener in listeners.iter() {
            listener(new_state);
        }
    }
}

impl OutputBuffer for LocalOutputBuffer {
    fn state(&self) -> BufferState {
        self.state.lock().expect("output buffer lock poisoned").buffer_state
    }

    fn utilization(&self) -> f64 {
        let state = self.state.lock().expect("output buffer lock poisoned");
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let utilization = state.used_bytes as f64 / self.capacity_bytes as f64;
        utilization.clamp(0.0, 1.0)
    }

    fn no_more_pages(&self) {
        let fired = {
            let mut state = self.state.lock().expect("output buffer lock poisoned");
            if state.buffer_state == BufferState::Open {
                state.buffer_state = if state.used_bytes == 0 {
                    BufferState::Finished
                } else {
                    BufferState::NoMorePages
                };
                true
            } else {
                false
            }
        };
        if fired {
            let new_state = self.state();
            self.notify_listeners(new_state);
        }
    }

    fn add_state_change_listener(&self, listener: StateChangeListener) {
        self.listeners.lock().expect("output buffer listeners lock poisoned").push(listener);
    }

    fn failure_cause(&self) -> Option<String> {
        self.state.lock().expect("output buffer lock poisoned").failure_cause.clone()
    }

    fn abort(&self) {
        self.abort();
    }
}

/// Future returned by [`LocalOutputBuffer::wait_for_capacity`].
pub struct CapacityFuture {
    buffer: Arc<LocalOutputBuffer>,
}

impl Future for CapacityFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.buffer.state.lock().expect("output buffer lock poisoned");
        if state.used_bytes < self.buffer.capacity_bytes {
            Poll::Ready(())
        } else {
            state.capacity_waiters.push_back(cx.waker().clone());
            Poll::Pending
        }
    }
}
