//! FIFO waypoint buffer shared between a producer (the controller) and one
//! interpolation worker.
//!
//! The queue lives behind a `std::sync::Mutex` that is never held across an
//! `.await`; two `Notify`s wake a worker waiting for items and producers
//! waiting for space. `close()` wakes everyone and makes further pushes fail.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::motion::trajectory::{MotionError, Waypoint};

#[derive(Debug, Default)]
struct BufferInner {
    queue: VecDeque<Waypoint>,
    // A waypoint handed to the worker and not yet finished.
    active: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct MotionBuffer {
    inner: Mutex<BufferInner>,
    capacity: Option<usize>,
    item_ready: Notify,
    space_ready: Notify,
}

impl MotionBuffer {
    /// `capacity` of `None` (or `Some(0)`) means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(BufferInner::default()),
            capacity: capacity.filter(|c| *c > 0),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a waypoint, waiting for space when the buffer is bounded and full.
    pub async fn push(&self, waypoint: Waypoint) -> Result<(), MotionError> {
        let mut waypoint = Some(waypoint);
        loop {
            let notified = self.space_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(MotionError::Shutdown);
                }
                let full = self.capacity.is_some_and(|cap| inner.queue.len() >= cap);
                if !full {
                    if let Some(wp) = waypoint.take() {
                        inner.queue.push_back(wp);
                    }
                    drop(inner);
                    self.item_ready.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Wait for the next waypoint. Returns `None` once the buffer is closed.
    ///
    /// The returned waypoint stays counted as in flight until `finish()`.
    pub async fn pop(&self) -> Option<Waypoint> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(wp) = inner.queue.pop_front() {
                    inner.active = true;
                    drop(inner);
                    self.space_ready.notify_waiters();
                    return Some(wp);
                }
            }
            notified.await;
        }
    }

    /// Mark the in-flight waypoint as done (committed or discarded).
    pub fn finish(&self) {
        self.lock().active = false;
    }

    /// Drop every pending waypoint and forget the in-flight one.
    ///
    /// Returns how many pending waypoints were discarded and whether one was
    /// in flight at the time of the clear.
    pub fn clear(&self) -> (usize, bool) {
        let cleared = {
            let mut inner = self.lock();
            let dropped = inner.queue.len();
            inner.queue.clear();
            (dropped, std::mem::take(&mut inner.active))
        };
        self.space_ready.notify_waiters();
        cleared
    }

    /// Close the buffer: pending pops return `None`, pushes fail.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
            inner.queue.clear();
            inner.active = false;
        }
        self.item_ready.notify_waiters();
        // Wake a worker that is not waiting yet as well.
        self.item_ready.notify_one();
        self.space_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Pending waypoints, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when nothing is pending and nothing is in flight.
    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.queue.is_empty() && !inner.active
    }
}
