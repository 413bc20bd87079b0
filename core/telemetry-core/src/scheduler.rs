//! Task scheduling seam.
//!
//! `JournalingTracker` and `Publisher` never spawn threads or sleep
//! themselves; they submit work through a `Scheduler`, so the same
//! rotation/publish logic runs against a real clock in production and
//! against a manually-advanced virtual clock in tests (see
//! `tests/end_to_end.rs`).

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Opaque handle returned by [`Scheduler::schedule`]; drop or call
/// [`ScheduledHandle::cancel`] to prevent the task from running.
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }
}

/// Host-facing scheduling seam: one task queue, run serially, with
/// relative-delay timers.
pub trait Scheduler: Send + Sync {
    /// Runs `task` as soon as the scheduler's worker is free.
    fn submit(&self, task: Box<dyn FnOnce() + Send>);

    /// Runs `task` no sooner than `delay` from now. Returns a handle that
    /// cancels the task if called before it runs.
    fn schedule(&self, task: Box<dyn FnOnce() + Send>, delay: Duration) -> ScheduledHandle;
}

/// Single worker thread, FIFO submission order, a dedicated timer thread for
/// delayed tasks. This is the scheduler a host uses outside of tests.
pub struct SystemScheduler {
    sender: std::sync::mpsc::Sender<Box<dyn FnOnce() + Send>>,
}

impl SystemScheduler {
    pub fn new() -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<Box<dyn FnOnce() + Send>>();
        thread::Builder::new()
            .name("analytics-scheduler".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .expect("spawn analytics scheduler worker");

        SystemScheduler { sender }
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SystemScheduler {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        let _ = self.sender.send(task);
    }

    fn schedule(&self, task: Box<dyn FnOnce() + Send>, delay: Duration) -> ScheduledHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = ScheduledHandle {
            cancelled: Arc::clone(&cancelled),
        };

        let sender = self.sender.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if cancelled.load(AtomicOrdering::SeqCst) {
                return;
            }
            let _ = sender.send(task);
        });

        handle
    }
}

struct VirtualTask {
    due: Instant,
    sequence: u64,
    cancelled: Arc<AtomicBool>,
    task: Box<dyn FnOnce() + Send>,
}

impl PartialEq for VirtualTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}
impl Eq for VirtualTask {}

impl Ord for VirtualTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due task sorts first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for VirtualTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct VirtualState {
    now: Instant,
    queue: BinaryHeap<VirtualTask>,
    sequence: u64,
    queued: u64,
    executed: u64,
}

/// Deterministic scheduler for tests: nothing runs until [`VirtualScheduler::advance`]
/// is called, and tasks run in strict due-time order on the calling thread.
pub struct VirtualScheduler {
    state: Mutex<VirtualState>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        VirtualScheduler {
            state: Mutex::new(VirtualState {
                now: Instant::now(),
                queue: BinaryHeap::new(),
                sequence: 0,
                queued: 0,
                executed: 0,
            }),
        }
    }

    /// Advances the virtual clock by `delta`, running every task whose delay
    /// has elapsed, in due-time order. A task that reschedules itself within
    /// the same advance window runs too, as long as its new due time still
    /// falls within `delta`.
    pub fn advance(&self, delta: Duration) {
        let target = {
            let mut state = self.state.lock().unwrap();
            state.now += delta;
            state.now
        };

        loop {
            let next = {
                let mut state = self.state.lock().unwrap();
                match state.queue.peek() {
                    Some(task) if task.due <= target => {
                        let task = state.queue.pop().unwrap();
                        if task.cancelled.load(AtomicOrdering::SeqCst) {
                            continue;
                        }
                        Some(task)
                    }
                    _ => None,
                }
            };

            match next {
                Some(task) => {
                    (task.task)();
                    self.state.lock().unwrap().executed += 1;
                }
                None => break,
            }
        }
    }

    pub fn queued_count(&self) -> u64 {
        self.state.lock().unwrap().queued
    }

    pub fn executed_count(&self) -> u64 {
        self.state.lock().unwrap().executed
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for VirtualScheduler {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();
        let due = state.now;
        let sequence = state.sequence;
        state.sequence += 1;
        state.queued += 1;
        state.queue.push(VirtualTask {
            due,
            sequence,
            cancelled: Arc::new(AtomicBool::new(false)),
            task,
        });
    }

    fn schedule(&self, task: Box<dyn FnOnce() + Send>, delay: Duration) -> ScheduledHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock().unwrap();
        let due = state.now + delay;
        let sequence = state.sequence;
        state.sequence += 1;
        state.queued += 1;
        state.queue.push(VirtualTask {
            due,
            sequence,
            cancelled: Arc::clone(&cancelled),
            task,
        });

        ScheduledHandle { cancelled }
    }
}
