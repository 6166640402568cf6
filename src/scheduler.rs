//! The scheduling context the client runs on.
//!
//! Everything in the client happens on one thread: socket callbacks, cache
//! cleanup and transaction timeouts are all tasks posted to a [Scheduler].

#[cfg(feature = "logging")]
use crate::log::trace;
use std::{
    cell::{Cell, RefCell},
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    time::{Duration, SystemTime},
};

/// Identifies a posted task so that it can be cancelled.
pub type TaskId = u64;

/// A deferred task.
pub type Task = Box<dyn FnOnce()>;

/// A single-threaded task runner with a clock.
pub trait Scheduler {
    /// Current time as UNIX millis.
    fn now_millis(&self) -> u64;

    /// Runs `task` once `delay` has passed, never from inside this call.
    /// A zero delay means the next turn.
    fn post_delayed(&self, delay: Duration, task: Task) -> TaskId;

    /// Cancels a task that has not run yet. Unknown ids are ignored.
    fn cancel(&self, id: TaskId);
}

/// Returns UNIX time in millis
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

enum Clock {
    System,
    Manual(Cell<u64>),
}

/// A timer heap of posted tasks, keyed by their deadline.
///
/// The host calls [TimerQueue::run_due] whenever it wakes up. With a manual
/// clock, time only moves through [TimerQueue::advance], which makes the
/// queue usable in tests.
pub struct TimerQueue {
    clock: Clock,
    next_id: Cell<TaskId>,

    /// (deadline, id), earliest first.
    heap: RefCell<BinaryHeap<Reverse<(u64, TaskId)>>>,

    /// Pending tasks. A cancelled task is removed here and its heap entry is
    /// skipped when popped.
    tasks: RefCell<HashMap<TaskId, Task>>,
}

impl TimerQueue {
    /// A queue on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::System)
    }

    /// A queue whose clock starts at `start_millis` and moves only by [TimerQueue::advance].
    pub fn with_manual_clock(start_millis: u64) -> Self {
        Self::with_clock(Clock::Manual(Cell::new(start_millis)))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            next_id: Cell::new(1),
            heap: RefCell::new(BinaryHeap::new()),
            tasks: RefCell::new(HashMap::new()),
        }
    }

    /// Moves a manual clock forward. No effect on the system clock.
    pub fn advance(&self, delta: Duration) {
        if let Clock::Manual(now) = &self.clock {
            now.set(now.get() + delta.as_millis() as u64);
        }
    }

    /// Number of tasks not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<u64> {
        let mut heap = self.heap.borrow_mut();
        let tasks = self.tasks.borrow();
        while let Some(Reverse((deadline, id))) = heap.peek() {
            if tasks.contains_key(id) {
                return Some(*deadline);
            }
            heap.pop();
        }
        None
    }

    /// Time until the earliest pending task, zero if it is already due.
    pub fn time_to_next(&self) -> Option<Duration> {
        let now = self.now_millis();
        self.next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now)))
    }

    /// Runs every task due now, in deadline order. Tasks posted while running
    /// wait for the next call. Returns how many tasks ran.
    pub fn run_due(&self) -> usize {
        let now = self.now_millis();
        let mut due = Vec::new();
        {
            let mut heap = self.heap.borrow_mut();
            while let Some(Reverse((deadline, id))) = heap.peek() {
                if *deadline > now {
                    break;
                }
                due.push(*id);
                heap.pop();
            }
        }

        let mut count = 0;
        for id in due {
            // Removing before running: the task may cancel or post others.
            let task = self.tasks.borrow_mut().remove(&id);
            if let Some(task) = task {
                trace!("run task {}", id);
                task();
                count += 1;
            }
        }
        count
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TimerQueue {
    fn now_millis(&self) -> u64 {
        match &self.clock {
            Clock::System => current_time_millis(),
            Clock::Manual(now) => now.get(),
        }
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let deadline = self.now_millis() + delay.as_millis() as u64;
        self.heap.borrow_mut().push(Reverse((deadline, id)));
        self.tasks.borrow_mut().insert(id, task);
        id
    }

    fn cancel(&self, id: TaskId) {
        if self.tasks.borrow_mut().remove(&id).is_some() {
            trace!("cancel task {}", id);
        }
    }
}
