//! Cooperative timer loop.
//!
//! A single task owns the queue and dispatches callbacks whose deadline
//! has passed, in enqueue order. Unripe events are re-enqueued, and the
//! loop sleeps until the nearest deadline (capped at 100 ms) or until
//! [`EventLoop::post`] wakes it. Callbacks run on the loop task and must
//! not block; anything slow belongs in a spawned task.
//!
//! The loop guarantees FIFO ordering among events whose deadlines have
//! both elapsed; it does not order events scheduled for different future
//! instants beyond their deadlines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Upper bound on a single sleep, so quits and re-posts are noticed.
const MAX_SLEEP: Duration = Duration::from_millis(100);

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct QueuedEvent {
    callback: Callback,
    scheduled_for: Instant,
}

struct Inner {
    queue: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
    quit: AtomicBool,
}

/// Handle to a cooperative timer loop. Cheap to clone; all clones feed
/// the same queue.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<Inner>,
}

impl EventLoop {
    /// Create a new, not-yet-running loop.
    pub fn new() -> Self {
        EventLoop {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                quit: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue `callback` to run once `scheduled_for` has passed.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static, scheduled_for: Instant) {
        self.inner.queue.lock().unwrap().push_back(QueuedEvent {
            callback: Box::new(callback),
            scheduled_for,
        });
        self.inner.notify.notify_one();
    }

    /// Enqueue `callback` to run as soon as possible.
    pub fn put(&self, callback: impl FnOnce() + Send + 'static) {
        self.post(callback, Instant::now());
    }

    /// Make [`run`](Self::run) return once the current dispatch step
    /// completes.
    pub fn quit(&self) {
        self.inner.quit.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Drive the loop until [`quit`](Self::quit).
    pub async fn run(&self) {
        loop {
            if self.inner.quit.load(Ordering::Acquire) {
                return;
            }

            let nearest = self.process_events();

            let sleep_for = nearest.unwrap_or(MAX_SLEEP).min(MAX_SLEEP);
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Dispatch every ripe event in enqueue order, re-enqueue the rest,
    /// and return the time until the nearest unripe deadline.
    fn process_events(&self) -> Option<Duration> {
        let drained: VecDeque<QueuedEvent> =
            std::mem::take(&mut *self.inner.queue.lock().unwrap());

        let now = Instant::now();
        let mut nearest: Option<Duration> = None;

        for event in drained {
            if event.scheduled_for <= now {
                (event.callback)();
            } else {
                let until = event.scheduled_for - now;
                nearest = Some(match nearest {
                    Some(d) => d.min(until),
                    None => until,
                });
                self.inner
                    .queue
                    .lock()
                    .unwrap()
                    .push_back(event);
            }
        }

        nearest
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
