use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A deferred unit of work for a tab, as plain data so helper threads can
/// enqueue it without touching DOM or script state. Every script-related
/// task carries the generation of the context that created it; a task whose
/// generation no longer matches is dropped unrun.
#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Evaluate fetched script source.
    RunScript { source: String, generation: u64 },
    /// A `setTimeout` deadline elapsed.
    Timer { id: i32, generation: u64 },
    /// An asynchronous XHR completed with this response body.
    XhrOnload { handle: i32, body: String, generation: u64 },
}

/// Per-tab FIFO of deferred tasks.
///
/// Enqueue is thread-safe and may happen from helper threads; dequeue
/// happens on the UI thread, one queue pass per event-loop tick. The waker
/// nudges the UI loop so an enqueued task is not stuck waiting for the next
/// input event.
#[derive(Default)]
pub struct TaskRunner {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    waker: Mutex<Option<egui::Context>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_waker(&self, ctx: egui::Context) {
        *self.waker.lock().expect("task waker poisoned") = Some(ctx);
    }

    pub fn enqueue(&self, task: Task) {
        self.queue.lock().expect("task queue poisoned").push_back(task);
        self.available.notify_one();
        if let Some(ctx) = self.waker.lock().expect("task waker poisoned").as_ref() {
            ctx.request_repaint();
        }
    }

    /// Pops the next task without blocking.
    pub fn try_dequeue(&self) -> Option<Task> {
        self.queue.lock().expect("task queue poisoned").pop_front()
    }

    /// Blocks up to `timeout` for a task to arrive.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Task> {
        let guard = self.queue.lock().expect("task queue poisoned");
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .expect("task queue poisoned");
        guard.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("task queue poisoned").is_empty()
    }
}
