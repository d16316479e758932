//! Single-threaded cooperative message pump.
//!
//! One OS thread drains a deadline-ordered mailbox of [`Message`]s. The
//! engine posts work through a cloneable [`Handle`]; handlers run strictly
//! one at a time on the pump thread, which is what lets the engine treat
//! "runs on the pump thread" as a serialization domain for everything the
//! prefetcher touches.
//!
//! [`Scheduler::stop`] (also invoked on drop) wakes the thread, drains
//! nothing further, and joins — after it returns, no handler will run
//! again. Teardown code relies on that guarantee.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

/// Work items the pump thread understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
    /// Perform one prefetch step and reschedule.
    Fetch,
    /// Service (or defer) a pending consumer read.
    Read { offset: u64, len: usize },
}

/// A mailbox entry: a message and the instant it becomes due.
///
/// Ordered so the [`BinaryHeap`] pops the earliest deadline first, with the
/// posting sequence breaking ties (FIFO among same-deadline messages).
#[derive(Debug)]
struct Entry {
    due: Instant,
    seq: u64,
    msg: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we want the earliest entry
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct MailboxState {
    queue: BinaryHeap<Entry>,
    next_seq: u64,
    stopped: bool,
}

/// Shared mailbox: deadline-ordered queue plus wakeup condvar.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
    available: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Cloneable posting handle to a [`Mailbox`].
#[derive(Debug, Clone)]
pub(crate) struct Handle {
    mailbox: Arc<Mailbox>,
}

impl Handle {
    pub(crate) fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }

    /// Post a message due immediately.
    pub(crate) fn post(&self, msg: Message) {
        self.post_delayed(msg, Duration::ZERO);
    }

    /// Post a message due after `delay`.
    pub(crate) fn post_delayed(&self, msg: Message, delay: Duration) {
        let mut state = self.mailbox.state.lock();
        if state.stopped {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Entry {
            due: Instant::now() + delay,
            seq,
            msg,
        });
        drop(state);
        self.mailbox.available.notify_one();
    }
}

/// The pump thread and its mailbox.
///
/// Owns the thread; dropping the scheduler stops and joins it.
#[derive(Debug)]
pub(crate) struct Scheduler {
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the pump thread draining `mailbox` into `handler`.
    pub(crate) fn spawn<F>(name: &str, mailbox: Arc<Mailbox>, mut handler: F) -> Self
    where
        F: FnMut(Message) + Send + 'static,
    {
        let pump = Arc::clone(&mailbox);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    let msg = {
                        let mut state = pump.state.lock();
                        loop {
                            if state.stopped {
                                return;
                            }
                            let now = Instant::now();
                            match state.queue.peek() {
                                Some(entry) if entry.due <= now => {
                                    break state.queue.pop().expect("peeked entry").msg;
                                }
                                Some(entry) => {
                                    let due = entry.due;
                                    let _ = pump.available.wait_until(&mut state, due);
                                }
                                None => {
                                    pump.available.wait(&mut state);
                                }
                            }
                        }
                    };
                    trace!(?msg, "dispatching");
                    handler(msg);
                }
            })
            .expect("spawn scheduler thread");

        Self {
            mailbox,
            thread: Some(thread),
        }
    }

    /// Stop the pump thread and join it. Idempotent; no handler runs after
    /// this returns.
    pub(crate) fn stop(&mut self) {
        {
            let mut state = self.mailbox.state.lock();
            state.stopped = true;
        }
        self.mailbox.available.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn collector() -> (Arc<Mailbox>, Handle, mpsc::Receiver<Message>, Scheduler) {
        let mailbox = Mailbox::new();
        let handle = Handle::new(Arc::clone(&mailbox));
        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::spawn("test-pump", Arc::clone(&mailbox), move |msg| {
            tx.send(msg).unwrap();
        });
        (mailbox, handle, rx, scheduler)
    }

    #[test]
    fn test_immediate_messages_fifo() {
        let (_mailbox, handle, rx, _scheduler) = collector();
        handle.post(Message::Fetch);
        handle.post(Message::Read { offset: 1, len: 2 });
        handle.post(Message::Read { offset: 3, len: 4 });

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Message::Fetch);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Message::Read { offset: 1, len: 2 }
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Message::Read { offset: 3, len: 4 }
        );
    }

    #[test]
    fn test_delayed_message_ordering() {
        let (_mailbox, handle, rx, _scheduler) = collector();
        handle.post_delayed(Message::Read { offset: 9, len: 9 }, Duration::from_millis(80));
        handle.post(Message::Fetch);

        // the immediate message overtakes the delayed one
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Message::Fetch);
        let start = Instant::now();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Message::Read { offset: 9, len: 9 }
        );
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_stop_prevents_further_dispatch() {
        let (_mailbox, handle, rx, mut scheduler) = collector();
        handle.post(Message::Fetch);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Message::Fetch);

        scheduler.stop();
        handle.post(Message::Fetch);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_mailbox, _handle, _rx, mut scheduler) = collector();
        scheduler.stop();
        scheduler.stop();
    }
}
