//! 1:N broadcast stage (spec.md §4.2).
//!
//! Delivers every message from one input stream to N registered subscriber
//! queues. A full subscriber queue drops the message for that subscriber
//! only — slow subscribers never stall the pipeline or each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Bounded subscriber queue depth (spec.md §4.2).
pub const SUBSCRIBER_DEPTH: usize = 1024;

type Subscribers<T> = Arc<Mutex<HashMap<Uuid, mpsc::Sender<T>>>>;

/// Unsubscribes a single [`Fanout`] subscriber. Calling it more than once is
/// a no-op after the first call.
pub type Unsubscribe = Box<dyn Fn() + Send + Sync>;

pub struct Fanout<T> {
    subscribers: Subscribers<T>,
    cancel: Arc<Notify>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl<T> Fanout<T>
where
    T: Clone + Send + 'static,
{
    /// Spawns the publishing task over `input`, consuming it until the
    /// channel closes or [`Fanout::close`] is called.
    pub fn new(mut input: mpsc::Receiver<T>) -> Self {
        let subscribers: Subscribers<T> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = Arc::new(Notify::new());
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let task_subscribers = subscribers.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.notified() => break,
                    maybe_message = input.recv() => {
                        match maybe_message {
                            Some(message) => {
                                let subs = task_subscribers.lock().unwrap();
                                for sender in subs.values() {
                                    // Non-blocking: drop for this subscriber if its queue is full.
                                    let _ = sender.try_send(message.clone());
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Fanout { subscribers, cancel, closed }
    }

    /// Registers a fresh bounded queue and returns it alongside a function
    /// that deregisters it. Safe under concurrent callers.
    pub fn subscribe(&self) -> (mpsc::Receiver<T>, Unsubscribe) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_DEPTH);
        self.subscribers.lock().unwrap().insert(id, tx);

        let subscribers = self.subscribers.clone();
        let unsubscribe: Unsubscribe = Box::new(move || {
            subscribers.lock().unwrap().remove(&id);
        });

        (rx, unsubscribe)
    }

    /// Halts the publishing task and drops all subscribers. Idempotent.
    pub fn close(&self) {
        if self
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        self.cancel.notify_one();
        self.subscribers.lock().unwrap().clear();
    }
}

impl<T> Drop for Fanout<T> {
    fn drop(&mut self) {
        self.close();
    }
}
