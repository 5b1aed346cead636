//! N:1 aggregator (spec.md §4.3).
//!
//! Shares its output queue with a [`crate::fanout::Fanout`] to form a "hub":
//! `Fanin` feeds messages in, `Fanout` broadcasts them back out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::fanout::Unsubscribe;

type Sources<T> = Arc<Mutex<HashMap<Uuid, (mpsc::Receiver<T>, Unsubscribe)>>>;

/// Cancels a single [`Fanin`] source registration: calls the source's
/// unsubscribe and deregisters it.
pub type Cancel = Box<dyn FnOnce() + Send>;

pub struct Fanin<T> {
    sources: Sources<T>,
    cancel_all: Arc<Notify>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl<T> Fanin<T>
where
    T: Send + 'static,
{
    /// Spawns the forwarding task feeding into `output`.
    pub fn new(output: mpsc::Sender<T>) -> Self {
        let sources: Sources<T> = Arc::new(Mutex::new(HashMap::new()));
        let cancel_all = Arc::new(Notify::new());
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let task_sources = sources.clone();
        let task_cancel = cancel_all.clone();
        tokio::spawn(async move {
            loop {
                let ids: Vec<Uuid> = {
                    let guard = task_sources.lock().unwrap();
                    guard.keys().copied().collect()
                };

                let mut forwarded_any = false;
                for id in ids {
                    let message = {
                        let mut guard = task_sources.lock().unwrap();
                        guard
                            .get_mut(&id)
                            .and_then(|(rx, _)| rx.try_recv().ok())
                    };

                    if let Some(message) = message {
                        forwarded_any = true;
                        // Output may legitimately block here: this is the
                        // system's designed backpressure point.
                        if output.send(message).await.is_err() {
                            return;
                        }
                    }
                }

                if !forwarded_any {
                    tokio::select! {
                        _ = task_cancel.notified() => return,
                        _ = tokio::task::yield_now() => {}
                    }
                }
            }
        });

        Fanin { sources, cancel_all, closed }
    }

    /// Registers `source` (and its `unsubscribe`). Cancelling the returned
    /// [`Cancel`] calls `unsubscribe` and deregisters the source.
    pub fn consume(&self, source: mpsc::Receiver<T>, unsubscribe: Unsubscribe) -> Cancel {
        let id = Uuid::new_v4();
        self.sources.lock().unwrap().insert(id, (source, unsubscribe));

        let sources = self.sources.clone();
        Box::new(move || {
            let entry = sources.lock().unwrap().remove(&id);
            if let Some((_, unsubscribe)) = entry {
                unsubscribe();
            }
        })
    }

    /// Halts the forwarding task and invokes every registered unsubscribe.
    /// Idempotent.
    pub fn close(&self) {
        if self
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        self.cancel_all.notify_one();
        let mut guard = self.sources.lock().unwrap();
        for (_, (_, unsubscribe)) in guard.drain() {
            unsubscribe();
        }
    }
}

impl<T> Drop for Fanin<T> {
    fn drop(&mut self) {
        self.close();
    }
}
