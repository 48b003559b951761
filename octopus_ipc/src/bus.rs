//! In-process publish/subscribe message bus.
//!
//! Grounded on `octopus_message_bus.{hpp,cpp}`: a group-keyed map of
//! token → subscriber, an internal FIFO drained by dispatcher thread(s),
//! each dispatch resubmitted to the [`ThreadPool`] so a slow or
//! misbehaving subscriber cannot stall the dispatcher. Subscriber failure
//! is the "callback raised" case; Rust has no exceptions, so a subscriber
//! closure unwinding is caught with `catch_unwind` and treated the same
//! way the original code treats a caught exception from a `std::function`
//! callback.

use octopus_common::consts::CALLBACK_FAILURE_THRESHOLD;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::threadpool::ThreadPool;

/// A message published on the bus: a group and an opaque payload, mirroring
/// the framed [`crate::message::IpcMessage`] shape without requiring callers
/// to go through the wire codec for purely in-process delivery.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub group: u8,
    pub msg_id: u8,
    pub data: Vec<u8>,
}

/// Handle returned by [`MessageBus::subscribe`]; pass back to
/// [`MessageBus::unsubscribe`] to remove the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Subscriber = Box<dyn Fn(&BusMessage) + Send + Sync + 'static>;

struct Subscription {
    callback: Arc<Subscriber>,
    failures: u32,
}

struct Inner {
    queue: VecDeque<BusMessage>,
    subscribers: HashMap<u8, HashMap<u64, Subscription>>,
}

struct Shared {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    running: AtomicBool,
    next_token: AtomicU64,
    max_queue_size: usize,
}

/// Group-keyed publish/subscribe bus. `publish` never blocks beyond a
/// bounded queue enqueue (spec.md §4.12); delivery fans out through the
/// shared [`ThreadPool`].
pub struct MessageBus {
    shared: Arc<Shared>,
    pool: Arc<ThreadPool>,
    dispatchers: Vec<JoinHandle<()>>,
}

impl MessageBus {
    /// Spawn `dispatcher_count` dispatcher threads draining a queue bounded
    /// to `max_queue_size`, delivering through `pool`.
    pub fn new(dispatcher_count: usize, max_queue_size: usize, pool: Arc<ThreadPool>) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                subscribers: HashMap::new(),
            }),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            next_token: AtomicU64::new(1),
            max_queue_size,
        });

        let dispatchers = (0..dispatcher_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                let pool = Arc::clone(&pool);
                thread::spawn(move || dispatch_loop(shared, pool))
            })
            .collect();

        Self {
            shared,
            pool,
            dispatchers,
        }
    }

    /// Register `callback` for every message published to `group`.
    pub fn subscribe<F>(&self, group: u8, callback: F) -> SubscriptionToken
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let id = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.shared.inner.lock();
        inner.subscribers.entry(group).or_default().insert(
            id,
            Subscription {
                callback: Arc::new(Box::new(callback)),
                failures: 0,
            },
        );
        SubscriptionToken(id)
    }

    /// Remove a subscription previously returned by [`Self::subscribe`].
    pub fn unsubscribe(&self, group: u8, token: SubscriptionToken) {
        let mut inner = self.shared.inner.lock();
        if let Some(subs) = inner.subscribers.get_mut(&group) {
            subs.remove(&token.0);
        }
    }

    /// Enqueue a message for dispatch. Drops the oldest queued message and
    /// logs a warning if the queue is already at `max_queue_size` — the bus
    /// itself never blocks a producer (spec.md §4.12).
    pub fn publish(&self, message: BusMessage) {
        let mut inner = self.shared.inner.lock();
        if inner.queue.len() >= self.shared.max_queue_size {
            warn!("message bus queue full, dropping oldest message");
            inner.queue.pop_front();
        }
        inner.queue.push_back(message);
        drop(inner);
        self.shared.not_empty.notify_one();
    }

    /// Number of subscribers currently registered for `group`.
    pub fn subscriber_count(&self, group: u8) -> usize {
        self.shared
            .inner
            .lock()
            .subscribers
            .get(&group)
            .map_or(0, HashMap::len)
    }

    /// The thread pool this bus dispatches callbacks on.
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

fn dispatch_loop(shared: Arc<Shared>, pool: Arc<ThreadPool>) {
    loop {
        let message = {
            let mut inner = shared.inner.lock();
            loop {
                if let Some(message) = inner.queue.pop_front() {
                    break Some(message);
                }
                if !shared.running.load(Ordering::Acquire) {
                    break None;
                }
                shared.not_empty.wait(&mut inner);
            }
        };

        let message = match message {
            Some(message) => message,
            None => return,
        };

        let group = message.group;
        let targets: Vec<(u64, Arc<Subscriber>)> = {
            let inner = shared.inner.lock();
            inner
                .subscribers
                .get(&group)
                .map(|subs| {
                    subs.iter()
                        .map(|(id, sub)| (*id, Arc::clone(&sub.callback)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let message = Arc::new(message);
        for (id, callback) in targets {
            let shared = Arc::clone(&shared);
            let message = Arc::clone(&message);
            pool.submit(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&message)));
                if outcome.is_err() {
                    record_failure(&shared, group, id);
                }
            });
        }
    }
}

fn record_failure(shared: &Arc<Shared>, group: u8, id: u64) {
    let mut inner = shared.inner.lock();
    let Some(subs) = inner.subscribers.get_mut(&group) else {
        return;
    };
    let Some(sub) = subs.get_mut(&id) else {
        return;
    };
    sub.failures += 1;
    warn!(group, token = id, failures = sub.failures, "bus subscriber callback panicked");
    if sub.failures >= CALLBACK_FAILURE_THRESHOLD {
        subs.remove(&id);
        debug!(group, token = id, "bus subscriber evicted after repeated failures");
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.not_empty.notify_all();
        for dispatcher in self.dispatchers.drain(..) {
            let _ = dispatcher.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threadpool::OverflowStrategy;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_bus() -> MessageBus {
        let pool = Arc::new(ThreadPool::new(4, 64, OverflowStrategy::DropNewest));
        MessageBus::new(1, 64, pool)
    }

    #[test]
    fn delivers_to_subscribers_of_the_published_group() {
        let bus = test_bus();
        let (tx, rx) = mpsc::channel();
        bus.subscribe(11, move |msg: &BusMessage| {
            tx.send((msg.group, msg.msg_id)).unwrap();
        });

        bus.publish(BusMessage {
            group: 11,
            msg_id: 101,
            data: vec![],
        });

        let (group, msg_id) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((group, msg_id), (11, 101));
    }

    #[test]
    fn does_not_deliver_to_other_groups() {
        let bus = test_bus();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.subscribe(1, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(BusMessage {
            group: 11,
            msg_id: 100,
            data: vec![],
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = test_bus();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let token = bus.subscribe(1, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(1, token);

        bus.publish(BusMessage {
            group: 1,
            msg_id: 0,
            data: vec![],
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_is_evicted_after_threshold_failures_s3() {
        let bus = test_bus();
        let calls_1 = Arc::new(AtomicUsize::new(0));
        let calls_2 = Arc::new(AtomicUsize::new(0));
        let calls_3 = Arc::new(AtomicUsize::new(0));

        {
            let c = Arc::clone(&calls_1);
            bus.subscribe(1, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let c = Arc::clone(&calls_2);
            bus.subscribe(1, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                panic!("boom");
            });
        }
        {
            let c = Arc::clone(&calls_3);
            bus.subscribe(1, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..3 {
            bus.publish(BusMessage {
                group: 1,
                msg_id: 0,
                data: vec![],
            });
            thread::sleep(Duration::from_millis(30));
        }
        assert_eq!(bus.subscriber_count(1), 2);

        bus.publish(BusMessage {
            group: 1,
            msg_id: 0,
            data: vec![],
        });
        thread::sleep(Duration::from_millis(30));

        assert_eq!(calls_1.load(Ordering::SeqCst), 4);
        assert_eq!(calls_2.load(Ordering::SeqCst), 3);
        assert_eq!(calls_3.load(Ordering::SeqCst), 4);
    }
}
