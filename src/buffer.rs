//! A bounded buffer that never blocks the producer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

type Alert = Box<dyn Fn(u64) + Send + Sync>;

/// Holds up to `capacity` items. When full, `set` discards the oldest item
/// and reports the drop through the alert callback.
pub struct LossyBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    alert: Alert,
}

impl<T> LossyBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_alert(capacity, |_| {})
    }

    pub fn with_alert(capacity: usize, alert: impl Fn(u64) + Send + Sync + 'static) -> Self {
        let capacity = capacity.max(1);

        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            alert: Box::new(alert),
        }
    }

    pub fn set(&self, item: T) {
        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            dropped
        };

        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            (self.alert)(1);
        }

        self.notify.notify_one();
    }

    pub fn try_next(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Waits for the next item.
    pub async fn next(&self) -> T {
        loop {
            let notified = self.notify.notified();

            if let Some(item) = self.try_next() {
                return item;
            }

            notified.await;
        }
    }

    /// Total number of items discarded since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of items waiting to be taken.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}
