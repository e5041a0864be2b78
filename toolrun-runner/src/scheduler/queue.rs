//! Priority queue
//!
//! Three FIFO lanes drained in strict priority order. A steady stream of
//! HIGH or NORMAL work starves the LOW lane; there is no aging.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use toolrun_core::domain::job::JobPriority;
use uuid::Uuid;

/// Longest sleep between two scans of an empty queue
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<Uuid>,
    normal: VecDeque<Uuid>,
    low: VecDeque<Uuid>,
    len: usize,
}

impl Lanes {
    fn lane_mut(&mut self, priority: JobPriority) -> &mut VecDeque<Uuid> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Normal => &mut self.normal,
            JobPriority::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<Uuid> {
        let id = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())?;
        self.len -= 1;
        Some(id)
    }
}

/// Job ids waiting for a worker
#[derive(Debug, Default)]
pub struct PriorityQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job id to its lane
    pub fn put(&self, id: Uuid, priority: JobPriority) {
        {
            let mut lanes = self.lanes.lock().unwrap();
            lanes.lane_mut(priority).push_back(id);
            lanes.len += 1;
        }
        self.notify.notify_one();
    }

    /// Removes the next job id without waiting
    pub fn try_get(&self) -> Option<Uuid> {
        self.lanes.lock().unwrap().pop()
    }

    /// Waits up to `timeout` for a job id
    ///
    /// Every wake-up rescans all lanes from HIGH down, so an id put into a
    /// higher lane while waiting is served first.
    pub async fn get(&self, timeout: Duration) -> Option<Uuid> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.try_get() {
                return Some(id);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let nap = (deadline - now).min(IDLE_POLL);
            let _ = tokio::time::timeout(nap, notified).await;
        }
    }

    /// Number of queued ids across all lanes
    pub fn qsize(&self) -> usize {
        self.lanes.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.qsize() == 0
    }
}
