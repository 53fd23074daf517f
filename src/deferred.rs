/// Deferred-image queue for motion-difference mode.
///
/// A camera's first capture waits here until a second capture taken
/// `minus_minutes` later can be subtracted from it. Admission is coupled to
/// measured processing throughput: once the queue holds enough entries to
/// consume the whole wait window at the current per-camera rate, it stops
/// accepting new cameras and starts draining.
use std::collections::VecDeque;
use std::path::PathBuf;

/// A camera's first capture, held pending its paired second capture.
/// Invariant: at most one entry per camera in the queue at any time.
#[derive(Debug)]
pub struct DeferredEntry {
    pub camera_id: String,
    /// Capture time, epoch seconds. Refreshed when the entry is requeued so
    /// it doesn't keep priority over fresher entries.
    pub timestamp: i64,
    pub path: PathBuf,
    pub md5: String,
    /// Wait accumulated across requeues of this entry.
    pub old_wait_secs: i64,
}

#[derive(Debug)]
pub struct DeferredQueue {
    entries: VecDeque<DeferredEntry>,
    minus_secs: i64,
}

impl DeferredQueue {
    pub fn new(minus_minutes: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            minus_secs: 60 * i64::from(minus_minutes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.entries.iter().any(|e| e.camera_id == camera_id)
    }

    /// Queue already holds enough entries to consume the full wait window at
    /// the current processing rate.
    pub fn is_full(&self, time_per_sample: f64) -> bool {
        self.expected_drain_secs(time_per_sample) >= self.minus_secs as f64
    }

    fn expected_drain_secs(&self, time_per_sample: f64) -> f64 {
        self.entries.len() as f64 * time_per_sample
    }

    /// Enforces the one-entry-per-camera invariant: an entry whose camera is
    /// already queued is rejected and handed back so the caller can clean up
    /// its frame file.
    pub fn push(&mut self, entry: DeferredEntry) -> Option<DeferredEntry> {
        if self.contains(&entry.camera_id) {
            return Some(entry);
        }
        self.entries.push_back(entry);
        None
    }

    /// Head entry, if the queue is full or the head has aged past the wait
    /// window. Otherwise the queue is left untouched.
    pub fn pop_ready(&mut self, now: i64, time_per_sample: f64) -> Option<DeferredEntry> {
        let head = self.entries.front()?;
        if self.is_full(time_per_sample) || head.timestamp + self.minus_secs < now {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Re-append an unchanged entry with its wait timer extended and its
    /// timestamp refreshed to `now`. Rejected like `push` if the camera
    /// re-entered the queue while the entry was popped.
    pub fn requeue(
        &mut self,
        mut entry: DeferredEntry,
        now: i64,
        elapsed_secs: i64,
    ) -> Option<DeferredEntry> {
        entry.timestamp = now;
        entry.old_wait_secs += elapsed_secs;
        self.push(entry)
    }

    /// Some cameras refresh slowly, so an unchanged entry gets more chances
    /// up to 2x the configured gap, capped at 5 minutes.
    pub fn retry_budget_secs(&self) -> i64 {
        (2 * self.minus_secs).min(5 * 60)
    }

    /// True when the entry has exhausted its bounded retry window and must
    /// be discarded instead of requeued.
    pub fn past_retry_budget(&self, entry: &DeferredEntry, elapsed_secs: i64) -> bool {
        entry.old_wait_secs + elapsed_secs >= self.retry_budget_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(camera: &str, timestamp: i64) -> DeferredEntry {
        DeferredEntry {
            camera_id: camera.to_string(),
            timestamp,
            path: PathBuf::from(format!("/tmp/{camera}.jpg")),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            old_wait_secs: 0,
        }
    }

    #[test]
    fn is_full_includes_boundary() {
        let mut q = DeferredQueue::new(1); // 60s window
        q.push(entry("a", 0));
        q.push(entry("b", 0));
        // 2 entries * 30s/sample == 60s exactly
        assert!(q.is_full(30.0));
        assert!(!q.is_full(29.9));
    }

    #[test]
    fn pop_ready_on_full_queue() {
        let mut q = DeferredQueue::new(1);
        q.push(entry("a", 100));
        q.push(entry("b", 100));
        // not aged, but full at 30s/sample
        let popped = q.pop_ready(101, 30.0).unwrap();
        assert_eq!(popped.camera_id, "a");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pop_ready_on_aged_head() {
        let mut q = DeferredQueue::new(1);
        q.push(entry("a", 100));
        assert!(q.pop_ready(159, 3.0).is_none());
        assert_eq!(q.len(), 1);
        let popped = q.pop_ready(161, 3.0).unwrap();
        assert_eq!(popped.camera_id, "a");
        assert!(q.is_empty());
    }

    #[test]
    fn requeue_moves_to_tail_and_accumulates_wait() {
        let mut q = DeferredQueue::new(5);
        q.push(entry("a", 100));
        q.push(entry("b", 110));
        let head = q.pop_ready(500, 3.0).unwrap();
        q.requeue(head, 500, 400);
        let tail = q.entries.back().unwrap();
        assert_eq!(tail.camera_id, "a");
        assert_eq!(tail.timestamp, 500);
        assert_eq!(tail.old_wait_secs, 400);
        assert_eq!(q.entries.front().unwrap().camera_id, "b");
    }

    #[test]
    fn retry_budget_caps_at_five_minutes() {
        // 10 minute gap: 2x would be 1200s, the 300s cap binds
        assert_eq!(DeferredQueue::new(10).retry_budget_secs(), 300);
        // 1 minute gap: 2x = 120s binds
        assert_eq!(DeferredQueue::new(1).retry_budget_secs(), 120);
    }

    #[test]
    fn discard_boundary_is_inclusive() {
        let q = DeferredQueue::new(1); // budget 120s
        let mut e = entry("a", 0);
        e.old_wait_secs = 60;
        assert!(!q.past_retry_budget(&e, 59));
        assert!(q.past_retry_budget(&e, 60));
    }

    #[test]
    fn one_entry_per_camera() {
        let mut q = DeferredQueue::new(1);
        q.push(entry("a", 0));
        assert!(q.contains("a"));
        assert!(!q.contains("b"));
    }

    #[test]
    fn duplicate_camera_push_is_rejected() {
        let mut q = DeferredQueue::new(1);
        assert!(q.push(entry("a", 0)).is_none());
        let rejected = q.push(entry("a", 5)).unwrap();
        assert_eq!(rejected.camera_id, "a");
        assert_eq!(q.len(), 1);
        assert_eq!(q.entries.front().unwrap().timestamp, 0);
    }

    #[test]
    fn requeue_rejected_when_camera_reentered_queue() {
        let mut q = DeferredQueue::new(1);
        q.push(entry("a", 0));
        // full at one entry with a 60s/sample estimate, so the head pops
        let popped = q.pop_ready(100, 60.0).unwrap();
        q.push(entry("a", 100));
        let rejected = q.requeue(popped, 100, 10).unwrap();
        assert_eq!(rejected.camera_id, "a");
        assert_eq!(q.len(), 1);
    }
}
