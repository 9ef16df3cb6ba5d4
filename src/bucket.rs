//! Token bucket used to pace outbound gateway commands.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

#[derive(Debug)]
struct Queued<T> {
    item: T,
    high_priority: bool,
}

/// Leaky token bucket.
///
/// Items are admitted while more than `reserved_tokens` tokens remain, high priority items
/// may also spend the reserved tokens. Everything else waits in a FIFO (high priority items
/// ahead of normal ones) until the window elapses and the bucket refills to capacity.
///
/// The bucket does not own a timer: the caller asks [`Bucket::refill_at`] when to call
/// [`Bucket::drain`] again.
#[derive(Debug)]
pub struct Bucket<T> {
    capacity: u32,
    reserved_tokens: u32,
    interval: Duration,
    remaining: u32,
    window_start: Option<Instant>,
    queue: VecDeque<Queued<T>>,
    refill_at: Option<Instant>,
}

impl<T> Bucket<T> {
    /// Create a bucket holding `capacity` tokens which refills every `interval`.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self::with_reserved(capacity, interval, 0)
    }

    /// Create a bucket whose last `reserved_tokens` tokens are kept for high priority items.
    pub fn with_reserved(capacity: u32, interval: Duration, reserved_tokens: u32) -> Self {
        Self {
            capacity,
            reserved_tokens,
            interval,
            remaining: capacity,
            window_start: None,
            queue: VecDeque::new(),
            refill_at: None,
        }
    }

    /// Tokens left in the current window.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Number of items waiting for a refill.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// When the caller should call [`Bucket::drain`], `None` if nothing is waiting.
    pub fn refill_at(&self) -> Option<Instant> {
        self.refill_at
    }

    /// Submit an item, returning every item that may be executed right now.
    ///
    /// The returned items keep submission order.
    pub fn queue(&mut self, item: T, high_priority: bool, now: Instant) -> Vec<T> {
        self.refill_if_elapsed(now);

        if self.queue.is_empty() && self.admits(high_priority) {
            self.take_token(now);
            return vec![item];
        }

        if high_priority {
            let position = self
                .queue
                .iter()
                .position(|queued| !queued.high_priority)
                .unwrap_or(self.queue.len());
            self.queue.insert(
                position,
                Queued {
                    item,
                    high_priority,
                },
            );
        } else {
            self.queue.push_back(Queued {
                item,
                high_priority,
            });
        }

        log::trace!(
            "Bucket exhausted ({} remaining, {} reserved), {} item(s) queued",
            self.remaining,
            self.reserved_tokens,
            self.queue.len()
        );

        let admitted = self.release(now);
        self.arm(now);
        admitted
    }

    /// Refill the bucket if its window has elapsed and release queued items.
    pub fn drain(&mut self, now: Instant) -> Vec<T> {
        self.refill_if_elapsed(now);
        let admitted = self.release(now);
        self.arm(now);
        admitted
    }

    /// Drop every queued item and restore all tokens.
    pub fn reset(&mut self) {
        self.remaining = self.capacity;
        self.window_start = None;
        self.queue.clear();
        self.refill_at = None;
    }

    fn admits(&self, high_priority: bool) -> bool {
        self.remaining > self.reserved_tokens || (high_priority && self.remaining > 0)
    }

    fn take_token(&mut self, now: Instant) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.remaining -= 1;
    }

    fn refill_if_elapsed(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) >= self.interval {
                self.remaining = self.capacity;
                self.window_start = None;
            }
        }
    }

    fn release(&mut self, now: Instant) -> Vec<T> {
        let mut admitted = Vec::new();
        while self
            .queue
            .front()
            .map_or(false, |front| self.admits(front.high_priority))
        {
            if let Some(queued) = self.queue.pop_front() {
                self.take_token(now);
                admitted.push(queued.item);
            }
        }
        admitted
    }

    fn arm(&mut self, now: Instant) {
        self.refill_at = if self.queue.is_empty() {
            None
        } else {
            let start = *self.window_start.get_or_insert(now);
            Some(start + self.interval)
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bucket_defers_beyond_capacity() {
        let now = Instant::now();
        let mut bucket = Bucket::new(3, Duration::from_secs(10));

        let mut admitted = Vec::new();
        for i in 0..4 {
            admitted.extend(bucket.queue(i, false, now));
        }

        assert_eq!(admitted, vec![0, 1, 2]);
        assert_eq!(bucket.queued(), 1);
        assert_eq!(bucket.refill_at(), Some(now + Duration::from_secs(10)));

        assert!(bucket.drain(now + Duration::from_secs(5)).is_empty());
        assert_eq!(bucket.drain(now + Duration::from_secs(10)), vec![3]);
        assert_eq!(bucket.queued(), 0);
        assert_eq!(bucket.refill_at(), None);
        assert_eq!(bucket.remaining(), 2);
    }

    #[test]
    fn test_bucket_reserved_tokens_only_for_high_priority() {
        let now = Instant::now();
        let mut bucket = Bucket::with_reserved(3, Duration::from_secs(60), 1);

        assert_eq!(bucket.queue("a", false, now), vec!["a"]);
        assert_eq!(bucket.queue("b", false, now), vec!["b"]);
        assert!(bucket.queue("c", false, now).is_empty());
        assert_eq!(bucket.remaining(), 1);

        // the queued normal item does not block a high priority one forever, but keeps order
        let admitted = bucket.queue("heartbeat", true, now);
        assert_eq!(admitted, vec!["heartbeat"]);
        assert_eq!(bucket.remaining(), 0);
        assert_eq!(bucket.queued(), 1);
    }

    #[test]
    fn test_bucket_high_priority_jumps_queue() {
        let now = Instant::now();
        let mut bucket = Bucket::new(1, Duration::from_secs(1));

        assert_eq!(bucket.queue(1, false, now), vec![1]);
        assert!(bucket.queue(2, false, now).is_empty());
        assert!(bucket.queue(3, false, now).is_empty());
        assert!(bucket.queue(4, true, now).is_empty());
        assert!(bucket.queue(5, true, now).is_empty());

        let later = now + Duration::from_secs(1);
        assert_eq!(bucket.drain(later), vec![4]);
        let later = later + Duration::from_secs(1);
        assert_eq!(bucket.drain(later), vec![5]);
        let later = later + Duration::from_secs(1);
        assert_eq!(bucket.drain(later), vec![2]);
    }

    #[test]
    fn test_bucket_reset_drops_queue() {
        let now = Instant::now();
        let mut bucket = Bucket::new(1, Duration::from_secs(1));
        bucket.queue((), false, now);
        bucket.queue((), false, now);
        bucket.reset();
        assert_eq!(bucket.remaining(), 1);
        assert_eq!(bucket.queued(), 0);
        assert_eq!(bucket.refill_at(), None);
    }
}
