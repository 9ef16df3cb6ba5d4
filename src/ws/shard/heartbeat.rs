use std::time::Duration;

use tokio::time::Instant;

/// Heartbeat bookkeeping plus the handshake deadline of one connection.
///
/// Both timers are plain deadlines: the runner sleeps until [`HeartbeatMonitor::next_deadline`]
/// and the shard asks [`HeartbeatMonitor::beat_due`] / [`HeartbeatMonitor::connect_expired`].
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Option<Duration>,
    next_beat: Option<Instant>,
    connect_deadline: Option<Instant>,
    acked: bool,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    latency: Option<Duration>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self {
            interval: None,
            next_beat: None,
            connect_deadline: None,
            acked: true,
            last_sent: None,
            last_ack: None,
            latency: None,
        }
    }
}

impl HeartbeatMonitor {
    /// (Re)start the repeating heartbeat timer.
    pub fn arm(&mut self, interval: Duration, now: Instant) {
        log::trace!("Heartbeat every {:?}", interval);
        self.interval = Some(interval);
        self.next_beat = Some(now + interval);
    }

    /// Stop the repeating heartbeat timer.
    pub fn disarm(&mut self) {
        self.interval = None;
        self.next_beat = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_beat.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Whether the heartbeat timer fired, re-arming it for the next period.
    pub fn beat_due(&mut self, now: Instant) -> bool {
        match (self.next_beat, self.interval) {
            (Some(at), Some(interval)) if at <= now => {
                let mut next = at + interval;
                // skip periods missed while the task was not polled
                while next <= now {
                    next += interval;
                }
                self.next_beat = Some(next);
                true
            }
            _ => false,
        }
    }

    pub fn start_connect_timeout(&mut self, timeout: Duration, now: Instant) {
        self.connect_deadline = Some(now + timeout);
    }

    pub fn clear_connect_timeout(&mut self) {
        self.connect_deadline = None;
    }

    /// Whether the handshake deadline passed, clearing it.
    pub fn connect_expired(&mut self, now: Instant) -> bool {
        match self.connect_deadline {
            Some(at) if at <= now => {
                self.connect_deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_beat, self.connect_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn acked(&self) -> bool {
        self.acked
    }

    pub fn set_acked(&mut self) {
        self.acked = true;
    }

    /// Record an unsolicited heartbeat, which expects an ack before the next one.
    pub fn expect_ack(&mut self) {
        self.acked = false;
    }

    pub fn on_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn on_ack(&mut self, now: Instant) {
        self.acked = true;
        self.last_ack = Some(now);
        self.latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Forget everything about the last connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_beat_due_rearms() {
        let now = Instant::now();
        let mut monitor = HeartbeatMonitor::default();
        monitor.arm(Duration::from_secs(10), now);

        assert!(!monitor.beat_due(now + Duration::from_secs(9)));
        assert!(monitor.beat_due(now + Duration::from_secs(10)));
        assert_eq!(monitor.next_deadline(), Some(now + Duration::from_secs(20)));
        assert!(!monitor.beat_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_latency_unknown_until_sent() {
        let now = Instant::now();
        let mut monitor = HeartbeatMonitor::default();

        monitor.on_ack(now);
        assert_eq!(monitor.latency(), None);

        monitor.on_sent(now);
        monitor.on_ack(now + Duration::from_millis(40));
        assert_eq!(monitor.latency(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_connect_deadline() {
        let now = Instant::now();
        let mut monitor = HeartbeatMonitor::default();
        monitor.start_connect_timeout(Duration::from_secs(30), now);

        assert_eq!(monitor.next_deadline(), Some(now + Duration::from_secs(30)));
        assert!(!monitor.connect_expired(now));
        assert!(monitor.connect_expired(now + Duration::from_secs(30)));
        assert_eq!(monitor.next_deadline(), None);
    }
}
