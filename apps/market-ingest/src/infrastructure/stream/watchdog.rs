//! Connection liveness tracking.
//!
//! Two independent timers end a session: no data frame within the
//! inactivity timeout, or no pong within the pong timeout of a ping. Both
//! are reported as an [`Expiry`] and treated like a server close.

use std::time::Duration;

use tokio::time::Instant;

/// Why the watchdog ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No data frame within the inactivity timeout.
    Inactivity(Duration),
    /// No pong within the pong timeout.
    Pong(Duration),
}

/// Per-session liveness state.
#[derive(Debug)]
pub struct ActivityWatchdog {
    inactivity_timeout: Option<Duration>,
    pong_timeout: Duration,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl ActivityWatchdog {
    /// Start watching. A zero inactivity timeout disables that check.
    #[must_use]
    pub fn new(inactivity_timeout: Duration, pong_timeout: Duration) -> Self {
        Self {
            inactivity_timeout: (!inactivity_timeout.is_zero()).then_some(inactivity_timeout),
            pong_timeout,
            last_activity: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// A data frame arrived.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// A ping went out. An earlier unanswered ping keeps its deadline.
    pub fn mark_ping_sent(&mut self) {
        self.ping_sent_at.get_or_insert_with(Instant::now);
    }

    /// A pong arrived.
    pub fn record_pong(&mut self) {
        self.ping_sent_at = None;
    }

    /// Whether a ping is unanswered.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Earliest instant at which a check can fail, if any check is armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let inactivity = self.inactivity_timeout.map(|t| self.last_activity + t);
        let pong = self.ping_sent_at.map(|sent| sent + self.pong_timeout);
        match (inactivity, pong) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// The check that has failed at `now`, if any.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Option<Expiry> {
        if let Some(timeout) = self.inactivity_timeout
            && now.saturating_duration_since(self.last_activity) >= timeout
        {
            return Some(Expiry::Inactivity(timeout));
        }
        if let Some(sent) = self.ping_sent_at
            && now.saturating_duration_since(sent) >= self.pong_timeout
        {
            return Some(Expiry::Pong(self.pong_timeout));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn inactivity_expires_without_frames() {
        let mut watchdog = ActivityWatchdog::new(Duration::from_secs(15), Duration::from_secs(20));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(watchdog.expired(Instant::now()), None);

        watchdog.record_activity();
        tokio::time::advance(Duration::from_secs(14)).await;
        assert_eq!(watchdog.expired(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            watchdog.expired(Instant::now()),
            Some(Expiry::Inactivity(Duration::from_secs(15)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_expires() {
        let mut watchdog = ActivityWatchdog::new(Duration::ZERO, Duration::from_secs(5));
        assert_eq!(watchdog.deadline(), None);

        watchdog.mark_ping_sent();
        let deadline = watchdog.deadline().unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        watchdog.mark_ping_sent();
        assert_eq!(watchdog.deadline(), Some(deadline));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            watchdog.expired(Instant::now()),
            Some(Expiry::Pong(Duration::from_secs(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pong_disarms_timer() {
        let mut watchdog = ActivityWatchdog::new(Duration::ZERO, Duration::from_secs(5));
        watchdog.mark_ping_sent();
        assert!(watchdog.is_waiting_for_pong());
        watchdog.record_pong();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(watchdog.expired(Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_earliest_timer() {
        let mut watchdog = ActivityWatchdog::new(Duration::from_secs(15), Duration::from_secs(5));
        let start = Instant::now();
        assert_eq!(watchdog.deadline(), Some(start + Duration::from_secs(15)));
        watchdog.mark_ping_sent();
        assert_eq!(watchdog.deadline(), Some(start + Duration::from_secs(5)));
    }
}
