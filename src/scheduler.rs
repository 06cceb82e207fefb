use std::time::{Duration, Instant};

/// A fixed-period timer driven by the caller's clock.
///
/// Ticks never queue up: if the caller falls behind, the next tick is due one
/// period after the late one, not immediately again.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next: Option<Instant>,
}

impl Cadence {
    /// A cadence that is due right away.
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn due(&self, now: Instant) -> bool {
        self.next.is_none_or(|next| now >= next)
    }

    /// When the next tick is due, `None` if it is due now.
    pub fn next_due(&self) -> Option<Instant> {
        self.next
    }

    /// Record a tick that happened at `now`.
    pub fn mark(&mut self, now: Instant) {
        let scheduled = self.next.map_or(now, |prev| prev + self.period);
        self.next = Some(if scheduled > now {
            scheduled
        } else {
            now + self.period
        });
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
