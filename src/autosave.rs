use std::time::{Duration, Instant};

/// Quiet period after the last mutation before a commit fires.
pub const AUTOSAVE_DELAY: Duration = Duration::from_secs(3);

/// Debounced commit trigger. Purely clock-driven: the owner passes `now` in,
/// so the cooperative loop and the tests share one code path.
#[derive(Debug, Clone)]
pub struct AutosaveScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Default for AutosaveScheduler {
    fn default() -> Self {
        AutosaveScheduler::new(AUTOSAVE_DELAY)
    }
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        AutosaveScheduler {
            delay,
            deadline: None,
        }
    }

    /// (Re)start the debounce window. A burst of mutations keeps pushing the
    /// deadline out, so only the final state of the burst is committed.
    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Drop any pending deadline without firing.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn due(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Consume the deadline if it has elapsed. At most one fire per window.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_after_quiet_period() {
        let t0 = Instant::now();
        let mut s = AutosaveScheduler::new(Duration::from_secs(3));
        s.touch(t0);

        assert!(!s.fire(t0 + Duration::from_secs(1)));
        assert!(s.is_armed());
        assert!(s.fire(t0 + Duration::from_secs(3)));
        // Consumed; does not fire twice for one window.
        assert!(!s.fire(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn new_mutation_restarts_the_window() {
        let t0 = Instant::now();
        let mut s = AutosaveScheduler::new(Duration::from_secs(3));
        s.touch(t0);
        s.touch(t0 + Duration::from_secs(2));

        assert!(!s.fire(t0 + Duration::from_secs(4)));
        assert!(s.fire(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn disarm_cancels_pending_fire() {
        let t0 = Instant::now();
        let mut s = AutosaveScheduler::new(Duration::from_secs(3));
        s.touch(t0);
        s.disarm();
        assert!(!s.fire(t0 + Duration::from_secs(30)));
    }
}
