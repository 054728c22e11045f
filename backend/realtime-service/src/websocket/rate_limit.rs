use std::time::{Duration, Instant};

/// Fixed-window frame counter, one per connection.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    window: Duration,
    max: u32,
    window_start: Instant,
    count: u32,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Count one frame. Returns false when the window budget is exhausted.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_in_window() {
        let mut limiter = FixedWindowLimiter::new(Duration::from_secs(10), 3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn window_rollover_resets_budget() {
        let mut limiter = FixedWindowLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check());
        assert!(!limiter.check());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check());
    }
}
