use std::{future::pending, pin::Pin, time::Duration};

use tokio::time::{sleep_until, Instant, Sleep};

/// A single re-targetable timer meant to be polled from a `select!` loop.
///
/// Arming an already armed timer moves its deadline, so at most one
/// deadline is ever pending. While disarmed, [`Deadline::fired`] never
/// resolves, which lets an owner keep the branch in its `select!`
/// unconditionally.
pub struct Deadline {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

impl Deadline {
    pub fn new() -> Self {
        Self {
            sleep: Box::pin(sleep_until(Instant::now())),
            armed: false,
        }
    }

    pub fn arm_at(&mut self, deadline: Instant) {
        self.sleep.as_mut().reset(deadline);
        self.armed = true;
    }

    pub fn arm_after(&mut self, delay: Duration) {
        self.arm_at(Instant::now() + delay);
    }

    /// Arms only if nothing is pending. Returns whether the timer was armed
    /// by this call.
    pub fn arm_if_idle(&mut self, delay: Duration) -> bool {
        if self.armed {
            return false;
        }
        self.arm_after(delay);
        true
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.then(|| self.sleep.deadline())
    }

    /// Resolves once the armed deadline passes and disarms the timer.
    /// Dropping the returned future before completion leaves the timer armed.
    pub async fn fired(&mut self) {
        if !self.armed {
            return pending().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Duration, Instant};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let start = Instant::now();
        let mut deadline = Deadline::new();
        deadline.arm_after(Duration::from_millis(100));
        assert!(deadline.is_armed());

        deadline.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!deadline.is_armed());
        assert_eq!(deadline.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut deadline = Deadline::new();
        let result = timeout(Duration::from_secs(60), deadline.fired()).await;
        assert!(result.is_err());

        deadline.arm_after(Duration::from_millis(10));
        deadline.disarm();
        let result = timeout(Duration::from_secs(60), deadline.fired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let start = Instant::now();
        let mut deadline = Deadline::new();
        deadline.arm_after(Duration::from_millis(300));
        deadline.arm_after(Duration::from_millis(100));

        deadline.fired().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_if_idle_keeps_first_deadline() {
        let mut deadline = Deadline::new();
        assert!(deadline.arm_if_idle(Duration::from_secs(60)));
        let first = deadline.deadline();
        assert!(!deadline.arm_if_idle(Duration::from_secs(5)));
        assert_eq!(deadline.deadline(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_timer_armed() {
        let mut deadline = Deadline::new();
        deadline.arm_after(Duration::from_secs(10));
        let result = timeout(Duration::from_secs(1), deadline.fired()).await;
        assert!(result.is_err());
        assert!(deadline.is_armed());
        deadline.fired().await;
        assert!(!deadline.is_armed());
    }
}
