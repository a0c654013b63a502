use std::time::Duration;
use tokio::time::Instant;

/// How long a keystroke suppresses further typing signals.
pub const TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Rate limiter for outbound typing signals.
///
/// Every keystroke re-arms the suppression window; a signal goes out only
/// when no window is active.
#[derive(Debug)]
pub struct TypingThrottle {
    window: Duration,
    quiet_until: Option<Instant>,
}

impl Default for TypingThrottle {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

impl TypingThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            quiet_until: None,
        }
    }

    /// Record a keystroke at `now`; returns whether a typing signal should be sent.
    pub fn keystroke(&mut self, now: Instant) -> bool {
        let send = self.quiet_until.is_none_or(|until| now >= until);
        self.quiet_until = Some(now + self.window);
        send
    }
}
