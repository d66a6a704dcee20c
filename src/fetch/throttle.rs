use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Start a request now.
    Fire,
    /// A request already started inside the current window; one trailing
    /// attempt is scheduled for the given instant.
    Deferred(Instant),
}

/// Leading + trailing throttle: the first call in a burst fires right away,
/// every later call inside the window collapses into one trailing call.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_fired: Option<Instant>,
    trailing: bool,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
            trailing: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn request(&mut self, now: Instant) -> Decision {
        match self.last_fired {
            Some(last) if now < last + self.window => {
                self.trailing = true;
                Decision::Deferred(last + self.window)
            }
            _ => {
                self.fire(now);
                Decision::Fire
            }
        }
    }

    /// When the pending trailing call is due.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.trailing, self.last_fired) {
            (true, Some(last)) => Some(last + self.window),
            _ => None,
        }
    }

    /// Fires the trailing call once its deadline passed. The trailing call
    /// opens a new window of its own.
    pub fn take_trailing(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.fire(now);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.trailing = false;
    }

    fn fire(&mut self, now: Instant) {
        self.last_fired = Some(now);
        self.trailing = false;
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
