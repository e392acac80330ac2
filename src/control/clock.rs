use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of delays between ticks.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Real wall-clock sleep.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested delays without blocking. Clones share the record.
#[derive(Clone, Debug, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `token` once `sleeps` delays have been requested.
    pub fn cancel_after(mut self, sleeps: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((sleeps, token));
        self
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .map(|slept| slept.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        let count = match self.slept.lock() {
            Ok(mut slept) => {
                slept.push(duration);
                slept.len()
            }
            Err(_) => return,
        };
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }
    }
}

/// Cooperative stop flag shared between the loop and a signal handler.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let handler_side = token.clone();
        assert!(!token.is_cancelled());
        handler_side.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn recording_sleeper_fires_cancel() {
        let token = CancelToken::new();
        let mut sleeper = RecordingSleeper::new().cancel_after(2, token.clone());
        sleeper.sleep(Duration::from_millis(5));
        assert!(!token.is_cancelled());
        sleeper.sleep(Duration::from_millis(5));
        assert!(token.is_cancelled());
        assert_eq!(sleeper.slept().len(), 2);
    }
}
