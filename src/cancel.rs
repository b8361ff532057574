//! Operator-initiated stop signal.
//!
//! A `CancelToken` is shared between the Ctrl-C handler and the sync loop.
//! All blocking waits go through [`CancelToken::sleep`], which sleeps in
//! short slices so a stop takes effect within one slice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Upper bound on one uninterrupted sleep slice.
const SLICE: Duration = Duration::from_millis(100);

/// Cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once a stop was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Block for `duration`, returning early with `Error::Cancelled` if a
    /// stop is requested meanwhile.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }

    /// Install a Ctrl-C handler that cancels this token.
    pub fn install_ctrlc_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("stop requested, finishing current item");
            token.cancel();
        })
        .map_err(|e| Error::InvalidInput(format!("Failed to install Ctrl-C handler: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(matches!(token.sleep(Duration::from_secs(30)), Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_cancelled_from_other_thread() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let start = Instant::now();
        let result = token.sleep(Duration::from_secs(30));
        handle.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_zero_sleep_completes() {
        assert!(CancelToken::new().sleep(Duration::ZERO).is_ok());
    }
}
