//! Cooperative cancellation.
//!
//! A [`CancelToken`] is checked after each completed optimizer iteration
//! and between grid points of a scan, never in the middle of an objective
//! evaluation, so the parameters always hold a consistent state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use argmin::core::observers::Observe;
use argmin::core::{Error as ArgminError, KV, State};
use gf_core::Error;

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Best point seen by the optimizer.
pub(crate) type BestPoint = Arc<Mutex<Option<(Vec<f64>, f64, u64)>>>;

/// argmin observer that records the best point after every iteration and
/// aborts the run once the token is set.
pub(crate) struct CancelObserver {
    pub(crate) token: CancelToken,
    pub(crate) best: BestPoint,
}

impl<I> Observe<I> for CancelObserver
where
    I: State<Param = Vec<f64>, Float = f64>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), ArgminError> {
        if let Some(p) = state.get_best_param() {
            *self.best.lock().expect("best point mutex poisoned") =
                Some((p.clone(), state.get_best_cost(), state.get_iter()));
        }
        if self.token.is_cancelled() {
            return Err(ArgminError::msg(Error::Cancelled.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
        b.reset();
        assert!(!a.is_cancelled());
    }
}
