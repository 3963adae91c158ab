//! The started barrier.
//!
//! One barrier exists per group start cycle: a countdown released once per
//! service, plus a per-service first-fire guard so repeated Started
//! notifications never count twice. An error fails the barrier and wakes
//! the waiter immediately.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

pub struct StartBarrier {
    remaining: AtomicUsize,
    /// Services that have already counted down this cycle.
    fired: Mutex<HashSet<String>>,
    /// Name of the service whose error halted the cycle, if any.
    failed: Mutex<Option<String>>,
    notify: Notify,
}

impl StartBarrier {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            fired: Mutex::new(HashSet::new()),
            failed: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Count down for `service`, at most once per cycle. Returns whether
    /// this call actually counted.
    pub fn count_down(&self, service: &str) -> bool {
        {
            let mut fired = self.fired.lock();
            if !fired.insert(service.to_string()) {
                return false;
            }
        }
        let before = self.remaining.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(before > 0, "barrier counted below zero");
        self.notify.notify_waiters();
        true
    }

    /// Fail the cycle on behalf of `service`.
    pub fn fail(&self, service: &str) {
        *self.failed.lock() = Some(service.to_string());
        self.notify.notify_waiters();
    }

    pub fn is_released(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }

    /// Wait until every slot has counted down, or the cycle failed.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.notify.notified();
            if let Some(service) = self.failed.lock().clone() {
                return Err(Error::ServiceReportedError(service));
            }
            if self.is_released() {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn releases_after_each_service_counts() {
        let barrier = Arc::new(StartBarrier::new(2));
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        assert!(barrier.count_down("a"));
        assert!(!barrier.is_released());
        assert!(barrier.count_down("b"));
        assert!(barrier.is_released());

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("barrier never released")
            .expect("waiter panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn counts_each_service_only_once() {
        let barrier = StartBarrier::new(2);
        assert!(barrier.count_down("a"));
        assert!(!barrier.count_down("a"));
        assert!(!barrier.count_down("a"));
        assert!(!barrier.is_released());
    }

    #[tokio::test]
    async fn failure_wakes_the_waiter_with_the_culprit() {
        let barrier = Arc::new(StartBarrier::new(2));
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        barrier.fail("db");
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("barrier never failed")
            .expect("waiter panicked");
        match result {
            Err(Error::ServiceReportedError(name)) => assert_eq!(name, "db"),
            other => panic!("expected ServiceReportedError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_count_barrier_is_released_immediately() {
        let barrier = StartBarrier::new(0);
        assert!(barrier.is_released());
        assert!(barrier.wait().await.is_ok());
    }
}
