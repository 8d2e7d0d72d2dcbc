//! Bounded admission for directory operations
//!
//! Operations are grouped into named pools. Every caller that uses the same
//! pool key competes for the same slots, so the ceiling holds across
//! unrelated searches. Waiters are admitted first in, first out and a slot
//! is handed to the next waiter as soon as an operation settles.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use adquery_core::{DirectoryError, DirectoryResult};

/// Pool shared by every physical search
pub const SEARCH_POOL: &str = "searches";

/// Pool shared by membership chunk searches
pub const MEMBERSHIP_POOL: &str = "membership";

static GLOBAL: Lazy<Arc<ConcurrencyLimiter>> = Lazy::new(|| Arc::new(ConcurrencyLimiter::new()));

/// What to do when an operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectBehaviour {
    /// Surface the failure immediately
    None,
    /// Resubmit after a transient failure, at most `attempts` more times
    Retry { attempts: u32 },
}

/// Failure handling for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub reject: RejectBehaviour,
    /// Fails an attempt that runs longer than this
    pub timeout: Option<Duration>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl FailurePolicy {
    pub fn none() -> Self {
        Self {
            reject: RejectBehaviour::None,
            timeout: None,
        }
    }

    pub fn retry(attempts: u32) -> Self {
        Self {
            reject: RejectBehaviour::Retry { attempts },
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn should_retry(&self, error: &DirectoryError, retries_done: u32) -> bool {
        match self.reject {
            RejectBehaviour::None => false,
            RejectBehaviour::Retry { attempts } => error.is_transient() && retries_done < attempts,
        }
    }
}

/// A named bound on outstanding operations
struct Pool {
    key: String,
    max: usize,
    semaphore: Arc<Semaphore>,
}

impl Pool {
    async fn acquire(&self) -> DirectoryResult<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DirectoryError::Connection(format!("pool '{}' is closed", self.key)))
    }

    fn running(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }
}

/// Handle to one submitted item; settles exactly once
pub struct OperationHandle<T> {
    rx: oneshot::Receiver<DirectoryResult<T>>,
}

impl<T> OperationHandle<T> {
    /// Waits for the item to settle
    pub async fn settle(self) -> DirectoryResult<T> {
        self.rx.await.unwrap_or_else(|_| {
            Err(DirectoryError::Connection(
                "operation abandoned before settling".to_string(),
            ))
        })
    }
}

/// Keyed admission scheduler
#[derive(Default)]
pub struct ConcurrencyLimiter {
    pools: Mutex<HashMap<String, Arc<Pool>>>,
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide limiter shared by every client that does not bring its own
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Get or create a pool. The first registration of a key fixes its size.
    fn pool(&self, key: &str, max: usize) -> Arc<Pool> {
        let mut pools = self.pools.lock();
        let pool = pools.entry(key.to_string()).or_insert_with(|| {
            let max = max.max(1);
            debug!("Creating concurrency pool '{}' with {} slots", key, max);
            Arc::new(Pool {
                key: key.to_string(),
                max,
                semaphore: Arc::new(Semaphore::new(max)),
            })
        });
        Arc::clone(pool)
    }

    /// Operations currently holding a slot in a pool
    pub fn running(&self, key: &str) -> usize {
        self.pools.lock().get(key).map(|p| p.running()).unwrap_or(0)
    }

    /// Size of a pool, if it exists
    pub fn capacity(&self, key: &str) -> Option<usize> {
        self.pools.lock().get(key).map(|p| p.max)
    }

    /// Runs one operation inside a pool slot, applying the failure policy.
    /// A retry gives the slot back and queues again behind current waiters.
    pub async fn run<T, F, Fut>(
        &self,
        key: &str,
        max: usize,
        policy: FailurePolicy,
        mut op: F,
    ) -> DirectoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        let pool = self.pool(key, max);
        let mut retries = 0;

        loop {
            let permit = pool.acquire().await?;
            let result = attempt(op(), policy.timeout).await;
            drop(permit);

            match result {
                Err(e) if policy.should_retry(&e, retries) => {
                    retries += 1;
                    warn!(
                        "Operation in pool '{}' failed ({}), retry {} of {:?}",
                        key, e, retries, policy.reject
                    );
                }
                other => return other,
            }
        }
    }

    /// Submits a batch of items. Items are admitted in order, at most `max`
    /// at a time across everything sharing `key`, and each returned handle
    /// settles exactly once.
    pub fn submit<I, T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        max: usize,
        items: Vec<I>,
        op: F,
        policy: FailurePolicy,
    ) -> Vec<OperationHandle<T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DirectoryResult<T>> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let pool = self.pool(key, max);
        let op = Arc::new(op);
        let mut handles = Vec::with_capacity(items.len());
        let mut queue = Vec::with_capacity(items.len());

        for item in items {
            let (tx, rx) = oneshot::channel();
            handles.push(OperationHandle { rx });
            queue.push((item, tx));
        }

        tokio::spawn(async move {
            for (item, tx) in queue {
                let permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        continue;
                    }
                };

                let pool = Arc::clone(&pool);
                let op = Arc::clone(&op);
                tokio::spawn(async move {
                    let result = settle_item(&pool, permit, item, op.as_ref(), policy).await;
                    let _ = tx.send(result);
                });
            }
        });

        handles
    }
}

/// Runs an admitted item, re-queueing it on transient failures
async fn settle_item<I, T, F, Fut>(
    pool: &Pool,
    permit: OwnedSemaphorePermit,
    item: I,
    op: &F,
    policy: FailurePolicy,
) -> DirectoryResult<T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = DirectoryResult<T>>,
{
    let mut permit = Some(permit);
    let mut retries = 0;

    loop {
        let slot = match permit.take() {
            Some(p) => p,
            None => pool.acquire().await?,
        };
        let result = attempt(op(item.clone()), policy.timeout).await;
        drop(slot);

        match result {
            Err(e) if policy.should_retry(&e, retries) => {
                retries += 1;
                warn!(
                    "Item in pool '{}' failed ({}), resubmitting ({} of {:?})",
                    pool.key, e, retries, policy.reject
                );
            }
            other => return other,
        }
    }
}

async fn attempt<T, Fut>(fut: Fut, timeout: Option<Duration>) -> DirectoryResult<T>
where
    Fut: Future<Output = DirectoryResult<T>>,
{
    match timeout {
        None => fut.await,
        Some(limit) => {
            let started = Instant::now();
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(DirectoryError::Timeout {
                    elapsed: started.elapsed(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_submit_never_exceeds_max() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let gauge = Gauge::new();
        let items: Vec<u32> = (0..10).collect();

        let g = Arc::clone(&gauge);
        let handles = limiter.submit(
            "submit-bound",
            3,
            items,
            move |i| {
                let g = Arc::clone(&g);
                async move {
                    g.enter();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    g.leave();
                    if i == 7 {
                        Err(DirectoryError::Protocol {
                            code: 1,
                            message: "operations error".into(),
                        })
                    } else {
                        Ok(i * 2)
                    }
                }
            },
            FailurePolicy::retry(1),
        );

        assert_eq!(handles.len(), 10);

        let mut ok = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.settle().await {
                Ok(_) => ok += 1,
                Err(_) => failed += 1,
            }
        }

        assert_eq!(ok, 9);
        assert_eq!(failed, 1);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.running("submit-bound"), 0);
    }

    #[tokio::test]
    async fn test_empty_submission() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let handles = limiter.submit(
            "empty",
            3,
            Vec::<u32>::new(),
            |i| async move { Ok(i) },
            FailurePolicy::none(),
        );
        assert!(handles.is_empty());
        assert_eq!(limiter.capacity("empty"), None);
    }

    #[tokio::test]
    async fn test_zero_max_is_clamped() {
        let limiter = ConcurrencyLimiter::new();
        let value = limiter
            .run("clamped", 0, FailurePolicy::none(), || async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(limiter.capacity("clamped"), Some(1));
    }

    #[tokio::test]
    async fn test_first_registration_fixes_capacity() {
        let limiter = ConcurrencyLimiter::new();
        limiter
            .run("shared", 2, FailurePolicy::none(), || async { Ok(()) })
            .await
            .unwrap();
        limiter
            .run("shared", 50, FailurePolicy::none(), || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(limiter.capacity("shared"), Some(2));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let limiter = ConcurrencyLimiter::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        let result = limiter
            .run("retry", 1, FailurePolicy::retry(2), move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DirectoryError::ConnectionReset("peer".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let limiter = ConcurrencyLimiter::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        let result: DirectoryResult<()> = limiter
            .run("bounded", 1, FailurePolicy::retry(2), move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(DirectoryError::Connection("refused".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_policy() {
        let limiter = ConcurrencyLimiter::new();
        let policy = FailurePolicy::none().with_timeout(Some(Duration::from_millis(10)));

        let result: DirectoryResult<()> = limiter
            .run("timeout", 1, policy, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), "ETIMEDOUT");
        assert!(err.timeout_after().unwrap() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_leaves_pool_usable() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let (release, hold) = oneshot::channel::<()>();

        let holder = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let mut hold = Some(hold);
                limiter
                    .run("abandon", 1, FailurePolicy::none(), move || {
                        let hold = hold.take();
                        async move {
                            if let Some(hold) = hold {
                                let _ = hold.await;
                            }
                            Ok::<_, DirectoryError>(())
                        }
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.running("abandon"), 1);

        let waiter = limiter.run("abandon", 1, FailurePolicy::none(), || async {
            Ok::<_, DirectoryError>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), waiter)
            .await
            .is_err());

        release.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(limiter.running("abandon"), 0);

        let value = limiter
            .run("abandon", 1, FailurePolicy::none(), || async { Ok::<_, DirectoryError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
