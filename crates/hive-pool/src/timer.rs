//! Single resettable deadline.
//!
//! `IdleTimer` keeps at most one pending deadline. `reset` aborts the
//! previous deadline task and arms a new one, so the most recent reset
//! always wins. The callback is the only expiry path.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Invoked when the deadline passes without a reset.
pub type ExpireCallback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct IdleTimer {
    on_expire: ExpireCallback,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTimer {
    pub fn new(on_expire: ExpireCallback) -> Self {
        Self {
            on_expire,
            handle: Mutex::new(None),
        }
    }

    /// Cancel any pending deadline and arm a new one `after` from now.
    pub fn reset(&self, after: Duration) {
        let callback = self.on_expire.clone();
        let mut handle = self.handle.lock().expect("timer lock");
        if let Some(old) = handle.take() {
            old.abort();
        }
        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!(after_ms = after.as_millis() as u64, "idle deadline reached");
            callback().await;
        }));
    }

    /// Disarm without firing.
    pub fn cancel(&self) {
        if let Some(old) = self.handle.lock().expect("timer lock").take() {
            old.abort();
        }
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .expect("timer lock")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Ok(mut handle) = self.handle.lock()
            && let Some(task) = handle.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_timer() -> (IdleTimer, Arc<AtomicU32>) {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let timer = IdleTimer::new(Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as BoxFuture
        }));
        (timer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let (timer, fired) = counting_timer();
        timer.reset(Duration::from_millis(1000));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_deadline() {
        let (timer, fired) = counting_timer();
        timer.reset(Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(900)).await;
        timer.reset(Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn many_resets_fire_once() {
        let (timer, fired) = counting_timer();
        for _ in 0..10 {
            timer.reset(Duration::from_millis(100));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (timer, fired) = counting_timer();
        timer.reset(Duration::from_millis(100));
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
