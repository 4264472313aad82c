use std::time::Duration;
use tokio::sync::watch;

/// Fires the shutdown signal for every [`Shutdown`] handle.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation handle checked by monitors at each state transition.
/// Dropping the trigger counts as a shutdown.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `d` unless shutdown comes first. Returns false when interrupted.
    pub async fn sleep(&mut self, d: Duration) -> bool {
        if d.is_zero() {
            return !self.is_triggered();
        }
        let elapsed = tokio::select! {
            _ = tokio::time::sleep(d) => true,
            _ = self.wait() => false,
        };
        elapsed && !self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_trigger() {
        let (_trigger, mut sd) = channel();
        assert!(sd.sleep(Duration::from_millis(5)).await);
        assert!(!sd.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep() {
        let (trigger, mut sd) = channel();
        let waiter = tokio::spawn(async move { sd.sleep(Duration::from_secs(60)).await });
        trigger.trigger();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut sd) = channel();
        drop(trigger);
        assert!(sd.is_triggered());
        sd.wait().await;
    }
}
