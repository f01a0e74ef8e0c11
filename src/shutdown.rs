//! Cooperative cancellation
//!
//! A [`Shutdown`] is a cheap, cloneable receiver for a one-shot stop signal.
//! Pagination loops, rate-limit backoff and the record loader check it and bail
//! out with [`crate::ReviewGraphError::Cancelled`].

use tokio::sync::watch;

/// Sender half: flips every associated [`Shutdown`] to the triggered state
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every receiver. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver half of the stop signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a linked trigger/receiver pair
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A receiver that is never triggered
    pub fn never() -> Shutdown {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender keeps the value at `false` forever
        drop(tx);
        Shutdown { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail fast with `Cancelled` if the signal has fired
    pub fn check(&self) -> crate::Result<()> {
        if self.is_triggered() {
            Err(crate::ReviewGraphError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the signal fires; pends forever for [`Shutdown::never`]
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            // Sender gone without firing
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_receivers() {
        let (trigger, shutdown) = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.triggered().await });

        assert!(!shutdown.is_triggered());
        trigger.trigger();
        handle.await.unwrap();
        assert!(shutdown.is_triggered());
        assert!(matches!(
            shutdown.check(),
            Err(crate::ReviewGraphError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let shutdown = Shutdown::never();
        assert!(shutdown.check().is_ok());
        let result = tokio::time::timeout(Duration::from_millis(20), shutdown.triggered()).await;
        assert!(result.is_err());
    }
}
