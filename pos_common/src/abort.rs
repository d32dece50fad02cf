//! A cloneable, one-shot cancellation signal.
//!
//! Any clone can fire the signal, and every clone observes it. Futures wrapped with [`AbortSignal::run`] are dropped as
//! soon as the signal fires, which is what actually cancels an in-flight HTTP request.
use std::{future::Future, sync::Arc};

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("The operation was aborted")]
pub struct Aborted;

#[derive(Clone, Debug)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender: Arc::new(sender), receiver }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal has fired. Resolves immediately if it already has.
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as `self`, so this only returns once the flag is set
        let _ = receiver.wait_for(|aborted| *aborted).await;
    }

    /// Drive `fut` to completion unless the signal fires first, in which case `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Aborted> {
        if self.is_aborted() {
            return Err(Aborted);
        }
        tokio::select! {
            biased;
            _ = self.aborted() => Err(Aborted),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_aborted() {
        let signal = AbortSignal::new();
        let result = signal.run(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn abort_drops_pending_future() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.abort();
        });
        let result = signal.run(tokio::time::sleep(Duration::from_secs(30))).await;
        assert_eq!(result, Err(Aborted));
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn already_aborted_never_polls() {
        let signal = AbortSignal::new();
        signal.abort();
        let result = signal.run(async { panic!("should not be polled") }).await;
        assert_eq!(result, Err::<(), _>(Aborted));
    }
}
