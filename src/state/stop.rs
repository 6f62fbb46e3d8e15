/// Cooperative stop flag
///
/// Wraps a `watch` channel so that a crawl loop can both poll the flag between
/// steps and await it while sleeping or fetching.
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Creates a sender together with a signal listening to it
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self::new(receiver))
    }

    pub fn is_set(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the flag is set
    ///
    /// If every sender is gone without setting the flag, never resolves.
    pub async fn wait(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_set() {
        let (sender, mut stop) = StopSignal::channel();
        assert!(!stop.is_set());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = sender.send(true);
        });

        tokio::time::timeout(Duration::from_secs(1), stop.wait())
            .await
            .expect("stop flag was not observed");
        assert!(stop.is_set());
    }

    #[tokio::test]
    async fn test_wait_pends_when_sender_dropped() {
        let (sender, mut stop) = StopSignal::channel();
        drop(sender);

        let result = tokio::time::timeout(Duration::from_millis(20), stop.wait()).await;
        assert!(result.is_err());
        assert!(!stop.is_set());
    }
}
