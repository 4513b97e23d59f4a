use tokio::sync::watch;

/// Shared stop signal for the long-running tasks.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once `true` has been published or the sending side is gone.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_after_signal() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        shutdown_requested(&mut rx).await;
    }
}
