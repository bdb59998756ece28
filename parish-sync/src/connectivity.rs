//! Online/offline state as seen by the engine

use tokio::sync::watch;

/// Reports whether the remote store is reachable.
///
/// `subscribe` is the reconnect signal: the receiver observes every
/// transition and the engine drains on each offline -> online edge.
pub trait ConnectivityOracle: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state driven by whoever observes the network (a platform
/// callback, or a reachability probe loop).
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Publish the current state; subscribers are woken only on change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

impl ConnectivityOracle for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!monitor.is_online());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_repeated_state_does_not_notify() {
        let monitor = ConnectivityMonitor::new(true);
        let rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
