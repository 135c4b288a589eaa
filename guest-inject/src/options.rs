// Boolean preference with change notification

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct BoolOption {
    tx: Arc<watch::Sender<bool>>,
}

impl BoolOption {
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Store a new value; subscribers are only woken when it actually changes
    pub fn set(&self, value: bool) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_change_notifies_subscribers() {
        let option = BoolOption::new(false);
        let mut rx = option.subscribe();

        option.set(false);
        assert!(!rx.has_changed().unwrap());

        option.set(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(option.get());
    }
}
