// Object pinning registry
//
// Objects created in the target through JDWP are collectable as soon as they
// exist. Everything the engine needs across more than one round-trip is
// allocated through a registry, which disables collection for it and
// re-enables collection for all of it in one bulk release.

use crate::error::{InjectError, InjectResult};
use crate::target::TargetVm;
use jdwp_client::ObjectId;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct PinState {
    pinned: Vec<ObjectId>,
    released: bool,
}

pub struct PinRegistry {
    target: Arc<dyn TargetVm>,
    state: Mutex<PinState>,
}

impl PinRegistry {
    pub fn new(target: Arc<dyn TargetVm>) -> Self {
        Self {
            target,
            state: Mutex::new(PinState::default()),
        }
    }

    /// Obtain an object from `supplier` and pin it
    ///
    /// When the object is collected before it could be pinned, the supplier
    /// runs again. Errors from the supplier itself, collection included, end
    /// the call. A null result is an error.
    pub async fn pin<F, Fut>(&self, mut supplier: F) -> InjectResult<ObjectId>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InjectResult<ObjectId>>,
    {
        let pinned = self
            .pin_optional(|| {
                let next = supplier();
                async move { next.await.map(|object| (object != 0).then_some(object)) }
            })
            .await?;

        pinned.ok_or_else(|| InjectError::NullReference("object to pin".to_string()))
    }

    /// Like `pin`, for suppliers that may legitimately produce nothing
    pub async fn pin_optional<F, Fut>(&self, mut supplier: F) -> InjectResult<Option<ObjectId>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InjectResult<Option<ObjectId>>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.state.lock().released {
                return Err(InjectError::RegistryReleased);
            }
            attempt += 1;

            let Some(object) = supplier().await? else {
                return Ok(None);
            };

            match self.target.disable_collection(object).await {
                Ok(()) => {}
                Err(InjectError::Collected) => {
                    debug!(object, attempt, "object collected before pinning, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let released = {
                let mut state = self.state.lock();
                if !state.released {
                    state.pinned.push(object);
                }
                state.released
            };
            if released {
                self.unpin(object).await;
                return Err(InjectError::RegistryReleased);
            }
            return Ok(Some(object));
        }
    }

    /// Release one object ahead of the bulk release
    pub async fn release(&self, object: ObjectId) -> bool {
        let found = {
            let mut state = self.state.lock();
            match state.pinned.iter().position(|pinned| *pinned == object) {
                Some(index) => {
                    state.pinned.swap_remove(index);
                    true
                }
                None => false,
            }
        };
        if found {
            self.unpin(object).await;
        }
        found
    }

    /// Release every pinned object; later calls do nothing
    /// Returns how many objects were released.
    pub async fn collect_all(&self) -> usize {
        let pinned = {
            let mut state = self.state.lock();
            if state.released {
                return 0;
            }
            state.released = true;
            std::mem::take(&mut state.pinned)
        };

        for object in &pinned {
            self.unpin(*object).await;
        }
        pinned.len()
    }

    async fn unpin(&self, object: ObjectId) {
        match self.target.enable_collection(object).await {
            Ok(()) | Err(InjectError::Collected) | Err(InjectError::ProtocolUnavailable) => {}
            Err(e) => debug!(object, error = %e, "failed to release pinned object"),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTarget;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_pin_retries_collected_objects() {
        let target = MockTarget::new();
        let registry = PinRegistry::new(target.clone());
        target.collect_next_pins(3);

        let calls = AtomicU32::new(0);
        let object = registry
            .pin(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(0x100 + n as u64) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(object, 0x103);
        assert!(target.is_pinned(0x103));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_supplier_collection_error_is_not_retried() {
        let target = MockTarget::new();
        let registry = PinRegistry::new(target.clone());

        // An invocation whose argument was collected keeps failing the same way
        let calls = AtomicU32::new(0);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            registry.pin_optional(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InjectError::Collected) }
            }),
        )
        .await
        .expect("supplier error ends the call");

        assert!(matches!(result, Err(InjectError::Collected)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert_eq!(target.pin_calls(), 0);
    }

    #[tokio::test]
    async fn test_collect_all_is_single_shot() {
        let target = MockTarget::new();
        let registry = PinRegistry::new(target.clone());

        for id in [1u64, 2, 3] {
            registry.pin(|| async move { Ok(id) }).await.unwrap();
        }
        // Already gone on the target side; tolerated silently
        target.forget_object(2);

        assert_eq!(registry.collect_all().await, 3);
        assert_eq!(registry.collect_all().await, 0);
        assert!(registry.is_released());
        assert_eq!(target.pinned_count(), 0);

        let err = registry.pin(|| async { Ok(9) }).await.unwrap_err();
        assert!(matches!(err, InjectError::RegistryReleased));
    }

    #[tokio::test]
    async fn test_release_one_object() {
        let target = MockTarget::new();
        let registry = PinRegistry::new(target.clone());
        registry.pin(|| async { Ok(5) }).await.unwrap();
        registry.pin(|| async { Ok(6) }).await.unwrap();

        assert!(registry.release(5).await);
        assert!(!registry.release(5).await);
        assert!(!target.is_pinned(5));
        assert!(target.is_pinned(6));

        assert_eq!(registry.collect_all().await, 1);
        assert_eq!(target.pinned_count(), 0);
    }

    #[tokio::test]
    async fn test_null_results() {
        let target = MockTarget::new();
        let registry = PinRegistry::new(target.clone());

        assert_eq!(registry.pin_optional(|| async { Ok(None) }).await.unwrap(), None);
        let err = registry.pin(|| async { Ok(0) }).await.unwrap_err();
        assert!(matches!(err, InjectError::NullReference(_)));
        assert!(registry.is_empty());
    }
}
