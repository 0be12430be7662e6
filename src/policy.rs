//! Write-policy handler: routes save/delete across the cache-only,
//! cache-first, cache-and-network, and network-first modes.

use std::future::Future;

use crate::error::StoreError;

/// How a write should be applied across the cache and network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WritePolicy {
    /// Apply to cache only; no sync.
    CacheOnly,
    /// Apply to cache synchronously; fire-and-forget sync; errors swallowed.
    CacheFirst,
    /// Apply to cache; await sync; errors propagate; local write stays
    /// committed.
    CacheAndNetwork,
    /// Same surface shape as `CacheAndNetwork`, but sync is semantically
    /// primary rather than best-effort.
    NetworkFirst,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy::CacheAndNetwork
    }
}

/// Dispatches a cache write and an optional network sync according to a
/// [`WritePolicy`].
///
/// `apply_cache` and `apply_sync` are taken as closures so callers can
/// share one handler across save/save_all/delete/delete_all without this
/// type knowing about entity types.
pub struct WritePolicyHandler;

impl WritePolicyHandler {
    /// Apply `policy`, running `apply_cache` first and, depending on
    /// policy, `apply_sync` either awaited-and-propagated,
    /// fired-and-forgotten, or not run at all.
    pub async fn apply<C, CFut, S, SFut>(
        policy: WritePolicy,
        apply_cache: C,
        apply_sync: S,
    ) -> Result<(), StoreError>
    where
        C: FnOnce() -> CFut,
        CFut: Future<Output = Result<(), StoreError>>,
        S: FnOnce() -> SFut + Send + 'static,
        SFut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        apply_cache().await?;
        match policy {
            WritePolicy::CacheOnly => Ok(()),
            WritePolicy::CacheFirst => {
                tokio::spawn(async move {
                    let _ = apply_sync().await;
                });
                Ok(())
            }
            WritePolicy::CacheAndNetwork | WritePolicy::NetworkFirst => apply_sync().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cache_only_never_runs_sync() {
        let synced = Arc::new(AtomicBool::new(false));
        let synced_clone = synced.clone();
        WritePolicyHandler::apply(
            WritePolicy::CacheOnly,
            || async { Ok(()) },
            move || async move {
                synced_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap();
        assert!(!synced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cache_first_swallows_sync_errors() {
        let result = WritePolicyHandler::apply(
            WritePolicy::CacheFirst,
            || async { Ok(()) },
            || async { Err(StoreError::Network("down".to_string())) },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cache_and_network_propagates_sync_errors() {
        let result = WritePolicyHandler::apply(
            WritePolicy::CacheAndNetwork,
            || async { Ok(()) },
            || async { Err(StoreError::Network("down".to_string())) },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cache_failure_short_circuits_before_sync() {
        let synced = Arc::new(AtomicBool::new(false));
        let synced_clone = synced.clone();
        let result = WritePolicyHandler::apply(
            WritePolicy::CacheAndNetwork,
            || async { Err(StoreError::validation("bad cache write")) },
            move || async move {
                synced_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;
        assert!(result.is_err());
        assert!(!synced.load(Ordering::SeqCst));
    }
}
