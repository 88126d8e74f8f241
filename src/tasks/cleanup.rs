//! Expiry Cleanup Task
//!
//! The in-process backend expires entries lazily on access. This task
//! reclaims the memory held by entries nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::MemoryBackend;

/// Spawns a task that purges expired entries every `cleanup_interval_secs`.
///
/// Returns the task's JoinHandle; abort it on shutdown.
///
/// # Example
/// ```ignore
/// let backend = Arc::new(MemoryBackend::new());
/// let cleanup_handle = spawn_expiry_cleanup(backend.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_expiry_cleanup(backend: Arc<MemoryBackend>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(interval_secs = cleanup_interval_secs, "starting expiry cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.cleanup_expired().await;
            if removed > 0 {
                info!(removed, "expiry cleanup removed expired entries");
            } else {
                debug!("expiry cleanup: no expired entries found");
            }
        }
    })
}
