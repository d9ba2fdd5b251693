//! Tokio-hosted periodic loops with a shared shutdown signal.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::DispatchError;

type LoopList = Arc<Mutex<Vec<(String, JoinHandle<()>)>>>;

/// Spawning side of [`BackgroundTasks`]. Clones share the runtime, the
/// shutdown token and the list of handles awaited on shutdown.
#[derive(Clone)]
pub(crate) struct LoopSpawner {
    handle: Handle,
    token: CancellationToken,
    loops: LoopList,
}

impl LoopSpawner {
    fn push<Fut>(&self, name: String, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(task = %name, "spawning background task");
        let join = self.handle.spawn(fut);
        self.loops.lock().push((name, join));
    }

    /// Spawn a loop with its own child token so it can be stopped alone.
    /// Cancelling the returned token stops only this loop; shutdown still
    /// stops it too.
    pub(crate) fn spawn_scoped<F, Fut>(&self, name: impl Into<String>, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scope = self.token.child_token();
        self.push(name.into(), make(scope.clone()));
        scope
    }

    /// Whether shutdown was signalled.
    pub(crate) fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handles of the background loops started by a dispatcher.
///
/// Dropping the value signals shutdown without waiting; call
/// [`shutdown`](Self::shutdown) to wait for the loops to finish.
pub struct BackgroundTasks {
    spawner: LoopSpawner,
}

impl BackgroundTasks {
    /// Spawn onto the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            spawner: LoopSpawner {
                handle,
                token: CancellationToken::new(),
                loops: Arc::default(),
            },
        }
    }

    /// Spawn onto the runtime the caller is running in.
    pub fn current() -> Result<Self, DispatchError> {
        let handle = Handle::try_current().map_err(|e| {
            DispatchError::InvalidConfig(format!("background tasks need a tokio runtime: {e}"))
        })?;
        Ok(Self::new(handle))
    }

    /// Token cancelled on shutdown; pass clones to loops.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.spawner.token.clone()
    }

    pub(crate) fn spawner(&self) -> LoopSpawner {
        self.spawner.clone()
    }

    /// Spawn a named loop built from a shutdown token.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawner.push(name.into(), make(self.spawner.token.clone()));
    }

    /// Names of spawned loops, in spawn order. Loops started after a pool
    /// replacement are included.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.spawner
            .loops
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of spawned loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spawner.loops.lock().len()
    }

    /// Whether nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spawner.loops.lock().is_empty()
    }

    /// Signal shutdown and wait for every loop to exit.
    pub async fn shutdown(self) {
        self.spawner.token.cancel();
        loop {
            let batch = std::mem::take(&mut *self.spawner.loops.lock());
            if batch.is_empty() {
                break;
            }
            for (name, join) in batch {
                if let Err(err) = join.await {
                    warn!(task = %name, error = %err, "background task ended abnormally");
                }
            }
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.spawner.token.cancel();
    }
}
