use std::future::IntoFuture;

use futures::task::{FutureObj, Spawn, SpawnError};

/// Runs threaded site calls on the ambient tokio runtime.
pub struct TokioSpawn {
    tokio: tokio::runtime::Handle,
}

impl TokioSpawn {
    /// Must be called from inside a tokio runtime.
    pub fn new() -> Self {
        Self {
            tokio: tokio::runtime::Handle::current(),
        }
    }
}

impl Spawn for TokioSpawn {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        drop(self.tokio.spawn(future.into_future()));
        Ok(())
    }
}
