//! Background task that evicts idle tenant clients.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::registry::TenantClientRegistry;
use crate::traits::ClientConnector;

/// Periodically calls [`TenantClientRegistry::evict_idle`].
///
/// The worker task:
/// 1. skips the immediate first tick
/// 2. evicts clients idle for at least `max_idle` on every `interval` tick
/// 3. exits when [`stop`](Self::stop) is called or the handle is dropped
#[derive(Debug)]
pub struct IdleSweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IdleSweeper {
    /// Starts the sweeper on the current runtime.
    #[must_use]
    pub fn start<C: ClientConnector>(
        registry: TenantClientRegistry<C>,
        max_idle: Duration,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if registry.is_closed() {
                            break;
                        }
                        registry.evict_idle(max_idle).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("Idle sweeper stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Signals the worker and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cameyo_core::{MigrationSet, TenantId};

    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tenant::{ProvisionPolicy, SchemaProvisioner};

    fn registry(backend: &MemoryBackend) -> TenantClientRegistry<MemoryBackend> {
        let provisioner = SchemaProvisioner::new(
            Arc::new(backend.clone()),
            ProvisionPolicy::FailClosed,
            Arc::new(MigrationSet::empty()),
        );
        TenantClientRegistry::new(Arc::new(backend.clone()), Arc::new(provisioner))
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_idle_clients_on_tick() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend);
        registry.get_client(&TenantId::public()).await.unwrap();

        let mut sweeper = IdleSweeper::start(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(registry.is_empty());
        assert_eq!(backend.disconnect_count(), 1);

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_sweep_keeps_clients() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend);
        registry.get_client(&TenantId::public()).await.unwrap();

        let mut sweeper = IdleSweeper::start(
            registry.clone(),
            Duration::from_secs(1),
            Duration::from_secs(3600),
        );
        sweeper.stop().await;
        sweeper.stop().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.len(), 1);
    }
}
