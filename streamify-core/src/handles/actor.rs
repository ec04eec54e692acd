//! Actor implementation for the handle manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::commands::{
    AcquireResponder, AcquiredHandle, EntryStats, HandleCommand, ManagerStats,
};
use super::entry::ManagedEntry;
use super::manager::HandleManager;
use super::HandleError;
use crate::catalog::SourceDescriptor;
use crate::config::{HandleConfig, StreamifyConfig};
use crate::engine::{AddOptions, DownloadEngine, EngineError, InfoHash, PiecePriority};

/// Spawns the handle manager actor and returns its handle.
///
/// The actor owns the entry and pending registries and runs the idle
/// reaper on `config.handles.reap_interval`. It stops on
/// [`HandleManager::shutdown`] or when every `HandleManager` clone is dropped,
/// destroying all handles in either case.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
/// use streamify_core::config::StreamifyConfig;
/// use streamify_core::engine::DirectoryEngine;
/// use streamify_core::handles::spawn_handle_manager;
///
/// let config = StreamifyConfig::default();
/// let engine = Arc::new(DirectoryEngine::new(&config.engine));
/// let manager = spawn_handle_manager(engine, &config);
/// # manager.shutdown().await.unwrap();
/// # }
/// ```
pub fn spawn_handle_manager(
    engine: Arc<dyn DownloadEngine>,
    config: &StreamifyConfig,
) -> HandleManager {
    let (sender, receiver) = mpsc::channel(config.handles.command_buffer.max(1));
    let (internal_sender, internal_receiver) = mpsc::unbounded_channel();

    let actor = HandleManagerActor {
        engine,
        config: config.handles.clone(),
        add_options: config.engine.add_options(),
        entries: HashMap::new(),
        pending: HashMap::new(),
        settled: internal_sender.clone(),
    };

    tokio::spawn(actor.run(receiver, internal_receiver));

    HandleManager::new(sender, internal_sender)
}

struct HandleManagerActor {
    engine: Arc<dyn DownloadEngine>,
    config: HandleConfig,
    add_options: AddOptions,
    entries: HashMap<InfoHash, ManagedEntry>,
    /// Callers waiting on an in-flight engine add, one list per hash
    pending: HashMap<InfoHash, Vec<AcquireResponder>>,
    settled: mpsc::UnboundedSender<HandleCommand>,
}

impl HandleManagerActor {
    /// Processes commands one at a time until shutdown.
    ///
    /// Internal messages (releases, settled adds) are drained before new
    /// requests so a caller that drops a lease and then queries stats sees
    /// its own release.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HandleCommand>,
        mut internal: mpsc::UnboundedReceiver<HandleCommand>,
    ) {
        let period = self.config.reap_interval.max(Duration::from_millis(1));
        let mut reaper = tokio::time::interval_at(Instant::now() + period, period);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            reap_interval_secs = period.as_secs(),
            "Handle manager actor started"
        );

        loop {
            tokio::select! {
                biased;
                Some(command) = internal.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("All manager handles dropped");
                        self.destroy_all().await;
                        break;
                    }
                },
                _ = reaper.tick() => {
                    self.reap_idle().await;
                }
            }
        }

        tracing::debug!("Handle manager actor stopped");
    }

    /// Handles a single command. Returns false to stop the actor.
    async fn handle_command(&mut self, command: HandleCommand) -> bool {
        match command {
            HandleCommand::Acquire {
                descriptor,
                responder,
            } => self.acquire(descriptor, responder),

            HandleCommand::Release { info_hash } => self.release(info_hash),

            HandleCommand::AcquireSettled { info_hash, result } => {
                self.settle(info_hash, result).await
            }

            HandleCommand::ReapIdle { responder } => {
                let evicted = self.reap_idle().await;
                let _ = responder.send(evicted);
            }

            HandleCommand::GetStats { responder } => {
                let _ = responder.send(self.stats());
            }

            HandleCommand::Shutdown { responder } => {
                tracing::info!(handles = self.entries.len(), "Handle manager shutting down");
                self.destroy_all().await;
                let _ = responder.send(());
                return false;
            }
        }

        true
    }

    fn acquire(&mut self, descriptor: SourceDescriptor, responder: AcquireResponder) {
        let info_hash = descriptor.hash;

        if let Some(entry) = self.entries.get_mut(&info_hash) {
            entry.retain();
            if responder.send(Ok(entry.handle.clone())).is_err() {
                // Caller gave up before receiving the handle
                entry.release();
            }
            tracing::debug!(%info_hash, ref_count = entry.ref_count, "Reusing live handle");
            return;
        }

        if let Some(waiters) = self.pending.get_mut(&info_hash) {
            waiters.push(responder);
            tracing::debug!(%info_hash, waiters = waiters.len(), "Joined in-flight acquisition");
            return;
        }

        self.pending.insert(info_hash, vec![responder]);
        tracing::debug!(%info_hash, locator = %descriptor.locator, "Adding source to engine");

        let engine = self.engine.clone();
        let options = self.add_options.clone();
        let timeout = self.config.acquire_timeout;
        let settled = self.settled.clone();

        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, add_or_adopt(engine.as_ref(), &descriptor, &options))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandleError::AcquireTimeout {
                        info_hash,
                        timeout_secs: timeout.as_secs(),
                    }),
                };
            let unsettled = settled.send(HandleCommand::AcquireSettled { info_hash, result });

            // Actor stopped before the add resolved
            if let Err(mpsc::error::SendError(HandleCommand::AcquireSettled {
                result: Ok(acquired),
                ..
            })) = unsettled
            {
                if acquired.freshly_added {
                    let engine_hash = acquired.handle.info_hash();
                    drop(acquired);
                    tracing::debug!(%info_hash, "Removing handle added after shutdown");
                    if let Err(error) = engine
                        .remove(engine_hash, options.destroy_store_on_remove)
                        .await
                    {
                        tracing::warn!(%info_hash, %error, "Engine failed to remove late handle");
                    }
                }
            }
        });
    }

    async fn settle(&mut self, info_hash: InfoHash, result: Result<AcquiredHandle, HandleError>) {
        let Some(waiters) = self.pending.remove(&info_hash) else {
            tracing::warn!(%info_hash, "Acquisition settled with no pending record");
            return;
        };

        let acquired = match result {
            Ok(acquired) => acquired,
            Err(error) => {
                tracing::warn!(%info_hash, %error, waiters = waiters.len(), "Acquisition failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                return;
            }
        };

        let handle = acquired.handle;
        let engine_hash = handle.info_hash();
        if engine_hash != info_hash {
            // One engine handle is never registered under two keys
            tracing::warn!(%info_hash, %engine_hash, "Engine handle hash differs from catalog hash");
            let error = HandleError::AcquireFailed {
                reason: format!("source for {info_hash} resolved to {engine_hash}"),
            };
            for waiter in waiters {
                let _ = waiter.send(Err(error.clone()));
            }

            if acquired.freshly_added {
                drop(handle);
                if let Err(error) = self
                    .engine
                    .remove(engine_hash, self.add_options.destroy_store_on_remove)
                    .await
                {
                    tracing::warn!(%info_hash, %error, "Engine failed to remove mismatched handle");
                }
            }
            return;
        }

        if acquired.freshly_added && handle.piece_count() > 0 {
            handle.select(0..=handle.piece_count() - 1, PiecePriority::Background);
        }

        let mut delivered = 0;
        for waiter in waiters {
            if waiter.send(Ok(handle.clone())).is_ok() {
                delivered += 1;
            }
        }

        tracing::info!(
            %info_hash,
            name = handle.name(),
            ref_count = delivered,
            adopted = !acquired.freshly_added,
            "Handle registered"
        );
        self.entries
            .insert(info_hash, ManagedEntry::new(handle, delivered));
    }

    fn release(&mut self, info_hash: InfoHash) {
        let Some(entry) = self.entries.get_mut(&info_hash) else {
            tracing::debug!(%info_hash, "Release for unregistered handle ignored");
            return;
        };

        if entry.release() {
            tracing::debug!(%info_hash, ref_count = entry.ref_count, "Handle released");
        } else {
            tracing::warn!(%info_hash, "Release without a matching acquire");
        }
    }

    /// Destroys every unreferenced handle idle past the timeout.
    async fn reap_idle(&mut self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        let evictable: Vec<InfoHash> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_evictable(now, idle_timeout))
            .map(|(info_hash, _)| *info_hash)
            .collect();

        for info_hash in &evictable {
            if let Some(entry) = self.entries.remove(info_hash) {
                tracing::info!(
                    %info_hash,
                    idle_secs = entry.idle_for(now).as_secs(),
                    "Evicting idle handle"
                );
                self.destroy(*info_hash, entry).await;
            }
        }

        if !evictable.is_empty() {
            tracing::debug!(
                evicted = evictable.len(),
                remaining = self.entries.len(),
                "Idle reaper pass complete"
            );
        }

        evictable.len()
    }

    async fn destroy(&self, info_hash: InfoHash, entry: ManagedEntry) {
        let engine_hash = entry.handle.info_hash();
        drop(entry);

        if let Err(error) = self
            .engine
            .remove(engine_hash, self.add_options.destroy_store_on_remove)
            .await
        {
            tracing::warn!(%info_hash, %error, "Engine failed to remove handle");
        }
    }

    /// Fails all waiters and destroys every handle regardless of references.
    async fn destroy_all(&mut self) {
        for (info_hash, waiters) in self.pending.drain() {
            tracing::debug!(%info_hash, waiters = waiters.len(), "Cancelling in-flight acquisition");
            for waiter in waiters {
                let _ = waiter.send(Err(HandleError::ManagerShutdown));
            }
        }

        let entries: Vec<(InfoHash, ManagedEntry)> = self.entries.drain().collect();
        for (info_hash, entry) in entries {
            if entry.ref_count > 0 {
                tracing::warn!(%info_hash, ref_count = entry.ref_count, "Destroying handle still in use");
            }
            self.destroy(info_hash, entry).await;
        }
    }

    fn stats(&self) -> ManagerStats {
        let now = Instant::now();
        let mut entries: Vec<EntryStats> = self
            .entries
            .iter()
            .map(|(info_hash, entry)| EntryStats {
                info_hash: *info_hash,
                name: entry.handle.name().to_string(),
                ref_count: entry.ref_count,
                idle_secs: if entry.ref_count == 0 {
                    entry.idle_for(now).as_secs()
                } else {
                    0
                },
                progress_percent: (entry.handle.progress().clamp(0.0, 1.0) * 100.0).round() as u8,
                download_speed: entry.handle.download_speed(),
            })
            .collect();
        entries.sort_by_key(|e| e.info_hash);

        let referenced = entries.iter().filter(|e| e.ref_count > 0).count();
        ManagerStats {
            total: entries.len(),
            referenced,
            idle: entries.len() - referenced,
            pending: self.pending.len(),
            entries,
        }
    }
}

/// Produces a handle for `descriptor`, adopting one the engine already has.
///
/// The engine is asked first so content added outside the manager is
/// adopted without an add. A duplicate reported by the add itself (the
/// engine registered the hash between lookup and add) is recovered by
/// looking up the conflicting hash.
async fn add_or_adopt(
    engine: &dyn DownloadEngine,
    descriptor: &SourceDescriptor,
    options: &AddOptions,
) -> Result<AcquiredHandle, HandleError> {
    if let Some(handle) = engine.get(descriptor.hash).await {
        tracing::debug!(info_hash = %descriptor.hash, "Adopting handle already live in engine");
        return Ok(AcquiredHandle {
            handle,
            freshly_added: false,
        });
    }

    match engine.add(&descriptor.locator, options).await {
        Ok(handle) => Ok(AcquiredHandle {
            handle,
            freshly_added: true,
        }),
        Err(EngineError::DuplicateHandle { info_hash }) => {
            tracing::debug!(%info_hash, "Engine reported duplicate add, adopting existing handle");
            engine
                .get(info_hash)
                .await
                .map(|handle| AcquiredHandle {
                    handle,
                    freshly_added: false,
                })
                .ok_or_else(|| HandleError::AcquireFailed {
                    reason: format!("engine reported duplicate {info_hash} but has no live handle"),
                })
        }
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, mock_locator};

    fn descriptor(byte: u8) -> SourceDescriptor {
        let hash = InfoHash::new([byte; 20]);
        SourceDescriptor::new(hash, mock_locator(hash, "movie.mp4", 1000))
    }

    fn spawn(engine: &Arc<MockEngine>) -> HandleManager {
        spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing())
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn(&engine);
        assert!(manager.is_running());

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pending, 0);

        manager.shutdown().await.unwrap();

        let result = manager.stats().await;
        assert!(matches!(result, Err(HandleError::ManagerShutdown)));
        assert!(matches!(
            manager.acquire(&descriptor(1)).await,
            Err(HandleError::ManagerShutdown)
        ));
    }

    #[tokio::test]
    async fn test_fresh_handle_gets_background_priority() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn(&engine);
        let source = descriptor(1);

        let _lease = manager.acquire(&source).await.unwrap();

        let mock = engine.handle(source.hash).unwrap();
        assert!(
            mock.priorities()
                .iter()
                .all(|p| *p == PiecePriority::Background)
        );
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_adopted_handle_keeps_engine_priorities() {
        let engine = Arc::new(MockEngine::new());
        let source = descriptor(2);
        let external = engine.insert_external(&source.locator);
        let manager = spawn(&engine);

        let lease = manager.acquire(&source).await.unwrap();

        assert_eq!(engine.add_calls(), 0);
        assert!(external.priorities().iter().all(|p| *p == PiecePriority::Low));
        assert_eq!(lease.info_hash(), source.hash);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_add_leaves_no_entry() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_adds();
        let manager = spawn(&engine);

        let result = manager.acquire(&descriptor(3)).await;
        assert!(matches!(result, Err(HandleError::AcquireFailed { .. })));

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pending, 0);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_locator_is_acquire_failure() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn(&engine);
        let source = SourceDescriptor::new(InfoHash::new([4; 20]), "not-a-magnet");

        let result = manager.acquire(&source).await;
        assert!(matches!(result, Err(HandleError::AcquireFailed { .. })));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_destroys_referenced_handles() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn(&engine);
        let source = descriptor(5);

        let lease = manager.acquire(&source).await.unwrap();
        manager.shutdown().await.unwrap();

        assert!(!engine.contains(source.hash));
        assert_eq!(engine.remove_calls(), 1);
        // Late release after shutdown is harmless
        drop(lease);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_waiters() {
        let engine = Arc::new(MockEngine::new());
        engine.hang_adds();
        let manager = spawn(&engine);

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire(&descriptor(6)).await })
        };
        while manager.stats().await.unwrap().pending == 0 {
            tokio::task::yield_now().await;
        }

        manager.shutdown().await.unwrap();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(HandleError::ManagerShutdown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_resolving_after_shutdown_is_removed() {
        let engine = Arc::new(MockEngine::new().with_add_delay(Duration::from_millis(100)));
        let manager = spawn(&engine);
        let source = descriptor(9);

        let waiter = {
            let manager = manager.clone();
            let source = source.clone();
            tokio::spawn(async move { manager.acquire(&source).await })
        };
        while manager.stats().await.unwrap().pending == 0 {
            tokio::task::yield_now().await;
        }

        manager.shutdown().await.unwrap();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(HandleError::ManagerShutdown)
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.add_calls(), 1);
        assert!(!engine.contains(source.hash));
        assert_eq!(engine.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_engine_hash_is_rejected_and_removed() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn(&engine);
        let engine_hash = InfoHash::new([0x11; 20]);
        let source = SourceDescriptor::new(
            InfoHash::new([0x22; 20]),
            mock_locator(engine_hash, "movie.mp4", 1000),
        );

        let result = manager.acquire(&source).await;
        assert!(matches!(result, Err(HandleError::AcquireFailed { .. })));

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.pending, 0);
        assert!(!engine.contains(engine_hash));
        assert_eq!(engine.remove_calls(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reap_only_evicts_idle_unreferenced() {
        let engine = Arc::new(MockEngine::new());
        let mut config = StreamifyConfig::for_testing();
        config.handles.reap_interval = Duration::from_secs(3600);
        let manager = spawn_handle_manager(engine.clone(), &config);
        let held = descriptor(7);
        let dropped = descriptor(8);

        let _held = manager.acquire(&held).await.unwrap();
        drop(manager.acquire(&dropped).await.unwrap());

        assert_eq!(manager.reap_idle().await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(manager.reap_idle().await.unwrap(), 1);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.ref_count(held.hash), Some(1));
        assert!(engine.handle(dropped.hash).is_none());
        manager.shutdown().await.unwrap();
    }
}
