//! # Service Wiring
//!
//! Builds every sync service once from [`SyncConfig`] and hands out handles.
//!
//! ```text
//! SyncConfig ──► SyncServices::build()
//!                  ├── WsConnector        ─► ConnectionManager
//!                  ├── queue backend      ─► OfflineQueue (+ RestReplayHandler per action)
//!                  ├── QueryCache         ─► PriorityLoader
//!                  ├── ApiClient + cursor ─► SyncOrchestrator
//!                  └── NetworkMonitor
//!
//! start():  orchestrator.start(), network watch task
//!           offline  → queue paused
//!           online   → queue drains, channel handle_back_online()
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pitchside_core::{OfflineAction, OfflineQueueItem};
use pitchside_store::{
    CursorStore, Database, DurableQueue, JsonFileCursorStore, JsonFileQueue, MemoryCursorStore,
    MemoryQueue, StoreConfig,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, RestReplayHandler};
use crate::cache::QueryCache;
use crate::config::{QueueBackend, SyncConfig};
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;
use crate::loader::PriorityLoader;
use crate::lock;
use crate::network::NetworkMonitor;
use crate::offline::OfflineQueue;
use crate::orchestrator::{OrchestratorDeps, SyncOrchestrator};
use crate::transport::{Connector, WsConnector};

/// How [`SyncServices::submit`] handled a write.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Performed against the server right away.
    Sent,
    /// Stored in the offline queue for replay.
    Queued(OfflineQueueItem),
}

struct Storage {
    queue: Arc<dyn DurableQueue>,
    cursors: Arc<dyn CursorStore>,
    database: Option<Database>,
}

async fn open_storage(config: &SyncConfig) -> SyncResult<Storage> {
    let backend = config.offline.backend;
    let path = config.queue_path()?;

    let storage = match (backend, path) {
        (QueueBackend::Sqlite, Some(path)) => {
            let database = Database::new(StoreConfig::new(path)).await?;
            if !database.health_check().await {
                return Err(SyncError::StorageError(
                    "queue database failed its health check".into(),
                ));
            }
            Storage {
                queue: Arc::new(database.offline_queue()),
                cursors: Arc::new(database.cursors()),
                database: Some(database),
            }
        }
        (QueueBackend::File, Some(path)) => {
            let cursor_path = path.with_extension("cursor.json");
            Storage {
                queue: Arc::new(JsonFileQueue::new(path)),
                cursors: Arc::new(JsonFileCursorStore::new(cursor_path)),
                database: None,
            }
        }
        (QueueBackend::Memory, _) => Storage {
            queue: Arc::new(MemoryQueue::new()),
            cursors: Arc::new(MemoryCursorStore::new()),
            database: None,
        },
        (backend, None) => {
            return Err(SyncError::InvalidConfig(format!(
                "Queue backend '{backend}' needs a path"
            )))
        }
    };

    info!(backend = %backend, "Offline storage opened");
    Ok(storage)
}

/// Every sync service, built once at startup.
pub struct SyncServices {
    config: SyncConfig,
    connection: ConnectionManager,
    offline: OfflineQueue,
    cache: Arc<QueryCache>,
    loader: PriorityLoader,
    orchestrator: SyncOrchestrator,
    network: NetworkMonitor,
    api: Arc<ApiClient>,
    database: Option<Database>,
    network_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SyncServices {
    /// Builds the services with the WebSocket connector from `config`.
    pub async fn build(config: SyncConfig, emitter: Arc<dyn SyncEventEmitter>) -> SyncResult<Self> {
        let connector = WsConnector::new(
            config.connection.url.clone(),
            config.token().map(str::to_string),
            config.connection.connect_timeout(),
        );
        Self::build_with_connector(config, emitter, Arc::new(connector)).await
    }

    /// Builds the services on a caller-supplied channel connector.
    pub async fn build_with_connector(
        config: SyncConfig,
        emitter: Arc<dyn SyncEventEmitter>,
        connector: Arc<dyn Connector>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let api = Arc::new(ApiClient::new(&config.api)?);
        let connection = ConnectionManager::new(connector, ConnectionConfig::from(&config.connection));

        let storage = open_storage(&config).await?;
        let offline = OfflineQueue::open(storage.queue, config.offline.max_retries, emitter.clone()).await?;
        let replay = Arc::new(RestReplayHandler::new(api.clone()));
        for action in OfflineAction::ALL {
            offline.register_handler(action, replay.clone());
        }

        let cache = Arc::new(QueryCache::from_settings(&config.cache));
        let loader = PriorityLoader::new(cache.clone(), &config.loader);

        let orchestrator = SyncOrchestrator::new(
            OrchestratorDeps {
                connection: connection.clone(),
                cache: cache.clone(),
                source: api.clone(),
                cursors: storage.cursors,
                emitter,
                offline: Some(offline.clone()),
            },
            config.sync.interval(),
        );

        Ok(SyncServices {
            config,
            connection,
            offline,
            cache,
            loader,
            orchestrator,
            network: NetworkMonitor::default(),
            api,
            database: storage.database,
            network_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.offline
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn loader(&self) -> &PriorityLoader {
        &self.loader
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Starts reconciliation, opens the channel and follows network changes.
    pub async fn start(&self) -> SyncResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }

        self.orchestrator.start().await?;
        self.offline.set_online(self.network.is_online());

        let mut changes = self.network.subscribe();
        let connection = self.connection.clone();
        let offline = self.offline.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                offline.set_online(online);
                if online {
                    connection.handle_back_online();
                }
            }
        });

        if let Some(previous) = lock(&self.network_task).replace(task) {
            previous.abort();
        }
        info!("Sync services started");
        Ok(())
    }

    /// Performs a write now when online; otherwise, or when the attempt fails
    /// with a retryable error, queues it for replay.
    pub async fn submit(&self, action: OfflineAction, payload: Value) -> SyncResult<SubmitOutcome> {
        if self.network.is_online() {
            match self.api.perform(action, &payload).await {
                Ok(()) => return Ok(SubmitOutcome::Sent),
                Err(e) if e.is_retryable() => {
                    warn!(%action, ?e, "Direct write failed, queueing for replay");
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(%action, "Offline, queueing write");
        }

        let item = self.offline.enqueue(action, payload).await?;
        Ok(SubmitOutcome::Queued(item))
    }

    /// Stops every background task and closes storage. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down sync services");
        if let Some(task) = lock(&self.network_task).take() {
            task.abort();
        }
        self.orchestrator.cleanup();
        self.loader.shutdown();
        self.offline.set_online(false);
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
