//! Process-level wiring.
//!
//! A [`Runtime`] owns everything the access service needs for the life of
//! the process: the connected stores, the cache store, and in cluster mode
//! the bus and its poller thread. It is created at startup and torn down
//! with [`Runtime::close`] or on drop.

use crate::cache::{Bus, CacheStore, LocalCache, SharedCache};
use crate::config::{Config, SharedCacheConfig};
use crate::error::{CoreError, CoreResult};
use crate::meta::MetaProvider;
use crate::service::EntityAccessService;
use entidal_storage::{SchemaReport, StoreRegistry};
use parking_lot::Mutex;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Background thread delivering bus events to local listeners.
struct Poller {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    fn spawn(
        bus: Arc<Bus>,
        shared: Arc<SharedCache>,
        service: Arc<EntityAccessService>,
        config: &SharedCacheConfig,
    ) -> CoreResult<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let interval = config.poll_interval;
        let ttl = config.message_ttl;
        let handle = std::thread::Builder::new()
            .name("entidal-bus".into())
            .spawn(move || {
                let mut last_prune = Instant::now();
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    deliver(&bus, &service);
                    if last_prune.elapsed() >= ttl {
                        last_prune = Instant::now();
                        match shared.prune(ttl) {
                            Ok(0) => {}
                            Ok(pruned) => debug!(pruned, "pruned bus messages"),
                            Err(err) => warn!(error = %err, "pruning bus messages failed"),
                        }
                    }
                }
                debug!("bus poller stopped");
            })
            .map_err(CoreError::cache)?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("bus poller panicked");
        }
    }
}

/// Dispatches pending bus events and returns how many were delivered.
fn deliver(bus: &Bus, service: &EntityAccessService) -> usize {
    let events = match bus.poll() {
        Ok(events) => events,
        Err(err) => {
            service.stats().record_cache_error();
            warn!(error = %err, "polling the bus failed");
            return 0;
        }
    };
    let mut delivered = 0;
    for event in &events {
        // Listener failures are already logged by the dispatcher.
        if service.dispatch_remote(event).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

/// The constructed runtime of one process.
pub struct Runtime {
    config: Config,
    stores: Arc<StoreRegistry>,
    service: Arc<EntityAccessService>,
    bus: Option<Arc<Bus>>,
    poller: Mutex<Option<Poller>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cluster", &self.config.cluster)
            .field("stores", &self.stores)
            .field("polling", &self.poller.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Connects the configured stores and builds the access service.
    ///
    /// In cluster mode the shared cache is opened, this process joins the
    /// bus, and a poller thread starts delivering other processes' events.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a store or the
    /// shared cache cannot be opened.
    pub fn open(config: Config, metas: Arc<dyn MetaProvider>) -> CoreResult<Self> {
        config.validate()?;
        let stores = Arc::new(StoreRegistry::connect(
            &config.document_stores,
            &config.relational_stores,
        )?);

        let cluster = match (&config.shared_cache, config.cluster) {
            (Some(shared_config), true) => {
                let shared = Arc::new(SharedCache::open(shared_config)?);
                let bus = Arc::new(Bus::join(Arc::clone(&shared))?);
                Some((shared_config, shared, bus))
            }
            _ => None,
        };

        let cache_store: Arc<dyn CacheStore> = match &cluster {
            Some((_, shared, _)) => Arc::clone(shared) as Arc<dyn CacheStore>,
            None => Arc::new(LocalCache::new()),
        };
        let mut service = EntityAccessService::new(metas, Arc::clone(&stores), cache_store, &config);
        if let Some((_, _, bus)) = &cluster {
            service = service.with_bus(Arc::clone(bus));
        }
        let service = Arc::new(service);

        let (bus, poller) = match cluster {
            Some((shared_config, shared, bus)) => {
                let poller = Poller::spawn(Arc::clone(&bus), shared, Arc::clone(&service), shared_config)?;
                (Some(bus), Some(poller))
            }
            None => (None, None),
        };

        info!(
            cluster = config.cluster,
            document_stores = config.document_stores.len(),
            relational_stores = config.relational_stores.len(),
            "runtime opened"
        );
        Ok(Self {
            config,
            stores,
            service,
            bus,
            poller: Mutex::new(poller),
        })
    }

    /// The access service.
    pub fn service(&self) -> &Arc<EntityAccessService> {
        &self.service
    }

    /// The configuration the runtime was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connected stores.
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    /// Whether this runtime shares its cache with other processes.
    pub fn is_cluster(&self) -> bool {
        self.bus.is_some()
    }

    /// Creates missing tables, columns and indexes for every entity.
    ///
    /// # Errors
    ///
    /// Returns an error if any entity's schema cannot be synced.
    pub fn sync_storage(&self) -> CoreResult<SchemaReport> {
        self.service.sync_schema()
    }

    /// Delivers pending bus events now instead of waiting for the poller.
    /// Returns how many listeners runs succeeded; 0 outside cluster mode.
    pub fn poll_bus(&self) -> usize {
        match &self.bus {
            Some(bus) => deliver(bus, &self.service),
            None => 0,
        }
    }

    /// Stops the poller and disconnects the stores. Safe to call twice.
    pub fn close(&self) {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.stop();
        }
        self.stores.disconnect();
        debug!("runtime closed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}
