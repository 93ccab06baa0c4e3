//! Caching layer for cluster configuration reads.

mod loader;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use data_types::snapshot::ConfigSnapshot;
use metric::{DurationHistogram, U64Counter};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;

use crate::interface::{ConfigService, Error, Result};

use self::loader::LoadSlot;

/// Default deadline for a single remote call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound a remote call by the given deadline.
///
/// Running past the deadline is treated like any other failed RPC.
async fn bounded<F, T>(rpc_timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send,
{
    match tokio::time::timeout(rpc_timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::RemoteUnavailable {
            descr: format!("deadline ({rpc_timeout:?}) exceeded"),
        }),
    }
}

/// Deadline-bound lookup of the remote configuration version.
#[derive(Debug, Clone)]
pub(crate) struct VersionOracle {
    remote: Arc<dyn ConfigService>,
    rpc_timeout: Duration,
}

impl VersionOracle {
    pub(crate) fn new(remote: Arc<dyn ConfigService>, rpc_timeout: Duration) -> Self {
        Self {
            remote,
            rpc_timeout,
        }
    }

    /// Fetch the remote configuration version.
    ///
    /// No retries. Callers decide how to react to a failure.
    pub(crate) async fn current_version(&self) -> Result<u64> {
        bounded(self.rpc_timeout, self.remote.current_version()).await
    }
}

/// Assembles fresh, fully indexed configuration snapshots from the remote
/// service.
///
/// Every load re-fetches everything. There is no incremental path, snapshots
/// are only ever replaced wholesale.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotLoader {
    remote: Arc<dyn ConfigService>,
    rpc_timeout: Duration,
}

impl SnapshotLoader {
    pub(crate) fn new(remote: Arc<dyn ConfigService>, rpc_timeout: Duration) -> Self {
        Self {
            remote,
            rpc_timeout,
        }
    }

    /// Load a fresh snapshot.
    ///
    /// The version stamp is taken before any data is fetched, so a snapshot
    /// version is always at least as old as the data it describes.
    ///
    /// A remote whose volume listing is not ready yet yields a snapshot
    /// without volumes and snapshot policies instead of an error. User and
    /// tenant data must stay readable during cluster bootstrap.
    pub(crate) async fn load(&self) -> Result<ConfigSnapshot> {
        debug!("loading configuration");
        let version = bounded(self.rpc_timeout, self.remote.current_version()).await?;

        let users = bounded(self.rpc_timeout, self.remote.list_users()).await?;

        let tenants = bounded(self.rpc_timeout, self.remote.list_tenants()).await?;
        let mut memberships = Vec::new();
        for tenant in &tenants {
            let members = bounded(
                self.rpc_timeout,
                self.remote.list_tenant_members(tenant.id),
            )
            .await?;
            memberships.extend(members);
        }

        let (volumes, policies) = match bounded(self.rpc_timeout, self.remote.list_volumes()).await
        {
            Ok(volumes) => {
                let policies =
                    bounded(self.rpc_timeout, self.remote.list_snapshot_policies()).await?;
                (volumes, policies)
            }
            Err(Error::ClusterNotReady { descr }) => {
                warn!(
                    version,
                    %descr,
                    "volume listing not ready, loading without volumes and snapshot policies",
                );
                (vec![], vec![])
            }
            Err(e) => return Err(e),
        };

        debug!(
            version,
            users = users.len(),
            tenants = tenants.len(),
            memberships = memberships.len(),
            volumes = volumes.len(),
            policies = policies.len(),
            "loaded configuration",
        );

        Ok(ConfigSnapshot::new(
            version,
            users,
            tenants,
            memberships,
            volumes,
            policies,
        )?)
    }
}

#[derive(Debug, Clone)]
struct CacheMetric {
    count: U64Counter,
    duration: DurationHistogram,
}

impl CacheMetric {
    fn new(registry: &metric::Registry, op: &'static str, result: &'static str) -> Self {
        let count = registry.register_metric::<U64Counter>(
            "config_cache_op",
            "Number of operations against the cached configuration snapshot",
        );

        let duration = registry.register_metric::<DurationHistogram>(
            "config_cache_op_duration",
            "Distribution of operation latencies against the cached configuration snapshot",
        );

        let attributes = &[("op", op), ("result", result)];
        Self {
            count: count.recorder(attributes),
            duration: duration.recorder(attributes),
        }
    }

    fn record(&self, duration: Duration) {
        self.count.inc(1);
        self.duration.record(duration);
    }
}

#[derive(Debug, Clone)]
struct CacheMetrics {
    read_hit: CacheMetric,
    read_miss: CacheMetric,
    read_error: CacheMetric,
    load_success: CacheMetric,
    load_error: CacheMetric,
}

impl CacheMetrics {
    fn new(registry: &metric::Registry) -> Self {
        Self {
            read_hit: CacheMetric::new(registry, "read", "hit"),
            read_miss: CacheMetric::new(registry, "read", "miss"),
            read_error: CacheMetric::new(registry, "read", "error"),
            load_success: CacheMetric::new(registry, "load", "success"),
            load_error: CacheMetric::new(registry, "load", "error"),
        }
    }
}

/// Parameters for [`ConfigCache`].
#[derive(Debug)]
pub struct ConfigCacheParams {
    /// remote configuration service
    pub remote: Arc<dyn ConfigService>,

    /// metrics registry
    pub metrics: Arc<metric::Registry>,

    /// deadline for a single remote call
    pub rpc_timeout: Duration,
}

/// Single-slot cache for the cluster configuration snapshot.
///
/// The slot is either empty or holds one immutable [`ConfigSnapshot`].
/// Reads against a populated slot are a pointer clone under a short lock.
/// Reads against an empty slot trigger a load, and any number of concurrent
/// readers share exactly one load execution and observe its result, success
/// or failure alike.
///
/// A failed load leaves the slot empty. The next read starts over.
#[derive(Debug)]
pub struct ConfigCache {
    loader: SnapshotLoader,
    snapshot: Arc<Mutex<Option<Arc<ConfigSnapshot>>>>,
    load_slot: LoadSlot<Arc<ConfigSnapshot>>,
    metrics: CacheMetrics,
}

impl ConfigCache {
    /// Create new cache in the empty state.
    pub fn new(params: ConfigCacheParams) -> Self {
        let ConfigCacheParams {
            remote,
            metrics,
            rpc_timeout,
        } = params;

        Self {
            loader: SnapshotLoader::new(remote, rpc_timeout),
            snapshot: Arc::new(Mutex::new(None)),
            load_slot: LoadSlot::default(),
            metrics: CacheMetrics::new(&metrics),
        }
    }

    /// Run a projection against the configuration snapshot.
    ///
    /// Loads a snapshot first if the cache is empty.
    pub async fn read<F, T>(&self, project: F) -> Result<T>
    where
        F: FnOnce(&ConfigSnapshot) -> T + Send,
        T: Send,
    {
        let snapshot = self.snapshot().await?;
        Ok(project(&snapshot))
    }

    /// Get the current configuration snapshot, loading one if the cache is
    /// empty.
    pub async fn snapshot(&self) -> Result<Arc<ConfigSnapshot>> {
        let start = Instant::now();

        let cached = self.snapshot.lock().clone();
        if let Some(snapshot) = cached {
            debug!(version = snapshot.version(), status = "HIT", "read");
            self.metrics.read_hit.record(start.elapsed());
            return Ok(snapshot);
        }
        debug!(status = "MISS", "read");

        let res = self.load().await;
        match &res {
            Ok(_) => self.metrics.read_miss.record(start.elapsed()),
            Err(_) => self.metrics.read_error.record(start.elapsed()),
        }
        res
    }

    /// Version of the cached snapshot, or [`None`] if the cache is empty.
    pub fn current_version(&self) -> Option<u64> {
        self.snapshot.lock().as_ref().map(|s| s.version())
    }

    /// Drop the cached snapshot, so the next read loads a fresh one.
    ///
    /// Idempotent. Does not trigger a reload by itself and does not cancel
    /// an in-flight load, which still installs its result on completion.
    pub fn invalidate(&self) {
        *self.snapshot.lock() = None;
        debug!("invalidated configuration cache");
    }

    /// Load a snapshot and install it, deduplicating concurrent loads.
    ///
    /// The installation happens inside the shared load, so every waiter
    /// wakes up to a populated cache.
    async fn load(&self) -> Result<Arc<ConfigSnapshot>> {
        let loader = self.loader.clone();
        let slot = Arc::clone(&self.snapshot);
        let metrics = self.metrics.clone();

        let fut = async move {
            let start = Instant::now();
            match loader.load().await {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    *slot.lock() = Some(Arc::clone(&snapshot));
                    metrics.load_success.record(start.elapsed());
                    Ok(snapshot)
                }
                Err(e) => {
                    metrics.load_error.record(start.elapsed());
                    warn!(%e, "configuration load failed");
                    Err(e)
                }
            }
        };

        self.load_slot.load(fut).await
    }
}
