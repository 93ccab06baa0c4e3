//! Background staleness detection for the configuration cache.

use std::{fmt::Debug, sync::Arc, time::Duration};

use metric::DurationHistogram;
use observability_deps::tracing::*;
use snafu::prelude::*;
use tokio::{
    select,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::cache::{ConfigCache, DEFAULT_RPC_TIMEOUT, VersionOracle};
use crate::interface::{self, ConfigService};

/// Default time between two version polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Parameters for [`Refresher`].
#[derive(Debug)]
pub struct RefresherParams {
    /// cache to keep fresh
    pub cache: Arc<ConfigCache>,

    /// remote configuration service
    pub remote: Arc<dyn ConfigService>,

    /// metrics registry
    pub metrics: Arc<metric::Registry>,

    /// time between two version polls
    pub poll_interval: Duration,

    /// deadline for a single remote call
    pub rpc_timeout: Duration,
}

impl RefresherParams {
    /// Parameters with the default poll cadence and remote call deadline.
    pub fn new(
        cache: Arc<ConfigCache>,
        remote: Arc<dyn ConfigService>,
        metrics: Arc<metric::Registry>,
    ) -> Self {
        Self {
            cache,
            remote,
            metrics,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Background task that bounds how long the [`ConfigCache`] serves a stale
/// snapshot.
///
/// Periodically polls the remote configuration version and invalidates the
/// cache when it differs from the cached snapshot version. The refresher
/// never loads a snapshot itself. Reloading stays with the readers' single
/// coalesced load path, and an empty cache is left alone entirely.
pub struct Refresher {
    shutdown: CancellationToken,
    poll_loop: tokio::task::JoinHandle<()>,
}

impl Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher").finish_non_exhaustive()
    }
}

impl Refresher {
    /// Construct the refresher and start polling.
    pub fn start(params: RefresherParams) -> Self {
        let RefresherParams {
            cache,
            remote,
            metrics,
            poll_interval,
            rpc_timeout,
        } = params;

        info!(?poll_interval, remote = remote.name(), "refresher starting");

        let shutdown = CancellationToken::new();
        let oracle = VersionOracle::new(remote, rpc_timeout);
        let poll_loop = tokio::spawn(perform(
            metrics,
            shutdown.clone(),
            cache,
            oracle,
            poll_interval,
        ));

        Self {
            shutdown,
            poll_loop,
        }
    }

    /// A handle to gracefully shutdown the refresher when invoked
    pub fn shutdown_handle(&self) -> impl Fn() {
        let shutdown = self.shutdown.clone();
        move || {
            shutdown.cancel();
        }
    }

    /// Wait for the refresher to finish work
    pub async fn join(self) -> Result<()> {
        let Self {
            shutdown: _,
            poll_loop,
        } = self;

        poll_loop.await.context(PollLoopPanicSnafu)?;
        Ok(())
    }
}

// Metrics for the version poll loop
struct RefreshMetrics {
    // Track how long successful polls take
    runtime_success_duration: DurationHistogram,

    // Track how long failed polls take
    runtime_error_duration: DurationHistogram,
}

impl RefreshMetrics {
    fn new(metric_registry: &metric::Registry) -> Self {
        let refresh_runtime = metric_registry.register_metric::<DurationHistogram>(
            "config_refresh_runtime",
            "Configuration version poll runtimes, bucketed by success/failure.",
        );

        Self {
            runtime_success_duration: refresh_runtime.recorder(&[("result", "success")]),
            runtime_error_duration: refresh_runtime.recorder(&[("result", "error")]),
        }
    }
}

async fn perform(
    metric_registry: Arc<metric::Registry>,
    shutdown: CancellationToken,
    cache: Arc<ConfigCache>,
    oracle: VersionOracle,
    poll_interval: Duration,
) {
    let metrics = RefreshMetrics::new(&metric_registry);

    loop {
        let start = Instant::now();
        match poll_once(&cache, &oracle).await {
            Ok(()) => metrics.runtime_success_duration.record(start.elapsed()),
            Err(e) => {
                metrics.runtime_error_duration.record(start.elapsed());
                warn!(
                    "error polling the remote configuration version, \
                    keeping the cached snapshot: {e}"
                );
            }
        }

        select! {
            _ = shutdown.cancelled() => {
                break
            },
            _ = sleep(poll_interval) => (),
        }
    }
}

/// A single staleness check.
///
/// An empty cache has nothing to keep fresh, the next read loads lazily.
async fn poll_once(cache: &ConfigCache, oracle: &VersionOracle) -> interface::Result<()> {
    let Some(cached) = cache.current_version() else {
        return Ok(());
    };

    let remote = oracle.current_version().await?;
    if remote == cached {
        debug!(cached, "configuration version unchanged");
    } else {
        info!(cached, remote, "configuration version changed, invalidating");
        cache.invalidate();
    }
    Ok(())
}

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("The refresher poll loop panicked: {source}"))]
    PollLoopPanic { source: tokio::task::JoinError },
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ConfigCacheParams, DEFAULT_RPC_TIMEOUT};
    use crate::fault_injection::{FaultConfigService, FaultPoint};
    use crate::interface::Error as ConfigError;
    use crate::mem::MemConfigService;
    use test_helpers::maybe_start_logging;

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    struct TestContext {
        mem: Arc<MemConfigService>,
        faults: Arc<FaultConfigService>,
        registry: Arc<metric::Registry>,
        cache: Arc<ConfigCache>,
    }

    impl TestContext {
        fn new() -> Self {
            Self::with_rpc_timeout(DEFAULT_RPC_TIMEOUT)
        }

        fn with_rpc_timeout(rpc_timeout: Duration) -> Self {
            let mem = Arc::new(MemConfigService::new());
            let faults = Arc::new(FaultConfigService::new(
                Arc::clone(&mem) as Arc<dyn ConfigService>,
            ));
            let registry = Arc::new(metric::Registry::default());
            let cache = Arc::new(ConfigCache::new(ConfigCacheParams {
                remote: Arc::clone(&faults) as Arc<dyn ConfigService>,
                metrics: Arc::clone(&registry),
                rpc_timeout,
            }));

            Self {
                mem,
                faults,
                registry,
                cache,
            }
        }

        fn start_refresher(&self, rpc_timeout: Duration) -> Refresher {
            Refresher::start(RefresherParams {
                poll_interval: POLL_INTERVAL,
                rpc_timeout,
                ..RefresherParams::new(
                    Arc::clone(&self.cache),
                    Arc::clone(&self.faults) as Arc<dyn ConfigService>,
                    Arc::clone(&self.registry),
                )
            })
        }

        async fn populate(&self) -> u64 {
            self.cache.read(|s| s.version()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_invalidates_once_when_version_changes() {
        maybe_start_logging();
        let ctx = TestContext::new();
        ctx.mem.create_tenant("acme").await.unwrap();
        let before = ctx.populate().await;

        let refresher = ctx.start_refresher(DEFAULT_RPC_TIMEOUT);

        // equal versions leave the snapshot in place
        sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.cache.current_version(), Some(before));

        // a remote mutation is noticed within a few poll intervals
        ctx.mem.create_tenant("initech").await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(ctx.cache.current_version(), None);

        // the now-empty cache is not polled again until someone reads
        let polls = ctx.faults.calls(FaultPoint::CurrentVersionPre);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.faults.calls(FaultPoint::CurrentVersionPre), polls);

        // the next read reloads and polling resumes without invalidating
        let after = ctx.populate().await;
        assert!(after > before);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.cache.current_version(), Some(after));

        refresher.shutdown_handle()();
        refresher.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_keeps_snapshot_when_remote_unavailable() {
        maybe_start_logging();
        let ctx = TestContext::with_rpc_timeout(Duration::from_millis(50));
        ctx.mem.create_tenant("acme").await.unwrap();
        let before = ctx.populate().await;
        let polls_before = ctx.faults.calls(FaultPoint::CurrentVersionPre);

        // every poll now runs past the deadline
        ctx.faults
            .set_latency(FaultPoint::CurrentVersionPre, Duration::from_millis(200));

        let refresher = ctx.start_refresher(Duration::from_millis(50));
        sleep(Duration::from_millis(400)).await;

        // stale-but-available, and the loop kept going
        assert_eq!(ctx.cache.current_version(), Some(before));
        assert!(ctx.faults.calls(FaultPoint::CurrentVersionPre) > polls_before + 1);

        // a healed remote with a newer version is noticed again
        ctx.faults
            .set_latency(FaultPoint::CurrentVersionPre, Duration::ZERO);
        ctx.mem.create_tenant("initech").await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(ctx.cache.current_version(), None);

        refresher.shutdown_handle()();
        refresher.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_poll_failure_does_not_invalidate() {
        maybe_start_logging();
        let ctx = TestContext::new();
        ctx.mem.create_tenant("acme").await.unwrap();
        let before = ctx.populate().await;
        ctx.faults.set_result(
            FaultPoint::CurrentVersionPre,
            Err(ConfigError::RemoteUnavailable {
                descr: "injected".to_owned(),
            }),
        );

        let refresher = ctx.start_refresher(DEFAULT_RPC_TIMEOUT);
        sleep(Duration::from_millis(300)).await;

        // the one failed poll was logged and skipped, later polls see an
        // unchanged version
        assert_eq!(ctx.cache.current_version(), Some(before));
        assert!(ctx.faults.calls(FaultPoint::CurrentVersionPre) > 2);

        refresher.shutdown_handle()();
        refresher.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_cache_is_not_polled() {
        maybe_start_logging();
        let ctx = TestContext::new();
        ctx.mem.create_tenant("acme").await.unwrap();
        assert_eq!(ctx.cache.current_version(), None);

        let refresher = ctx.start_refresher(DEFAULT_RPC_TIMEOUT);
        sleep(Duration::from_millis(300)).await;

        // no version polls and, in particular, no loads
        assert_eq!(ctx.faults.calls(FaultPoint::CurrentVersionPre), 0);
        assert_eq!(ctx.faults.calls(FaultPoint::ListUsersPre), 0);
        assert_eq!(ctx.cache.current_version(), None);

        refresher.shutdown_handle()();
        refresher.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        maybe_start_logging();
        let ctx = TestContext::new();
        ctx.mem.create_tenant("acme").await.unwrap();
        ctx.populate().await;

        let refresher = ctx.start_refresher(DEFAULT_RPC_TIMEOUT);
        sleep(Duration::from_millis(150)).await;

        refresher.shutdown_handle()();
        refresher.join().await.unwrap();

        let polls = ctx.faults.calls(FaultPoint::CurrentVersionPre);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.faults.calls(FaultPoint::CurrentVersionPre), polls);
    }

    #[test]
    fn test_default_params() {
        let ctx = TestContext::new();
        let params = RefresherParams::new(
            Arc::clone(&ctx.cache),
            Arc::clone(&ctx.faults) as Arc<dyn ConfigService>,
            Arc::clone(&ctx.registry),
        );
        assert_eq!(params.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(params.rpc_timeout, DEFAULT_RPC_TIMEOUT);
    }
}
