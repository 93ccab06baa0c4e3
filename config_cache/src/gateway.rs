//! Write path for cluster configuration.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use data_types::{
    SnapshotPolicy, SnapshotPolicyId, Tenant, TenantId, User, UserId, UserUpdate, Volume, VolumeId,
};
use metric::{DurationHistogram, Metric, U64Counter};
use observability_deps::tracing::debug;

use crate::cache::ConfigCache;
use crate::interface::{ConfigService, Result};

/// Add a cache invalidation to a [`Future`].
///
/// The invalidation runs only when the operation succeeded. A failed write
/// changed nothing remotely, so the cached snapshot still reflects a
/// consistent prior state, as if the write had never been attempted.
trait InvalidateExt {
    /// [OK](Result::Ok) output of the operation.
    type Out;

    /// Run the operation, then drop the cached snapshot on success.
    async fn invalidating(self, cache: &ConfigCache) -> Result<Self::Out>;
}

impl<F, T> InvalidateExt for F
where
    F: Future<Output = Result<T>> + Send,
    T: Send,
{
    type Out = T;

    async fn invalidating(self, cache: &ConfigCache) -> Result<Self::Out> {
        let out = self.await?;
        cache.invalidate();
        Ok(out)
    }
}

#[derive(Debug)]
struct MutationMetrics {
    count: Metric<U64Counter>,
    duration: Metric<DurationHistogram>,
}

impl MutationMetrics {
    fn new(registry: &metric::Registry) -> Self {
        Self {
            count: registry.register_metric::<U64Counter>(
                "config_mutation",
                "Number of mutations forwarded to the remote configuration service",
            ),
            duration: registry.register_metric::<DurationHistogram>(
                "config_mutation_duration",
                "Distribution of mutation latencies against the remote configuration service",
            ),
        }
    }

    fn record(&self, op: &'static str, ok: bool, duration: Duration) {
        let attributes = &[("op", op), ("result", if ok { "success" } else { "error" })];
        self.count.recorder(attributes).inc(1);
        self.duration.recorder(attributes).record(duration);
    }
}

/// Parameters for [`MutationGateway`].
#[derive(Debug)]
pub struct MutationGatewayParams {
    /// remote configuration service
    pub remote: Arc<dyn ConfigService>,

    /// cache to invalidate after successful writes
    pub cache: Arc<ConfigCache>,

    /// metrics registry
    pub metrics: Arc<metric::Registry>,
}

/// Gateway for all configuration writes.
///
/// Forwards each mutation to the remote service, matching its write surface
/// one-to-one. A successful write invalidates the [`ConfigCache`], making
/// the write visible to the very next read at the cost of a reload. A failed
/// write propagates unchanged and leaves the cache alone.
///
/// The gateway does not retry. Retry policy belongs to the caller.
#[derive(Debug)]
pub struct MutationGateway {
    remote: Arc<dyn ConfigService>,
    cache: Arc<ConfigCache>,
    metrics: MutationMetrics,
}

impl MutationGateway {
    /// Create new gateway.
    pub fn new(params: MutationGatewayParams) -> Self {
        let MutationGatewayParams {
            remote,
            cache,
            metrics,
        } = params;

        Self {
            remote,
            cache,
            metrics: MutationMetrics::new(&metrics),
        }
    }

    async fn run<F, T>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let res = fut.invalidating(&self.cache).await;
        self.metrics.record(op, res.is_ok(), start.elapsed());
        match &res {
            Ok(_) => debug!(op, "mutation applied"),
            Err(e) => debug!(op, %e, "mutation failed"),
        }
        res
    }

    /// Create a user.
    pub async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        api_secret: &str,
        is_admin: bool,
    ) -> Result<User> {
        self.run(
            "create_user",
            self.remote.create_user(login, password_hash, api_secret, is_admin),
        )
        .await
    }

    /// Update fields of an existing user.
    pub async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<User> {
        self.run("update_user", self.remote.update_user(id, update))
            .await
    }

    /// Create a tenant.
    pub async fn create_tenant(&self, name: &str) -> Result<Tenant> {
        self.run("create_tenant", self.remote.create_tenant(name)).await
    }

    /// Create a volume for a tenant.
    pub async fn create_volume(
        &self,
        name: &str,
        tenant_id: TenantId,
        settings: Bytes,
    ) -> Result<Volume> {
        self.run("create_volume", self.remote.create_volume(name, tenant_id, settings))
            .await
    }

    /// Delete a volume.
    pub async fn delete_volume(&self, id: VolumeId) -> Result<()> {
        self.run("delete_volume", self.remote.delete_volume(id)).await
    }

    /// Assign a user to a tenant.
    pub async fn assign_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()> {
        self.run("assign_user", self.remote.assign_user(tenant_id, user_id))
            .await
    }

    /// Revoke a user from a tenant.
    pub async fn revoke_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()> {
        self.run("revoke_user", self.remote.revoke_user(tenant_id, user_id))
            .await
    }

    /// Create a snapshot policy.
    pub async fn create_snapshot_policy(
        &self,
        name: &str,
        schedule: &str,
        retain_count: u32,
    ) -> Result<SnapshotPolicy> {
        self.run(
            "create_snapshot_policy",
            self.remote.create_snapshot_policy(name, schedule, retain_count),
        )
        .await
    }

    /// Delete a snapshot policy.
    pub async fn delete_snapshot_policy(&self, id: SnapshotPolicyId) -> Result<()> {
        self.run("delete_snapshot_policy", self.remote.delete_snapshot_policy(id))
            .await
    }

    /// Put a volume under a snapshot policy.
    pub async fn attach_volume_to_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()> {
        self.run(
            "attach_volume_to_policy",
            self.remote.attach_volume_to_policy(policy_id, volume_id),
        )
        .await
    }

    /// Remove a volume from a snapshot policy.
    pub async fn detach_volume_from_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()> {
        self.run(
            "detach_volume_from_policy",
            self.remote.detach_volume_from_policy(policy_id, volume_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ConfigCacheParams, DEFAULT_RPC_TIMEOUT};
    use crate::fault_injection::{FaultConfigService, FaultPoint};
    use crate::interface::Error;
    use crate::mem::MemConfigService;
    use assert_matches::assert_matches;
    use metric::Attributes;
    use test_helpers::maybe_start_logging;

    struct TestContext {
        mem: Arc<MemConfigService>,
        faults: Arc<FaultConfigService>,
        registry: Arc<metric::Registry>,
        cache: Arc<ConfigCache>,
        gateway: MutationGateway,
    }

    impl TestContext {
        fn new() -> Self {
            let mem = Arc::new(MemConfigService::new());
            let faults = Arc::new(FaultConfigService::new(
                Arc::clone(&mem) as Arc<dyn ConfigService>,
            ));
            let registry = Arc::new(metric::Registry::default());
            let cache = Arc::new(ConfigCache::new(ConfigCacheParams {
                remote: Arc::clone(&faults) as Arc<dyn ConfigService>,
                metrics: Arc::clone(&registry),
                rpc_timeout: DEFAULT_RPC_TIMEOUT,
            }));
            let gateway = MutationGateway::new(MutationGatewayParams {
                remote: Arc::clone(&faults) as Arc<dyn ConfigService>,
                cache: Arc::clone(&cache),
                metrics: Arc::clone(&registry),
            });

            Self {
                mem,
                faults,
                registry,
                cache,
                gateway,
            }
        }

        async fn populate(&self) -> u64 {
            self.cache.read(|s| s.version()).await.unwrap()
        }

        fn mutation_count(&self, op: &'static str, result: &'static str) -> u64 {
            self.registry
                .get_instrument::<Metric<U64Counter>>("config_mutation")
                .and_then(|m| m.get_observer(&Attributes::from(&[("op", op), ("result", result)])))
                .map(|counter| counter.fetch())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_successful_write_invalidates_and_becomes_visible() {
        maybe_start_logging();
        let ctx = TestContext::new();
        let tenant = ctx.mem.create_tenant("acme").await.unwrap();
        ctx.populate().await;
        assert!(ctx.cache.current_version().is_some());

        let volume = ctx
            .gateway
            .create_volume("vol-a", tenant.id, Bytes::from_static(b"replication=2"))
            .await
            .unwrap();
        assert_eq!(ctx.cache.current_version(), None);

        // the very next read observes the write through a fresh load
        let listed = ctx
            .cache
            .read(|s| s.volume_by_name("vol-a").cloned())
            .await
            .unwrap();
        assert_eq!(listed, Some(volume));
        assert_eq!(ctx.mutation_count("create_volume", "success"), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_snapshot() {
        maybe_start_logging();
        let ctx = TestContext::new();
        ctx.mem.create_tenant("acme").await.unwrap();
        let version = ctx.populate().await;
        let loads = ctx.faults.calls(FaultPoint::CurrentVersionPre);

        // rejected by the remote
        let err = ctx.gateway.create_tenant("acme").await.unwrap_err();
        assert_matches!(err, Error::AlreadyExists { .. });
        assert_eq!(ctx.cache.current_version(), Some(version));

        // failed on the wire
        ctx.faults.set_result(
            FaultPoint::CreateUserPre,
            Err(Error::RemoteUnavailable {
                descr: "injected".to_owned(),
            }),
        );
        let err = ctx
            .gateway
            .create_user("alice", "hash", "secret", false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "remote unavailable: injected");
        assert_eq!(ctx.cache.current_version(), Some(version));

        // reads keep hitting the cached snapshot, no reload happened
        ctx.cache.read(|s| s.version()).await.unwrap();
        assert_eq!(ctx.faults.calls(FaultPoint::CurrentVersionPre), loads);
        assert_eq!(ctx.mutation_count("create_tenant", "error"), 1);
        assert_eq!(ctx.mutation_count("create_user", "error"), 1);
    }

    #[tokio::test]
    async fn test_invalidating_ext() {
        let ctx = TestContext::new();
        ctx.populate().await;

        let out = async { Ok(7) }.invalidating(&ctx.cache).await.unwrap();
        assert_eq!(out, 7);
        assert_eq!(ctx.cache.current_version(), None);

        ctx.populate().await;
        let err = async {
            Err::<u64, _>(Error::NotFound {
                descr: "x".to_owned(),
            })
        }
        .invalidating(&ctx.cache)
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
        assert!(ctx.cache.current_version().is_some());
    }

    #[tokio::test]
    async fn test_gateway_covers_the_write_surface() {
        maybe_start_logging();
        let ctx = TestContext::new();

        let user = ctx
            .gateway
            .create_user("alice", "hash", "secret", false)
            .await
            .unwrap();
        let user = ctx
            .gateway
            .update_user(
                user.id,
                UserUpdate {
                    is_admin: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(user.is_admin);

        let tenant = ctx.gateway.create_tenant("acme").await.unwrap();
        ctx.gateway.assign_user(tenant.id, user.id).await.unwrap();

        let volume = ctx
            .gateway
            .create_volume("vol-a", tenant.id, Bytes::new())
            .await
            .unwrap();
        let policy = ctx
            .gateway
            .create_snapshot_policy("nightly", "0 2 * * *", 7)
            .await
            .unwrap();
        ctx.gateway
            .attach_volume_to_policy(policy.id, volume.id)
            .await
            .unwrap();

        // every mutation invalidated the cache again
        ctx.populate().await;
        let (users, members) = ctx
            .cache
            .read(|s| (s.users().len(), s.users_of_tenant(tenant.id).to_vec()))
            .await
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(members, vec![user.id]);

        ctx.gateway
            .detach_volume_from_policy(policy.id, volume.id)
            .await
            .unwrap();
        ctx.gateway.revoke_user(tenant.id, user.id).await.unwrap();
        ctx.gateway.delete_volume(volume.id).await.unwrap();
        ctx.gateway.delete_snapshot_policy(policy.id).await.unwrap();
        assert_eq!(ctx.cache.current_version(), None);

        let (volumes, policies, tenant_of_user) = ctx
            .cache
            .read(|s| (s.volumes().len(), s.policies().len(), s.tenant_of_user(user.id)))
            .await
            .unwrap();
        assert_eq!(volumes, 0);
        assert_eq!(policies, 0);
        assert_eq!(tenant_of_user, None);

        for op in [
            "create_user",
            "update_user",
            "create_tenant",
            "assign_user",
            "create_volume",
            "create_snapshot_policy",
            "attach_volume_to_policy",
            "detach_volume_from_policy",
            "revoke_user",
            "delete_volume",
            "delete_snapshot_policy",
        ] {
            assert_eq!(ctx.mutation_count(op, "success"), 1, "op: {op}");
        }
    }
}
