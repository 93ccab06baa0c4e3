//! Traits and error types for the cluster configuration API.

use async_trait::async_trait;
use bytes::Bytes;
use data_types::{
    SnapshotPolicy, SnapshotPolicyId, Tenant, TenantId, TenantMembership, User, UserId,
    UserUpdate, Volume, VolumeId,
};
use snafu::Snafu;
use std::{fmt::Debug, sync::Arc};

/// Errors returned to callers of the configuration service. None of these
/// are retried anywhere in this crate; surfacing them is the caller's
/// signal to degrade or give up.
#[derive(Clone, Debug, Snafu)]
#[expect(missing_docs)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("remote unavailable: {descr}"))]
    RemoteUnavailable { descr: String },

    #[snafu(display("cluster not ready: {descr}"))]
    ClusterNotReady { descr: String },

    #[snafu(display("inconsistent data: {source}"))]
    InconsistentData {
        source: Arc<data_types::snapshot::Error>,
    },

    #[snafu(display("already exists: {descr}"))]
    AlreadyExists { descr: String },

    #[snafu(display("not found: {descr}"))]
    NotFound { descr: String },

    #[snafu(display("malformed request: {descr}"))]
    Malformed { descr: String },
}

impl From<data_types::snapshot::Error> for Error {
    fn from(e: data_types::snapshot::Error) -> Self {
        Self::InconsistentData {
            source: Arc::new(e),
        }
    }
}

/// Result type for the configuration service.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The remote cluster configuration service.
///
/// The read surface hands out full entity lists; there is no incremental
/// variant. [`current_version`](Self::current_version) returns the global
/// version counter that every committed mutation increments, which is the
/// only change-detection signal this API offers.
///
/// Mutations are validated remotely; validation failures come back as
/// [`Error::AlreadyExists`], [`Error::NotFound`] or [`Error::Malformed`]
/// and leave the remote version untouched.
#[async_trait]
pub trait ConfigService: Send + Sync + Debug {
    /// The global configuration version. Increments on every committed
    /// mutation, never decreases.
    async fn current_version(&self) -> Result<u64>;

    /// All user accounts.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// All tenants.
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Memberships of the given tenant.
    async fn list_tenant_members(&self, tenant_id: TenantId) -> Result<Vec<TenantMembership>>;

    /// All volumes.
    ///
    /// Fails with [`Error::ClusterNotReady`] while the cluster-level volume
    /// manager has no leader, which callers may treat as "no volumes yet".
    async fn list_volumes(&self) -> Result<Vec<Volume>>;

    /// All snapshot policies.
    async fn list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>>;

    /// Create a user account.
    async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        api_secret: &str,
        is_admin: bool,
    ) -> Result<User>;

    /// Apply a partial update to a user account.
    async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<User>;

    /// Create a tenant.
    async fn create_tenant(&self, name: &str) -> Result<Tenant>;

    /// Create a volume owned by `tenant_id`.
    async fn create_volume(
        &self,
        name: &str,
        tenant_id: TenantId,
        settings: Bytes,
    ) -> Result<Volume>;

    /// Delete a volume, detaching it from any snapshot policies.
    async fn delete_volume(&self, id: VolumeId) -> Result<()>;

    /// Add a user to a tenant.
    async fn assign_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()>;

    /// Remove a user from a tenant.
    async fn revoke_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()>;

    /// Create a snapshot policy with no attached volumes.
    async fn create_snapshot_policy(
        &self,
        name: &str,
        schedule: &str,
        retain_count: u32,
    ) -> Result<SnapshotPolicy>;

    /// Delete a snapshot policy.
    async fn delete_snapshot_policy(&self, id: SnapshotPolicyId) -> Result<()>;

    /// Attach a volume to a policy.
    async fn attach_volume_to_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()>;

    /// Detach a volume from a policy.
    async fn detach_volume_from_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()>;

    /// Name of the backing implementation, for logs.
    fn name(&self) -> &'static str;
}
