//! Shared data types for the cluster configuration plane.
//!
//! These are the entities served by the remote configuration service and
//! cached by `config_cache`: user accounts, tenants, tenant memberships,
//! volumes and snapshot policies, plus the typed identifiers they key on.
#![warn(missing_docs)]

use bytes::Bytes;
use std::fmt::Display;

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

pub mod snapshot;

/// Unique ID for a [`User`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(i64);

#[expect(missing_docs)]
impl UserId {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique ID for a [`Tenant`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantId(i64);

#[expect(missing_docs)]
impl TenantId {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique ID for a [`Volume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId(i64);

#[expect(missing_docs)]
impl VolumeId {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique ID for a [`SnapshotPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotPolicyId(i64);

#[expect(missing_docs)]
impl SnapshotPolicyId {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl Display for SnapshotPolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A control-plane user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique id.
    pub id: UserId,
    /// Unique login name.
    pub login: String,
    /// Salted hash of the account password. Opaque to this layer.
    pub password_hash: String,
    /// Shared secret used to sign API requests.
    pub api_secret: String,
    /// Whether the account holds cluster-admin rights.
    pub is_admin: bool,
}

/// A partial update to a [`User`]. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    /// Replace the password hash.
    pub password_hash: Option<String>,
    /// Replace the API secret.
    pub api_secret: Option<String>,
    /// Grant or revoke admin rights.
    pub is_admin: Option<bool>,
}

/// A tenant owning volumes and holding user memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    /// Unique id.
    pub id: TenantId,
    /// Unique tenant name.
    pub name: String,
}

/// Membership of one user in one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantMembership {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The member.
    pub user_id: UserId,
}

/// Lifecycle state of a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeState {
    /// Being provisioned; not yet usable for I/O.
    Creating,
    /// Fully provisioned.
    Active,
    /// Tear-down in progress.
    Deleting,
}

impl Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

/// A storage volume owned by a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Unique id.
    pub id: VolumeId,
    /// Unique volume name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Lifecycle state.
    pub state: VolumeState,
    /// Replication / placement settings, owned by other subsystems and
    /// stored verbatim.
    pub settings: Bytes,
}

/// A snapshot schedule that volumes can be attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Unique id.
    pub id: SnapshotPolicyId,
    /// Unique policy name.
    pub name: String,
    /// Schedule expression, stored verbatim.
    pub schedule: String,
    /// How many snapshots to retain per attached volume.
    pub retain_count: u32,
    /// Volumes the policy applies to.
    pub volume_ids: Vec<VolumeId>,
}
