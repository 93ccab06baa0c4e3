//! A point-in-time snapshot of the whole cluster configuration.

use snafu::Snafu;
use std::collections::{HashMap, HashSet};

use crate::{
    SnapshotPolicy, SnapshotPolicyId, Tenant, TenantId, TenantMembership, User, UserId, Volume,
    VolumeId,
};

/// Error for [`ConfigSnapshot`]
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Duplicate key: {descr}"))]
    DuplicateKey { descr: String },

    #[snafu(display("Missing reference: {descr}"))]
    MissingReference { descr: String },
}

/// Result for [`ConfigSnapshot`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An immutable snapshot of the complete cluster configuration, stamped with
/// the remote version observed before its data was fetched.
///
/// All lookup indexes are derived at construction time in one pass; a value
/// of this type is either fully indexed and cross-reference checked, or was
/// never created. Consumers hold it behind an `Arc` and never see it change.
#[derive(Debug)]
pub struct ConfigSnapshot {
    version: u64,

    users: Vec<User>,
    tenants: Vec<Tenant>,
    memberships: Vec<TenantMembership>,
    volumes: Vec<Volume>,
    policies: Vec<SnapshotPolicy>,

    // Indexes store positions into the record vectors above.
    user_by_id: HashMap<UserId, usize>,
    user_by_login: HashMap<String, usize>,
    tenant_by_id: HashMap<TenantId, usize>,
    tenant_by_name: HashMap<String, usize>,
    users_by_tenant: HashMap<TenantId, Vec<UserId>>,
    tenant_by_user: HashMap<UserId, TenantId>,
    volume_by_id: HashMap<VolumeId, usize>,
    volume_by_name: HashMap<String, usize>,
    policy_by_id: HashMap<SnapshotPolicyId, usize>,
    policy_by_name: HashMap<String, usize>,
}

impl ConfigSnapshot {
    /// Build a snapshot from the raw record lists fetched from the remote,
    /// deriving every index and validating cross-references.
    ///
    /// Entity ids and names must be unique within their list. Memberships
    /// must reference known users and tenants, volumes a known tenant, and
    /// policy attachments a known volume. A user appearing in several
    /// memberships is permitted; the membership latest in list order wins
    /// in [`Self::tenant_of_user`].
    pub fn new(
        version: u64,
        users: Vec<User>,
        tenants: Vec<Tenant>,
        memberships: Vec<TenantMembership>,
        volumes: Vec<Volume>,
        policies: Vec<SnapshotPolicy>,
    ) -> Result<Self> {
        let mut user_by_id = HashMap::with_capacity(users.len());
        let mut user_by_login = HashMap::with_capacity(users.len());
        for (idx, user) in users.iter().enumerate() {
            if user_by_id.insert(user.id, idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("user id {}", user.id),
                }
                .fail();
            }
            if user_by_login.insert(user.login.clone(), idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("user login {}", user.login),
                }
                .fail();
            }
        }

        let mut tenant_by_id = HashMap::with_capacity(tenants.len());
        let mut tenant_by_name = HashMap::with_capacity(tenants.len());
        for (idx, tenant) in tenants.iter().enumerate() {
            if tenant_by_id.insert(tenant.id, idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("tenant id {}", tenant.id),
                }
                .fail();
            }
            if tenant_by_name.insert(tenant.name.clone(), idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("tenant name {}", tenant.name),
                }
                .fail();
            }
        }

        let mut users_by_tenant: HashMap<TenantId, Vec<UserId>> = HashMap::new();
        let mut tenant_by_user = HashMap::new();
        let mut seen = HashSet::with_capacity(memberships.len());
        for membership in &memberships {
            if !tenant_by_id.contains_key(&membership.tenant_id) {
                return MissingReferenceSnafu {
                    descr: format!(
                        "membership references unknown tenant {}",
                        membership.tenant_id
                    ),
                }
                .fail();
            }
            if !user_by_id.contains_key(&membership.user_id) {
                return MissingReferenceSnafu {
                    descr: format!("membership references unknown user {}", membership.user_id),
                }
                .fail();
            }
            if seen.insert((membership.tenant_id, membership.user_id)) {
                users_by_tenant
                    .entry(membership.tenant_id)
                    .or_default()
                    .push(membership.user_id);
            }
            // Last write wins for the scalar reverse mapping.
            tenant_by_user.insert(membership.user_id, membership.tenant_id);
        }

        let mut volume_by_id = HashMap::with_capacity(volumes.len());
        let mut volume_by_name = HashMap::with_capacity(volumes.len());
        for (idx, volume) in volumes.iter().enumerate() {
            if volume_by_id.insert(volume.id, idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("volume id {}", volume.id),
                }
                .fail();
            }
            if volume_by_name.insert(volume.name.clone(), idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("volume name {}", volume.name),
                }
                .fail();
            }
            if !tenant_by_id.contains_key(&volume.tenant_id) {
                return MissingReferenceSnafu {
                    descr: format!(
                        "volume {} references unknown tenant {}",
                        volume.name, volume.tenant_id
                    ),
                }
                .fail();
            }
        }

        let mut policy_by_id = HashMap::with_capacity(policies.len());
        let mut policy_by_name = HashMap::with_capacity(policies.len());
        for (idx, policy) in policies.iter().enumerate() {
            if policy_by_id.insert(policy.id, idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("snapshot policy id {}", policy.id),
                }
                .fail();
            }
            if policy_by_name.insert(policy.name.clone(), idx).is_some() {
                return DuplicateKeySnafu {
                    descr: format!("snapshot policy name {}", policy.name),
                }
                .fail();
            }
            for volume_id in &policy.volume_ids {
                if !volume_by_id.contains_key(volume_id) {
                    return MissingReferenceSnafu {
                        descr: format!(
                            "snapshot policy {} references unknown volume {}",
                            policy.name, volume_id
                        ),
                    }
                    .fail();
                }
            }
        }

        Ok(Self {
            version,
            users,
            tenants,
            memberships,
            volumes,
            policies,
            user_by_id,
            user_by_login,
            tenant_by_id,
            tenant_by_name,
            users_by_tenant,
            tenant_by_user,
            volume_by_id,
            volume_by_name,
            policy_by_id,
            policy_by_name,
        })
    }

    /// The remote configuration version this snapshot was stamped with.
    ///
    /// The stamp was taken before any data was fetched, so it can only
    /// under-report: a concurrent mutation makes the snapshot look older
    /// than it is and triggers a spurious refresh, never a missed one.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a user by id.
    pub fn user_by_id(&self, id: UserId) -> Option<&User> {
        self.user_by_id.get(&id).map(|idx| &self.users[*idx])
    }

    /// Look up a user by login name.
    pub fn user_by_login(&self, login: &str) -> Option<&User> {
        self.user_by_login.get(login).map(|idx| &self.users[*idx])
    }

    /// Look up a tenant by id.
    pub fn tenant_by_id(&self, id: TenantId) -> Option<&Tenant> {
        self.tenant_by_id.get(&id).map(|idx| &self.tenants[*idx])
    }

    /// Look up a tenant by name.
    pub fn tenant_by_name(&self, name: &str) -> Option<&Tenant> {
        self.tenant_by_name.get(name).map(|idx| &self.tenants[*idx])
    }

    /// All member users of a tenant, in membership list order, deduplicated.
    pub fn users_of_tenant(&self, id: TenantId) -> &[UserId] {
        self.users_by_tenant
            .get(&id)
            .map(|users| users.as_slice())
            .unwrap_or_default()
    }

    /// The tenant a user belongs to.
    ///
    /// When memberships place a user in several tenants, the membership
    /// latest in list order wins.
    pub fn tenant_of_user(&self, id: UserId) -> Option<TenantId> {
        self.tenant_by_user.get(&id).copied()
    }

    /// Look up a volume by id.
    pub fn volume_by_id(&self, id: VolumeId) -> Option<&Volume> {
        self.volume_by_id.get(&id).map(|idx| &self.volumes[*idx])
    }

    /// Look up a volume by name.
    pub fn volume_by_name(&self, name: &str) -> Option<&Volume> {
        self.volume_by_name.get(name).map(|idx| &self.volumes[*idx])
    }

    /// Look up a snapshot policy by id.
    pub fn policy_by_id(&self, id: SnapshotPolicyId) -> Option<&SnapshotPolicy> {
        self.policy_by_id.get(&id).map(|idx| &self.policies[*idx])
    }

    /// Look up a snapshot policy by name.
    pub fn policy_by_name(&self, name: &str) -> Option<&SnapshotPolicy> {
        self.policy_by_name.get(name).map(|idx| &self.policies[*idx])
    }

    /// All users, in fetch order.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// All tenants, in fetch order.
    pub fn tenants(&self) -> &[Tenant] {
        &self.tenants
    }

    /// All memberships, in fetch order.
    pub fn memberships(&self) -> &[TenantMembership] {
        &self.memberships
    }

    /// All volumes, in fetch order.
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// All snapshot policies, in fetch order.
    pub fn policies(&self) -> &[SnapshotPolicy] {
        &self.policies
    }
}
