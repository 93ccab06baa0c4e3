//! In-memory implementation of the configuration service. Usable for
//! testing, or for single-node deployments running without a remote
//! configuration service.

use crate::interface::{ConfigService, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use data_types::{
    SnapshotPolicy, SnapshotPolicyId, Tenant, TenantId, TenantMembership, User, UserId,
    UserUpdate, Volume, VolumeId, VolumeState,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// In-memory configuration service.
///
/// Every successful mutation increments the version counter by exactly one;
/// failed mutations leave it untouched. Volume provisioning is collapsed to
/// a single step, so created volumes are immediately
/// [`Active`](VolumeState::Active).
#[derive(Default)]
pub struct MemConfigService {
    state: Arc<Mutex<MemState>>,
}

impl MemConfigService {
    /// The name of this service implementation.
    pub const NAME: &'static str = "memory";

    /// Create an empty service at version 0, with volume listing ready.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle readiness of the volume listing.
    ///
    /// While not ready, [`ConfigService::list_volumes`] fails with
    /// [`Error::ClusterNotReady`], mimicking a cluster whose volume manager
    /// has not elected a leader yet.
    pub fn set_cluster_ready(&self, ready: bool) {
        self.state.lock().cluster_ready = ready;
    }

    /// Insert a membership without validation and bump the version.
    ///
    /// Lets tests model a remote that hands out records with dangling
    /// references.
    #[cfg(test)]
    pub(crate) fn push_raw_membership(&self, membership: TenantMembership) {
        let mut stage = self.state.lock();
        stage.memberships.push(membership);
        stage.version += 1;
    }
}

impl std::fmt::Debug for MemConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemConfigService").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct MemState {
    version: u64,
    cluster_ready: bool,
    users: Vec<User>,
    tenants: Vec<Tenant>,
    memberships: Vec<TenantMembership>,
    volumes: Vec<Volume>,
    policies: Vec<SnapshotPolicy>,
    next_volume_id: i64,
    next_policy_id: i64,
}

impl Default for MemState {
    fn default() -> Self {
        Self {
            version: 0,
            cluster_ready: true,
            users: Default::default(),
            tenants: Default::default(),
            memberships: Default::default(),
            volumes: Default::default(),
            policies: Default::default(),
            next_volume_id: 1,
            next_policy_id: 1,
        }
    }
}

#[async_trait]
impl ConfigService for MemConfigService {
    async fn current_version(&self) -> Result<u64> {
        let stage = self.state.lock();

        Ok(stage.version)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let stage = self.state.lock();

        Ok(stage.users.clone())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let stage = self.state.lock();

        Ok(stage.tenants.clone())
    }

    async fn list_tenant_members(&self, tenant_id: TenantId) -> Result<Vec<TenantMembership>> {
        let stage = self.state.lock();

        // Unknown tenants yield an empty list.
        Ok(stage
            .memberships
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .copied()
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let stage = self.state.lock();

        if !stage.cluster_ready {
            return Err(Error::ClusterNotReady {
                descr: "volume manager has no leader".to_string(),
            });
        }
        Ok(stage.volumes.clone())
    }

    async fn list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>> {
        let stage = self.state.lock();

        Ok(stage.policies.clone())
    }

    async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        api_secret: &str,
        is_admin: bool,
    ) -> Result<User> {
        let mut stage = self.state.lock();

        if stage.users.iter().any(|u| u.login == login) {
            return Err(Error::AlreadyExists {
                descr: login.to_string(),
            });
        }

        let user = User {
            id: UserId::new(stage.users.len() as i64 + 1),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            api_secret: api_secret.to_string(),
            is_admin,
        };
        stage.users.push(user.clone());
        stage.version += 1;
        Ok(user)
    }

    async fn update_user(&self, id: UserId, update: UserUpdate) -> Result<User> {
        let mut stage = self.state.lock();

        match stage.users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                let UserUpdate {
                    password_hash,
                    api_secret,
                    is_admin,
                } = update;
                if let Some(password_hash) = password_hash {
                    user.password_hash = password_hash;
                }
                if let Some(api_secret) = api_secret {
                    user.api_secret = api_secret;
                }
                if let Some(is_admin) = is_admin {
                    user.is_admin = is_admin;
                }
                let user = user.clone();
                stage.version += 1;
                Ok(user)
            }
            None => Err(Error::NotFound {
                descr: id.to_string(),
            }),
        }
    }

    async fn create_tenant(&self, name: &str) -> Result<Tenant> {
        let mut stage = self.state.lock();

        if stage.tenants.iter().any(|t| t.name == name) {
            return Err(Error::AlreadyExists {
                descr: name.to_string(),
            });
        }

        let tenant = Tenant {
            id: TenantId::new(stage.tenants.len() as i64 + 1),
            name: name.to_string(),
        };
        stage.tenants.push(tenant.clone());
        stage.version += 1;
        Ok(tenant)
    }

    async fn create_volume(
        &self,
        name: &str,
        tenant_id: TenantId,
        settings: Bytes,
    ) -> Result<Volume> {
        let mut stage = self.state.lock();

        if stage.volumes.iter().any(|v| v.name == name) {
            return Err(Error::AlreadyExists {
                descr: name.to_string(),
            });
        }
        if !stage.tenants.iter().any(|t| t.id == tenant_id) {
            return Err(Error::NotFound {
                descr: tenant_id.to_string(),
            });
        }

        let volume = Volume {
            id: VolumeId::new(stage.next_volume_id),
            name: name.to_string(),
            tenant_id,
            state: VolumeState::Active,
            settings,
        };
        stage.next_volume_id += 1;
        stage.volumes.push(volume.clone());
        stage.version += 1;
        Ok(volume)
    }

    async fn delete_volume(&self, id: VolumeId) -> Result<()> {
        let mut stage = self.state.lock();

        match stage.volumes.iter().position(|v| v.id == id) {
            Some(idx) => {
                stage.volumes.remove(idx);
                for policy in &mut stage.policies {
                    policy.volume_ids.retain(|v| *v != id);
                }
                stage.version += 1;
                Ok(())
            }
            None => Err(Error::NotFound {
                descr: id.to_string(),
            }),
        }
    }

    async fn assign_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()> {
        let mut stage = self.state.lock();

        if !stage.tenants.iter().any(|t| t.id == tenant_id) {
            return Err(Error::NotFound {
                descr: tenant_id.to_string(),
            });
        }
        if !stage.users.iter().any(|u| u.id == user_id) {
            return Err(Error::NotFound {
                descr: user_id.to_string(),
            });
        }
        if stage
            .memberships
            .iter()
            .any(|m| m.tenant_id == tenant_id && m.user_id == user_id)
        {
            return Err(Error::AlreadyExists {
                descr: format!("user {user_id} in tenant {tenant_id}"),
            });
        }

        stage.memberships.push(TenantMembership { tenant_id, user_id });
        stage.version += 1;
        Ok(())
    }

    async fn revoke_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()> {
        let mut stage = self.state.lock();

        match stage
            .memberships
            .iter()
            .position(|m| m.tenant_id == tenant_id && m.user_id == user_id)
        {
            Some(idx) => {
                stage.memberships.remove(idx);
                stage.version += 1;
                Ok(())
            }
            None => Err(Error::NotFound {
                descr: format!("user {user_id} in tenant {tenant_id}"),
            }),
        }
    }

    async fn create_snapshot_policy(
        &self,
        name: &str,
        schedule: &str,
        retain_count: u32,
    ) -> Result<SnapshotPolicy> {
        let mut stage = self.state.lock();

        if stage.policies.iter().any(|p| p.name == name) {
            return Err(Error::AlreadyExists {
                descr: name.to_string(),
            });
        }

        let policy = SnapshotPolicy {
            id: SnapshotPolicyId::new(stage.next_policy_id),
            name: name.to_string(),
            schedule: schedule.to_string(),
            retain_count,
            volume_ids: vec![],
        };
        stage.next_policy_id += 1;
        stage.policies.push(policy.clone());
        stage.version += 1;
        Ok(policy)
    }

    async fn delete_snapshot_policy(&self, id: SnapshotPolicyId) -> Result<()> {
        let mut stage = self.state.lock();

        match stage.policies.iter().position(|p| p.id == id) {
            Some(idx) => {
                stage.policies.remove(idx);
                stage.version += 1;
                Ok(())
            }
            None => Err(Error::NotFound {
                descr: id.to_string(),
            }),
        }
    }

    async fn attach_volume_to_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()> {
        let mut stage = self.state.lock();

        if !stage.volumes.iter().any(|v| v.id == volume_id) {
            return Err(Error::NotFound {
                descr: volume_id.to_string(),
            });
        }
        match stage.policies.iter_mut().find(|p| p.id == policy_id) {
            Some(policy) => {
                if policy.volume_ids.contains(&volume_id) {
                    return Err(Error::AlreadyExists {
                        descr: format!("volume {volume_id} on policy {policy_id}"),
                    });
                }
                policy.volume_ids.push(volume_id);
                stage.version += 1;
                Ok(())
            }
            None => Err(Error::NotFound {
                descr: policy_id.to_string(),
            }),
        }
    }

    async fn detach_volume_from_policy(
        &self,
        policy_id: SnapshotPolicyId,
        volume_id: VolumeId,
    ) -> Result<()> {
        let mut stage = self.state.lock();

        match stage.policies.iter_mut().find(|p| p.id == policy_id) {
            Some(policy) => match policy.volume_ids.iter().position(|v| *v == volume_id) {
                Some(idx) => {
                    policy.volume_ids.remove(idx);
                    stage.version += 1;
                    Ok(())
                }
                None => Err(Error::NotFound {
                    descr: format!("volume {volume_id} on policy {policy_id}"),
                }),
            },
            None => Err(Error::NotFound {
                descr: policy_id.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
