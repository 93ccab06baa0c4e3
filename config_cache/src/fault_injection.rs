//! Fault injection for testing purposes.

use crate::interface::{ConfigService, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use data_types::{
    SnapshotPolicy, SnapshotPolicyId, Tenant, TenantId, TenantMembership, User, UserId,
    UserUpdate, Volume, VolumeId,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

#[derive(Debug)]
struct Fault(Error);

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        fault.0
    }
}

type FaultResult = Result<(), Fault>;

#[derive(Debug, Default)]
struct PointState {
    results: Vec<FaultResult>,
    latency: Option<Duration>,
    calls: usize,
}

#[derive(Debug, Clone, Default)]
struct State(Arc<Mutex<HashMap<FaultPoint, PointState>>>);

impl State {
    async fn check(&self, point: FaultPoint) -> FaultResult {
        let (res, latency) = {
            let mut points = self.0.lock();
            let state = points.entry(point).or_default();
            state.calls += 1;
            let res = if state.results.is_empty() {
                Ok(())
            } else {
                state.results.remove(0)
            };
            (res, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        res
    }
}

/// A wrapper around an existing [`ConfigService`] that enables [Fault Injection]
///
/// Use [`set_result`](Self::set_result) to inject faults and
/// [`set_latency`](Self::set_latency) to slow individual calls down.
///
///
/// [Fault Injection]: https://en.wikipedia.org/wiki/Fault_injection
pub struct FaultConfigService {
    inner: Arc<dyn ConfigService>,
    state: State,
}

impl FaultConfigService {
    /// Create new fault wrapper with no faults.
    pub fn new(inner: Arc<dyn ConfigService>) -> Self {
        Self {
            inner,
            state: State::default(),
        }
    }

    /// Append result for a given fault point.
    ///
    /// Whenever a fault point is hit, a result is consumed.
    ///
    /// If a fault point has no results left, it just passes.
    pub fn set_result(&self, point: FaultPoint, res: Result<(), Error>) {
        self.state
            .0
            .lock()
            .entry(point)
            .or_default()
            .results
            .push(res.map_err(Fault));
    }

    /// Set artificial latency for a given fault point.
    ///
    /// Every traversal of the point sleeps for the given duration before
    /// resolving. Latency sticks until replaced.
    pub fn set_latency(&self, point: FaultPoint, latency: Duration) {
        self.state.0.lock().entry(point).or_default().latency = Some(latency);
    }

    /// Number of times a given fault point was traversed so far.
    pub fn calls(&self, point: FaultPoint) -> usize {
        self.state
            .0
            .lock()
            .get(&point)
            .map(|state| state.calls)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for FaultConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fault({:?})", self.inner)
    }
}

macro_rules! decorate {
    {
        methods = [$(
            $method:ident(
                &self $(,)?
                $($arg:ident : $t:ty),*
            ) -> Result<$out:ty>;
        )+] $(,)?
    } => {
        paste::paste! {
            /// Describe where to insert the fault.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum FaultPoint {
                $(
                    #[doc = "Fault before calling [`ConfigService::" $method "`]."]
                    [<$method:camel Pre>],

                    #[doc = "Fault after calling [`ConfigService::" $method "`]."]
                    [<$method:camel Post>],
                )+
            }

            #[async_trait]
            impl ConfigService for FaultConfigService {
                /// NOTE: if you're seeing an error here about "not all trait items
                /// implemented" or something similar, one or more methods are
                /// missing from / incorrectly defined in the decorate!() block
                /// below.

                $(
                    async fn $method(&self, $($arg : $t),*) -> Result<$out> {
                        self.state.check(FaultPoint::[<$method:camel Pre>]).await?;
                        let res = self.inner.$method($($arg),*).await;
                        self.state.check(FaultPoint::[<$method:camel Post>]).await?;
                        res
                    }
                )+

                fn name(&self) -> &'static str {
                    // faults are transparent, so forward the name of the service
                    // that does the real work
                    self.inner.name()
                }
            }
        }
    };
}

decorate! {
    methods = [
        current_version(&self) -> Result<u64>;
        list_users(&self) -> Result<Vec<User>>;
        list_tenants(&self) -> Result<Vec<Tenant>>;
        list_tenant_members(&self, tenant_id: TenantId) -> Result<Vec<TenantMembership>>;
        list_volumes(&self) -> Result<Vec<Volume>>;
        list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>>;
        create_user(&self, login: &str, password_hash: &str, api_secret: &str, is_admin: bool) -> Result<User>;
        update_user(&self, id: UserId, update: UserUpdate) -> Result<User>;
        create_tenant(&self, name: &str) -> Result<Tenant>;
        create_volume(&self, name: &str, tenant_id: TenantId, settings: Bytes) -> Result<Volume>;
        delete_volume(&self, id: VolumeId) -> Result<()>;
        assign_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()>;
        revoke_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<()>;
        create_snapshot_policy(&self, name: &str, schedule: &str, retain_count: u32) -> Result<SnapshotPolicy>;
        delete_snapshot_policy(&self, id: SnapshotPolicyId) -> Result<()>;
        attach_volume_to_policy(&self, policy_id: SnapshotPolicyId, volume_id: VolumeId) -> Result<()>;
        detach_volume_from_policy(&self, policy_id: SnapshotPolicyId, volume_id: VolumeId) -> Result<()>;
    ],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemConfigService;
    use assert_matches::assert_matches;
    use std::time::Instant;

    fn wrapped_mem() -> FaultConfigService {
        FaultConfigService::new(Arc::new(MemConfigService::new()))
    }

    #[tokio::test]
    async fn test_fault_injection_consumes_results() {
        let service = wrapped_mem();

        service.set_result(FaultPoint::CurrentVersionPre, Ok(()));
        service.set_result(
            FaultPoint::CurrentVersionPre,
            Err(Error::RemoteUnavailable {
                descr: "foo".to_owned(),
            }),
        );

        service.current_version().await.unwrap();
        assert_matches!(
            service.current_version().await.unwrap_err(),
            Error::RemoteUnavailable { .. }
        );

        // no results left
        service.current_version().await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_injection_pre_post() {
        let service = wrapped_mem();

        service.set_result(
            FaultPoint::CreateTenantPre,
            Err(Error::RemoteUnavailable {
                descr: "foo".to_owned(),
            }),
        );
        service.set_result(
            FaultPoint::CreateTenantPost,
            Err(Error::RemoteUnavailable {
                descr: "foo".to_owned(),
            }),
        );

        // pre: does NOT create
        assert_matches!(
            service.create_tenant("acme").await.unwrap_err(),
            Error::RemoteUnavailable { .. }
        );
        assert!(service.list_tenants().await.unwrap().is_empty());

        // post: DOES create
        assert_matches!(
            service.create_tenant("acme").await.unwrap_err(),
            Error::RemoteUnavailable { .. }
        );
        assert_eq!(service.list_tenants().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_latency_and_call_counting() {
        let service = wrapped_mem();

        assert_eq!(service.calls(FaultPoint::ListUsersPre), 0);
        service.set_latency(FaultPoint::ListUsersPre, Duration::from_millis(50));

        let start = Instant::now();
        service.list_users().await.unwrap();
        service.list_users().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        assert_eq!(service.calls(FaultPoint::ListUsersPre), 2);
        assert_eq!(service.calls(FaultPoint::ListUsersPost), 2);
        assert_eq!(service.calls(FaultPoint::ListVolumesPre), 0);
    }
}
