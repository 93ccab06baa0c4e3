use futures::future::Shared;
use futures::{ready, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

use crate::interface::{Error, Result};

type SlotState<V> = Mutex<Option<Shared<TaskFuture<V>>>>;

/// Spawns a load to tokio and allows multiple readers to wait on its result.
///
/// At most one load is tracked at a time, and only while it is running.
/// Starting a load while another one is in flight joins the running load
/// instead of spawning a new one, so any number of concurrent readers
/// produce exactly one execution.
///
/// A finished load leaves the slot the moment it completes, success or
/// failure alike. Later readers spawn a fresh load instead of being handed
/// a result that predates them, no matter how long earlier readers keep
/// their futures around.
#[derive(Debug)]
pub(crate) struct LoadSlot<V: Clone + Send> {
    state: Arc<SlotState<V>>,
}

impl<V: Clone + Send> Default for LoadSlot<V> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> LoadSlot<V> {
    /// Load a new value.
    ///
    /// If there is no in-progress load, will spawn `fut` and await its
    /// completion. Otherwise `fut` is dropped unpolled and the in-progress
    /// load is awaited instead.
    pub(crate) fn load<Fut>(&self, fut: Fut) -> LoadFuture<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut guard = self.state.lock();
        if let Some(task) = guard.as_ref() {
            return LoadFuture { fut: task.clone() };
        }

        let registration = Registration(Arc::downgrade(&self.state));
        let task = TaskFuture(tokio::spawn(async move {
            // dropped on the way out, panics included
            let _registration = registration;
            fut.await
        }))
        .shared();
        *guard = Some(task.clone());
        LoadFuture { fut: task }
    }
}

/// Future returned by [`LoadSlot`]
pub(crate) struct LoadFuture<V: Clone + Send> {
    fut: Shared<TaskFuture<V>>,
}

impl<V: Clone + Send> Future for LoadFuture<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.poll_unpin(cx)
    }
}

/// Registration of the running load, removed when the load finishes.
///
/// The spawned task drops this as its last action, before its result
/// becomes observable through the shared handles, so readers only ever
/// join a load that is still running.
struct Registration<V: Clone + Send>(Weak<SlotState<V>>);

impl<V: Clone + Send> Drop for Registration<V> {
    fn drop(&mut self) {
        if let Some(state) = self.0.upgrade() {
            *state.lock() = None;
        }
    }
}

/// The future spawned by [`LoadSlot`] to the tokio threadpool
#[derive(Debug)]
struct TaskFuture<V>(JoinHandle<Result<V>>);

impl<V> Future for TaskFuture<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(match ready!(self.0.poll_unpin(cx)) {
            Ok(res) => res,
            Err(e) => Err(Error::RemoteUnavailable {
                descr: format!("load task failed: {e}"),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::{join, try_join};
    use std::time::Duration;

    async fn panic_fut() -> Result<u64> {
        panic!("should deduplicate")
    }

    async fn ok_fut(version: u64) -> Result<u64> {
        Ok(version)
    }

    async fn err_fut() -> Result<u64> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Err(Error::RemoteUnavailable {
            descr: "test".to_string(),
        })
    }

    #[tokio::test]
    async fn test_load_slot() {
        let slot = LoadSlot::default();

        // Two loads should be deduplicated
        let v1 = slot.load(ok_fut(0));
        let v2 = slot.load(panic_fut());

        let (v1, v2) = try_join!(v1, v2).unwrap();
        assert_eq!(v1, v2);

        // Once the load completed the slot is open for a fresh one
        let v1 = slot.load(ok_fut(1)).await.unwrap();
        assert_eq!(v1, 1);

        // Dropping first waiter shouldn't impact second waiting on its computation
        let v1 = slot.load(ok_fut(2));
        let v2 = slot.load(panic_fut());

        drop(v1);
        let v = v2.await.unwrap();
        assert_eq!(v, 2);

        // Should deduplicate errors
        let v1 = slot.load(err_fut());
        let v2 = slot.load(panic_fut());

        let (v1, v2) = join!(v1, v2);
        assert_eq!(v1.unwrap_err().to_string(), "remote unavailable: test");
        assert_eq!(v2.unwrap_err().to_string(), "remote unavailable: test");
    }

    #[tokio::test]
    async fn test_finished_load_leaves_the_slot() {
        let slot = LoadSlot::default();

        // a waiter that holds on to its future well past completion
        let parked = slot.load(ok_fut(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // the finished load is gone, so this spawns fresh instead of
        // joining the stale result
        let v = slot.load(ok_fut(2)).await.unwrap();
        assert_eq!(v, 2);

        // the parked waiter still observes the result of its own load
        assert_eq!(parked.await.unwrap(), 1);

        // failed loads leave the slot the same way
        let parked = slot.load(err_fut());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let v = slot.load(ok_fut(3)).await.unwrap();
        assert_eq!(v, 3);
        assert_matches!(parked.await, Err(Error::RemoteUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_panicked_load_frees_the_slot() {
        let slot: LoadSlot<u64> = LoadSlot::default();

        let res = slot.load(panic_fut()).await;
        assert_matches!(res, Err(Error::RemoteUnavailable { .. }));

        let v = slot.load(ok_fut(9)).await.unwrap();
        assert_eq!(v, 9);
    }
}
