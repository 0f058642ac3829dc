use std::fmt::{self, Display};
use std::future::Future;

use thiserror::Error;
use tracing::{Level, error, info, instrument, warn};

use super::cluster::{Cascade, ClusterClient, ClusterError, ManagedResource, ResourceRef};
use super::presence::check_gone;
use crate::error::{SpannedErr, report};
use crate::polling::Poller;

#[derive(Debug, Clone, Default)]
pub struct DeletionPolicy {
    pub cascade: Cascade,
    pub wait: Option<Poller>,
}

impl DeletionPolicy {
    pub fn immediate(cascade: Cascade) -> Self {
        Self {
            cascade,
            wait: None,
        }
    }

    pub fn wait_until_gone(cascade: Cascade, poller: Poller) -> Self {
        Self {
            cascade,
            wait: Some(poller),
        }
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{0} already exists and is not owned by this run")]
    Conflict(ResourceRef),

    #[error("Failed to create {0}: {1}")]
    Create(ResourceRef, #[source] ClusterError),

    #[error("Failed to delete {0}: {1}")]
    Delete(ResourceRef, #[source] ClusterError),
}

/// Owns one created cluster object until [`ResourceGuard::release`] deletes it.
///
/// A guard dropped without `release` (its future was cancelled) spawns the
/// delete onto the current runtime instead. That delete skips the deletion wait.
pub struct ResourceGuard<C: ClusterClient> {
    client: C,
    resource: ResourceRef,
    deletion: DeletionPolicy,
    released: bool,
}

impl<C: ClusterClient> ResourceGuard<C> {
    #[instrument(
        "resource_guard/acquire",
        level = Level::TRACE,
        skip_all,
        fields(resource = %resource.reference)
    )]
    pub async fn acquire(
        client: C,
        resource: &ManagedResource,
        deletion: DeletionPolicy,
    ) -> Result<Self, LifecycleError> {
        let reference = &resource.reference;
        info!("Creating {}...", reference);

        match client.create(resource).await {
            Ok(_) => Ok(Self {
                client,
                resource: reference.clone(),
                deletion,
                released: false,
            }),
            Err(ClusterError::Conflict(existing)) => Err(LifecycleError::Conflict(existing)),
            Err(e) => Err(LifecycleError::Create(reference.clone(), e)),
        }
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Deletes the resource. An object that is already gone counts as
    /// released, and a deletion that does not settle in time is only logged.
    #[instrument(
        "resource_guard/release",
        level = Level::TRACE,
        skip_all,
        fields(resource = %self.resource)
    )]
    pub async fn release(mut self) -> Result<(), LifecycleError> {
        self.released = true;
        info!("Deleting {}...", self.resource);

        match self
            .client
            .delete(&self.resource, self.deletion.cascade)
            .await
        {
            Ok(()) => {}
            Err(ClusterError::NotFound(_)) => {
                warn!("{} was already deleted.", self.resource);
                return Ok(());
            }
            Err(e) => return Err(LifecycleError::Delete(self.resource.clone(), e)),
        }

        if let Some(poller) = &self.deletion.wait {
            let target = format!("deletion of {}", self.resource);
            match poller
                .poll(&target, || check_gone(&self.client, &self.resource))
                .await
            {
                Ok(()) => info!("{} deleted.", self.resource),
                Err(e) => warn!(
                    "{} is still present after deletion ({}). Leaving it to the cluster to converge.",
                    self.resource, e
                ),
            }
        }

        Ok(())
    }
}

impl<C: ClusterClient> fmt::Debug for ResourceGuard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.resource)
            .field("deletion", &self.deletion)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient> Drop for ResourceGuard<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let resource = self.resource.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("{} leaked: its guard was dropped outside of a runtime", resource);
            return;
        };

        warn!("{} was not released, deleting it in the background", resource);
        let client = self.client.clone();
        let cascade = self.deletion.cascade;
        handle.spawn(async move {
            if let Err(e) = client.delete(&resource, cascade).await
                && !e.is_not_found()
            {
                error!("Failed to delete {}: {}", resource, e);
            }
        });
    }
}

#[derive(Debug)]
pub struct GuardStack<C: ClusterClient> {
    guards: Vec<ResourceGuard<C>>,
}

impl<C: ClusterClient> Default for GuardStack<C> {
    fn default() -> Self {
        Self { guards: Vec::new() }
    }
}

impl<C: ClusterClient> GuardStack<C> {
    pub fn push(&mut self, guard: ResourceGuard<C>) {
        self.guards.push(guard);
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub async fn release_all(&mut self) -> Vec<SpannedErr<LifecycleError>> {
        let mut failures = Vec::new();
        while let Some(guard) = self.guards.pop() {
            if let Err(e) = guard.release().await {
                let e = SpannedErr::new(e);
                report("Cleanup failed", &e);
                failures.push(e);
            }
        }
        failures
    }
}

/// Creates `resource`, runs `body`, then deletes the resource whatever the
/// body returned. The body's error wins over a delete error.
///
/// Dropping the returned future after the create still deletes the resource.
pub async fn with_resource<C, T, E, F, Fut>(
    client: &C,
    resource: &ManagedResource,
    deletion: DeletionPolicy,
    body: F,
) -> Result<T, E>
where
    C: ClusterClient,
    F: FnOnce(ResourceRef) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LifecycleError> + Display,
{
    let guard = ResourceGuard::acquire(client.clone(), resource, deletion).await?;
    let result = body(guard.resource().clone()).await;

    match (guard.release().await, result) {
        (Ok(()), result) => result,
        (Err(release_err), Ok(_)) => Err(release_err.into()),
        (Err(release_err), Err(body_err)) => {
            error!("{} (while handling: {})", release_err, body_err);
            Err(body_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::kubernetes_objects::cluster::ResourceKind;
    use crate::polling::{BackoffPolicy, PollLimit};
    use crate::test_support::{Call, FakeCluster};

    #[derive(Error, Debug)]
    enum BodyError {
        #[error("body failed")]
        Body,

        #[error(transparent)]
        Lifecycle(#[from] LifecycleError),
    }

    fn poddefault(name: &str) -> ManagedResource {
        let object = serde_json::from_value(json!({
            "apiVersion": "kubeflow.org/v1alpha1",
            "kind": "PodDefault",
            "metadata": { "name": name },
            "spec": { "selector": { "matchLabels": { name: "true" } } }
        }))
        .unwrap();
        ManagedResource::new(ResourceKind::PodDefault, object, Some("test-kubeflow")).unwrap()
    }

    #[tokio::test]
    async fn test_body_error_still_deletes_once() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");

        let result: Result<(), BodyError> = with_resource(
            &cluster,
            &resource,
            DeletionPolicy::default(),
            |_| async { Err(BodyError::Body) },
        )
        .await;

        assert!(matches!(result, Err(BodyError::Body)));
        assert_eq!(cluster.deletes(), vec![resource.reference.clone()]);
        assert!(!cluster.contains(&resource.reference));
    }

    #[tokio::test]
    async fn test_delete_error_never_masks_body_error() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        cluster.fail_delete(&resource.reference);

        let result: Result<(), BodyError> = with_resource(
            &cluster,
            &resource,
            DeletionPolicy::default(),
            |_| async { Err(BodyError::Body) },
        )
        .await;

        assert!(matches!(result, Err(BodyError::Body)));
        assert_eq!(cluster.deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_error_surfaces_after_successful_body() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        cluster.fail_delete(&resource.reference);

        let result: Result<u32, BodyError> = with_resource(
            &cluster,
            &resource,
            DeletionPolicy::default(),
            |_| async { Ok(7) },
        )
        .await;

        assert!(matches!(
            result,
            Err(BodyError::Lifecycle(LifecycleError::Delete(_, _)))
        ));
    }

    #[tokio::test]
    async fn test_body_sees_created_resource() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");

        let seen = with_resource::<_, _, BodyError, _, _>(
            &cluster,
            &resource,
            DeletionPolicy::default(),
            |reference| {
                let cluster = cluster.clone();
                async move { Ok(cluster.contains(&reference)) }
            },
        )
        .await
        .unwrap();

        assert!(seen);
        assert!(!cluster.contains(&resource.reference));
    }

    #[tokio::test]
    async fn test_conflict_is_distinct_and_deletes_nothing() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        let first = ResourceGuard::acquire(cluster.clone(), &resource, DeletionPolicy::default())
            .await
            .unwrap();

        let second =
            ResourceGuard::acquire(cluster.clone(), &resource, DeletionPolicy::default()).await;

        assert!(matches!(second, Err(LifecycleError::Conflict(_))));
        assert!(cluster.deletes().is_empty());
        first.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_failure_propagates_without_delete() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        cluster.forbid_create(&resource.reference);

        let result: Result<(), BodyError> = with_resource(
            &cluster,
            &resource,
            DeletionPolicy::default(),
            |_| async { Ok(()) },
        )
        .await;

        assert!(matches!(
            result,
            Err(BodyError::Lifecycle(LifecycleError::Create(
                _,
                ClusterError::Forbidden(_, _)
            )))
        ));
        assert!(cluster.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_already_deleted_counts_as_released() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        let guard = ResourceGuard::acquire(cluster.clone(), &resource, DeletionPolicy::default())
            .await
            .unwrap();
        cluster.remove(&resource.reference);

        assert!(guard.release().await.is_ok());
    }

    #[tokio::test]
    async fn test_stack_releases_lifo() {
        let cluster = FakeCluster::default();
        let mut stack = GuardStack::default();
        for name in ["first", "second", "third"] {
            let guard = ResourceGuard::acquire(
                cluster.clone(),
                &poddefault(name),
                DeletionPolicy::immediate(Cascade::Background),
            )
            .await
            .unwrap();
            stack.push(guard);
        }
        cluster.fail_delete(&poddefault("second").reference);

        let failures = stack.release_all().await;

        assert_eq!(failures.len(), 1);
        assert!(stack.is_empty());
        let deleted: Vec<String> = cluster
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(r, Cascade::Background) => Some(r.name),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["third", "second", "first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_wait_timeout_is_only_a_warning() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        cluster.linger_after_delete(&resource.reference);
        let poller = Poller::new(BackoffPolicy::resource_check(), PollLimit::Attempts(10));
        let guard = ResourceGuard::acquire(
            cluster.clone(),
            &resource,
            DeletionPolicy::wait_until_gone(Cascade::Foreground, poller),
        )
        .await
        .unwrap();
        let started = tokio::time::Instant::now();

        assert!(guard.release().await.is_ok());
        assert_eq!(cluster.gets_of(&resource.reference), 10);
        // 1 + 2 + 4 + 8 + 10 * 5
        assert_eq!(started.elapsed(), Duration::from_secs(65));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scope_still_deletes() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");

        let scope = with_resource::<_, (), BodyError, _, _>(
            &cluster,
            &resource,
            DeletionPolicy::immediate(Cascade::Background),
            |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
        );
        let result = tokio::time::timeout(Duration::from_secs(5), scope).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            cluster.calls().last(),
            Some(&Call::Delete(resource.reference.clone(), Cascade::Background))
        );
        assert!(!cluster.contains(&resource.reference));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_deletes_in_background() {
        let cluster = FakeCluster::default();
        let resource = poddefault("proxy");
        let guard = ResourceGuard::acquire(cluster.clone(), &resource, DeletionPolicy::default())
            .await
            .unwrap();

        drop(guard);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(cluster.deletes(), vec![resource.reference.clone()]);
        assert!(!cluster.contains(&resource.reference));
    }
}
