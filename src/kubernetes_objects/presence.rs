use std::convert::Infallible;

use k8s_openapi::api::core::v1::NamespaceStatus;
use kube::core::DynamicObject;
use tracing::{debug, info};

use super::cluster::{ClusterClient, ClusterError, ResourceKind, ResourceRef, status_of};
use crate::polling::PollOutcome;

/// Done once the namespace exists with phase `Active`. Absence is "not yet
/// created", not an error.
pub(crate) async fn check_namespace_active<C: ClusterClient>(
    client: &C,
    namespace: &str,
) -> PollOutcome<(), Infallible> {
    let target = ResourceRef::cluster(ResourceKind::Namespace, namespace);
    let object = match client.get(&target).await {
        Ok(object) => object,
        Err(e) => return pending_on_error(&target, e),
    };

    let phase = status_of::<NamespaceStatus>(&target, &object)
        .ok()
        .and_then(|status| status.phase);
    info!(
        "Waiting for namespace {} to become 'Active': phase == {}",
        namespace,
        phase.as_deref().unwrap_or("<none>")
    );
    match phase.as_deref() {
        Some("Active") => PollOutcome::Done(()),
        Some(phase) => PollOutcome::Pending(format!("phase {phase}")),
        None => PollOutcome::Pending("no phase".to_string()),
    }
}

pub(crate) async fn check_exists<C: ClusterClient>(
    client: &C,
    target: &ResourceRef,
) -> PollOutcome<DynamicObject, Infallible> {
    match client.get(target).await {
        Ok(object) => PollOutcome::Done(object),
        Err(e) => pending_on_error(target, e),
    }
}

pub(crate) async fn check_gone<C: ClusterClient>(
    client: &C,
    target: &ResourceRef,
) -> PollOutcome<(), Infallible> {
    match client.get(target).await {
        Err(ClusterError::NotFound(_)) => PollOutcome::Done(()),
        Ok(_) => PollOutcome::Pending("still present".to_string()),
        Err(e) => PollOutcome::Pending(format!("lookup failed: {e}")),
    }
}

fn pending_on_error<T>(target: &ResourceRef, e: ClusterError) -> PollOutcome<T, Infallible> {
    match e {
        ClusterError::NotFound(_) => {
            debug!("{} does not exist yet", target);
            PollOutcome::Pending("not yet created".to_string())
        }
        e => PollOutcome::Pending(format!("lookup failed: {e}")),
    }
}
