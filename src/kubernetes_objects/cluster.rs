use std::fmt;
use std::future::Future;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::node::v1::RuntimeClass;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    Profile,
    PodDefault,
    Job,
    RuntimeClass,
}

impl ResourceKind {
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ResourceKind::Namespace => ApiResource::erase::<Namespace>(&()),
            ResourceKind::Job => ApiResource::erase::<Job>(&()),
            ResourceKind::RuntimeClass => ApiResource::erase::<RuntimeClass>(&()),
            ResourceKind::Profile => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk("kubeflow.org", "v1", "Profile"),
                "profiles",
            ),
            ResourceKind::PodDefault => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk("kubeflow.org", "v1alpha1", "PodDefault"),
                "poddefaults",
            ),
        }
    }

    pub fn namespaced(&self) -> bool {
        matches!(self, ResourceKind::PodDefault | ResourceKind::Job)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(kind: ResourceKind, name: impl Into<String>, namespace: &str) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.to_string()),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} '{}/{}'", self.kind, namespace, self.name),
            None => write!(f, "{} '{}'", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagedResource {
    pub reference: ResourceRef,
    pub object: DynamicObject,
}

impl ManagedResource {
    /// Takes the name from `object.metadata.name`. `namespace` is ignored for
    /// cluster-scoped kinds and required for namespaced ones.
    pub fn new(
        kind: ResourceKind,
        mut object: DynamicObject,
        namespace: Option<&str>,
    ) -> Result<Self, ClusterError> {
        let name = object.metadata.name.clone().ok_or_else(|| {
            ClusterError::Invalid(kind, "manifest has no metadata.name".to_string())
        })?;
        let reference = if kind.namespaced() {
            let namespace = namespace
                .map(str::to_string)
                .or_else(|| object.metadata.namespace.clone())
                .ok_or_else(|| {
                    ClusterError::Invalid(kind, format!("namespaced '{name}' has no namespace"))
                })?;
            object.metadata.namespace = Some(namespace.clone());
            ResourceRef::namespaced(kind, name, &namespace)
        } else {
            object.metadata.namespace = None;
            ResourceRef::cluster(kind, name)
        };
        Ok(Self { reference, object })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cascade {
    #[default]
    Default,
    Background,
    Foreground,
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(ResourceRef),

    #[error("{0} already exists")]
    Conflict(ResourceRef),

    #[error("Access to {0} is forbidden: {1}")]
    Forbidden(ResourceRef, String),

    #[error("Kubernetes API error on {0}: {1}")]
    Api(ResourceRef, String),

    #[error("Failed to decode {0}: {1}")]
    Decode(ResourceRef, #[source] serde_json::Error),

    #[error("Invalid {0} manifest: {1}")]
    Invalid(ResourceKind, String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// The subset of the Kubernetes API the driver consumes.
///
/// Every call goes to the API server; implementations must not cache.
/// `delete` must be `Send` so that a dropped guard can still schedule it.
#[allow(async_fn_in_trait)]
pub trait ClusterClient: Clone + Send + Sync + 'static {
    async fn create(&self, resource: &ManagedResource) -> Result<DynamicObject, ClusterError>;

    async fn get(&self, target: &ResourceRef) -> Result<DynamicObject, ClusterError>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    fn delete(
        &self,
        target: &ResourceRef,
        cascade: Cascade,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    async fn job_logs(
        &self,
        job: &ResourceRef,
        container: Option<&str>,
    ) -> Result<String, ClusterError>;
}

pub fn status_of<T>(target: &ResourceRef, object: &DynamicObject) -> Result<T, ClusterError>
where
    T: DeserializeOwned + Default,
{
    match object.data.get("status") {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(status) => serde_json::from_value(status.clone())
            .map_err(|e| ClusterError::Decode(target.clone(), e)),
    }
}
