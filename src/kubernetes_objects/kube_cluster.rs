use derive_debug::Dbg;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::core::DynamicObject;
use kube::{Api, Client};
use tracing::{Instrument, debug, trace_span};

use super::MANAGER_NAME;
use super::cluster::{
    Cascade, ClusterClient, ClusterError, ManagedResource, ResourceKind, ResourceRef,
};

#[derive(Dbg, Clone)]
pub struct KubeCluster {
    #[dbg(skip)]
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(namespace) if kind.namespaced() => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn map_kube_error(target: &ResourceRef, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound(target.clone()),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            ClusterError::Conflict(target.clone())
        }
        kube::Error::Api(ae) if ae.code == 403 => {
            ClusterError::Forbidden(target.clone(), ae.message)
        }
        kube::Error::Api(ae) => {
            ClusterError::Api(target.clone(), format!("{} ({})", ae.message, ae.code))
        }
        other => ClusterError::Api(target.clone(), other.to_string()),
    }
}

impl ClusterClient for KubeCluster {
    async fn create(&self, resource: &ManagedResource) -> Result<DynamicObject, ClusterError> {
        let target = &resource.reference;
        let api = self.api(target.kind, target.namespace.as_deref());
        let params = PostParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..Default::default()
        };
        async {
            api.create(&params, &resource.object)
                .await
                .map_err(|e| map_kube_error(target, e))
        }
        .instrument(trace_span!("create", resource = %target))
        .await
    }

    async fn get(&self, target: &ResourceRef) -> Result<DynamicObject, ClusterError> {
        let api = self.api(target.kind, target.namespace.as_deref());
        async {
            api.get(&target.name)
                .await
                .map_err(|e| map_kube_error(target, e))
        }
        .instrument(trace_span!("get", resource = %target))
        .await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let target = ResourceRef {
            kind,
            name: "*".to_string(),
            namespace: namespace.map(str::to_string),
        };
        let api = self.api(kind, namespace);
        async {
            api.list(&ListParams::default())
                .await
                .map(|list| list.items)
                .map_err(|e| map_kube_error(&target, e))
        }
        .instrument(trace_span!("list", resource = %target))
        .await
    }

    async fn delete(&self, target: &ResourceRef, cascade: Cascade) -> Result<(), ClusterError> {
        let api = self.api(target.kind, target.namespace.as_deref());
        let params = match cascade {
            Cascade::Default => DeleteParams::default(),
            Cascade::Background => DeleteParams::background(),
            Cascade::Foreground => DeleteParams::foreground(),
        };
        async {
            api.delete(&target.name, &params)
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(target, e))
        }
        .instrument(trace_span!("delete", resource = %target, cascade = ?cascade))
        .await
    }

    async fn job_logs(
        &self,
        job: &ResourceRef,
        container: Option<&str>,
    ) -> Result<String, ClusterError> {
        let namespace = job.namespace.as_deref().unwrap_or("default");
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let span = trace_span!("job_logs", job = %job, container = ?container);
        async {
            let selector = format!("job-name={}", job.name);
            let pod_list = pods
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(|e| map_kube_error(job, e))?;

            if pod_list.items.is_empty() {
                return Err(ClusterError::NotFound(job.clone()));
            }

            let mut output = String::new();
            for pod in pod_list.items {
                let Some(pod_name) = pod.metadata.name else {
                    continue;
                };
                debug!("Fetching logs of pod '{}'", pod_name);
                let params = LogParams {
                    container: container.map(str::to_string),
                    ..Default::default()
                };
                let logs = pods
                    .logs(&pod_name, &params)
                    .await
                    .map_err(|e| map_kube_error(job, e))?;
                output.push_str(&logs);
            }
            Ok(output)
        }
        .instrument(span)
        .await
    }
}
