//! In-memory [`ClusterClient`] for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use k8s_openapi::api::batch::v1::JobStatus;
use kube::core::DynamicObject;
use serde_json::json;

use crate::kubernetes_objects::cluster::{
    Cascade, ClusterClient, ClusterError, ManagedResource, ResourceKind, ResourceRef,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Create(ResourceRef),
    Get(ResourceRef),
    List(ResourceKind, Option<String>),
    Delete(ResourceRef, Cascade),
    Logs(ResourceRef, Option<String>),
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ResourceRef, DynamicObject>,
    job_statuses: HashMap<ResourceRef, VecDeque<JobStatus>>,
    logs: HashMap<(ResourceRef, Option<String>), String>,
    forbidden_creates: HashSet<ResourceRef>,
    failing_deletes: HashSet<ResourceRef>,
    lingering: HashSet<ResourceRef>,
    profile_controller: Option<String>,
    calls: Vec<Call>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Creating a Profile also creates its Active namespace and the given
    /// PodDefault inside it.
    pub(crate) fn with_profile_controller(self, poddefault: &str) -> Self {
        self.state().profile_controller = Some(poddefault.to_string());
        self
    }

    pub(crate) fn insert(&self, target: &ResourceRef, value: serde_json::Value) {
        let object = serde_json::from_value(value).unwrap();
        self.state().objects.insert(target.clone(), object);
    }

    pub(crate) fn remove(&self, target: &ResourceRef) {
        self.state().objects.remove(target);
    }

    pub(crate) fn contains(&self, target: &ResourceRef) -> bool {
        self.state().objects.contains_key(target)
    }

    pub(crate) fn script_job_statuses(&self, job: &ResourceRef, statuses: Vec<JobStatus>) {
        self.state()
            .job_statuses
            .insert(job.clone(), statuses.into());
    }

    pub(crate) fn set_logs(&self, job: &ResourceRef, container: Option<&str>, logs: &str) {
        self.state().logs.insert(
            (job.clone(), container.map(str::to_string)),
            logs.to_string(),
        );
    }

    pub(crate) fn forbid_create(&self, target: &ResourceRef) {
        self.state().forbidden_creates.insert(target.clone());
    }

    pub(crate) fn fail_delete(&self, target: &ResourceRef) {
        self.state().failing_deletes.insert(target.clone());
    }

    pub(crate) fn linger_after_delete(&self, target: &ResourceRef) {
        self.state().lingering.insert(target.clone());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub(crate) fn gets_of(&self, target: &ResourceRef) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Get(r) if r == target))
            .count()
    }

    pub(crate) fn creates(&self) -> Vec<ResourceRef> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Create(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn deletes(&self) -> Vec<ResourceRef> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Delete(r, _) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

fn object_of(target: &ResourceRef) -> DynamicObject {
    let resource = target.kind.api_resource();
    serde_json::from_value(json!({
        "apiVersion": resource.api_version,
        "kind": resource.kind,
        "metadata": { "name": target.name, "namespace": target.namespace },
    }))
    .unwrap()
}

impl ClusterClient for FakeCluster {
    async fn create(&self, resource: &ManagedResource) -> Result<DynamicObject, ClusterError> {
        let target = &resource.reference;
        let mut state = self.state();
        state.calls.push(Call::Create(target.clone()));

        if state.forbidden_creates.contains(target) {
            return Err(ClusterError::Forbidden(
                target.clone(),
                "forbidden by test".to_string(),
            ));
        }
        if state.objects.contains_key(target) {
            return Err(ClusterError::Conflict(target.clone()));
        }
        state.objects.insert(target.clone(), resource.object.clone());

        if target.kind == ResourceKind::Profile
            && let Some(poddefault) = state.profile_controller.clone()
        {
            let namespace = ResourceRef::cluster(ResourceKind::Namespace, &target.name);
            let mut ns_object = object_of(&namespace);
            ns_object.data["status"] = json!({ "phase": "Active" });
            state.objects.insert(namespace, ns_object);

            let pd = ResourceRef::namespaced(ResourceKind::PodDefault, poddefault, &target.name);
            let pd_object = object_of(&pd);
            state.objects.insert(pd, pd_object);
        }

        Ok(resource.object.clone())
    }

    async fn get(&self, target: &ResourceRef) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::Get(target.clone()));

        let scripted = state.job_statuses.get_mut(target).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

        match (state.objects.get(target).cloned(), scripted) {
            (Some(mut object), Some(status)) => {
                object.data["status"] = serde_json::to_value(status).unwrap();
                Ok(object)
            }
            (Some(object), None) => Ok(object),
            (None, Some(status)) => {
                let mut object = object_of(target);
                object.data["status"] = serde_json::to_value(status).unwrap();
                Ok(object)
            }
            (None, None) => Err(ClusterError::NotFound(target.clone())),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::List(kind, namespace.map(str::to_string)));

        let mut items: Vec<(String, DynamicObject)> = state
            .objects
            .iter()
            .filter(|(r, _)| r.kind == kind && r.namespace.as_deref() == namespace)
            .map(|(r, object)| (r.name.clone(), object.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items.into_iter().map(|(_, object)| object).collect())
    }

    async fn delete(&self, target: &ResourceRef, cascade: Cascade) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(target.clone(), cascade));

        if state.failing_deletes.contains(target) {
            return Err(ClusterError::Api(
                target.clone(),
                "delete failed by test".to_string(),
            ));
        }
        if !state.objects.contains_key(target) {
            return Err(ClusterError::NotFound(target.clone()));
        }
        if !state.lingering.contains(target) {
            state.objects.remove(target);
        }
        Ok(())
    }

    async fn job_logs(
        &self,
        job: &ResourceRef,
        container: Option<&str>,
    ) -> Result<String, ClusterError> {
        let mut state = self.state();
        let container = container.map(str::to_string);
        state.calls.push(Call::Logs(job.clone(), container.clone()));
        state
            .logs
            .get(&(job.clone(), container))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(job.clone()))
    }
}
