pub mod admission;
pub mod cluster;
pub mod guard;
pub mod job;
pub mod kube_cluster;
pub mod manifests;
pub(crate) mod presence;

pub(crate) const MANAGER_NAME: &str = "kubeflow-uats";
