use std::convert::Infallible;

use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::error::SpannedErr;
use crate::kubernetes_objects::admission::AdmissionError;
use crate::kubernetes_objects::cluster::{ClusterError, ResourceRef};
use crate::kubernetes_objects::guard::LifecycleError;
use crate::kubernetes_objects::job::JobWaitError;
use crate::polling::PollError;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Resource lifecycle error: {0}")]
    Lifecycle(#[from] SpannedErr<LifecycleError>),

    #[error("Kubernetes API error: {0}")]
    Cluster(#[from] SpannedErr<ClusterError>),

    #[error("Failed to configure Pod Security admission: {0}")]
    Admission(#[from] SpannedErr<AdmissionError>),

    #[error("Namespace '{0}' did not become Active: {1}")]
    NamespaceNotActive(String, SpannedErr<PollError<Infallible>>),

    #[error("{0} was not synced into the namespace: {1}")]
    PodDefaultMissing(ResourceRef, SpannedErr<PollError<Infallible>>),

    #[error(
        "Something went wrong while running {0}. Please inspect the attached logs for more info: {1}"
    )]
    Job(ResourceRef, SpannedErr<PollError<JobWaitError>>),

    #[error("Interrupted by {0}")]
    Interrupted(&'static str),

    #[error("{failures} resource(s) could not be cleaned up, first failure: {first}")]
    Cleanup {
        failures: usize,
        first: SpannedErr<LifecycleError>,
    },
}

impl ScenarioError {
    pub(super) fn from_wait<E>(
        err: PollError<E>,
        wrap: impl FnOnce(SpannedErr<PollError<E>>) -> ScenarioError,
    ) -> ScenarioError {
        match err {
            PollError::Interrupted { signal, .. } => ScenarioError::Interrupted(signal),
            other => wrap(SpannedErr::new(other)),
        }
    }
}

impl From<LifecycleError> for ScenarioError {
    fn from(err: LifecycleError) -> Self {
        ScenarioError::Lifecycle(SpannedErr::new(err))
    }
}

impl ExtractSpanTrace for ScenarioError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            ScenarioError::Lifecycle(e) => e.span_trace(),
            ScenarioError::Cluster(e) => e.span_trace(),
            ScenarioError::Admission(e) => e.span_trace(),
            ScenarioError::NamespaceNotActive(_, e) => e.span_trace(),
            ScenarioError::PodDefaultMissing(_, e) => e.span_trace(),
            ScenarioError::Job(_, e) => e.span_trace(),
            ScenarioError::Interrupted(_) => None,
            ScenarioError::Cleanup { first, .. } => first.span_trace(),
        }
    }
}
