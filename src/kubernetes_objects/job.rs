use k8s_openapi::api::batch::v1::JobStatus;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::cluster::{ClusterClient, ClusterError, ResourceRef, status_of};
use crate::polling::{PollError, PollOutcome, Poller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVerdict {
    Succeeded,
    Failed,
    Active,
    NotReady,
    Unknown,
}

impl JobVerdict {
    pub fn from_status(status: &JobStatus) -> Self {
        let positive = |count: Option<i32>| count.unwrap_or(0) > 0;

        if positive(status.succeeded) {
            JobVerdict::Succeeded
        } else if positive(status.failed) {
            JobVerdict::Failed
        } else if positive(status.active) {
            JobVerdict::Active
        } else if !positive(status.ready) {
            JobVerdict::NotReady
        } else {
            JobVerdict::Unknown
        }
    }
}

#[derive(Error, Debug)]
pub enum JobWaitError {
    #[error("{0} failed (status: {1:?})")]
    JobFailed(ResourceRef, Box<JobStatus>),

    #[error("Unknown status {1:?} for {0}")]
    UnknownStatus(ResourceRef, Box<JobStatus>),

    #[error("{0} disappeared while waiting for it to finish")]
    Vanished(ResourceRef),

    #[error("Cannot read status: {0}")]
    Status(#[source] ClusterError),
}

pub(crate) async fn check_job<C: ClusterClient>(
    client: &C,
    job: &ResourceRef,
) -> PollOutcome<JobStatus, JobWaitError> {
    let object = match client.get(job).await {
        Ok(object) => object,
        Err(ClusterError::NotFound(_)) => {
            return PollOutcome::Fatal(JobWaitError::Vanished(job.clone()));
        }
        Err(e) => {
            warn!("Error while checking {}: {}", job, e);
            return PollOutcome::Pending(format!("lookup failed: {e}"));
        }
    };

    let status: JobStatus = match status_of(job, &object) {
        Ok(status) => status,
        Err(e) => return PollOutcome::Fatal(JobWaitError::Status(e)),
    };

    match JobVerdict::from_status(&status) {
        JobVerdict::Succeeded => {
            info!("{} completed successfully!", job);
            PollOutcome::Done(status)
        }
        JobVerdict::Failed => PollOutcome::Fatal(JobWaitError::JobFailed(
            job.clone(),
            Box::new(status),
        )),
        JobVerdict::Active => PollOutcome::Pending("active".to_string()),
        JobVerdict::NotReady => PollOutcome::Pending("not ready".to_string()),
        JobVerdict::Unknown => PollOutcome::Fatal(JobWaitError::UnknownStatus(
            job.clone(),
            Box::new(status),
        )),
    }
}

#[instrument("wait_for_job", skip(client, poller), fields(job = %job))]
pub(crate) async fn wait_for_job<C: ClusterClient>(
    client: &C,
    job: &ResourceRef,
    poller: &Poller,
) -> Result<JobStatus, PollError<JobWaitError>> {
    info!(
        "Waiting up to {} for {} to complete...",
        poller.limit, job
    );
    poller
        .poll(&job.to_string(), || check_job(client, job))
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kubernetes_objects::cluster::ResourceKind;
    use crate::polling::{BackoffPolicy, PollLimit};
    use crate::test_support::FakeCluster;

    fn status(active: i32, ready: i32, succeeded: i32, failed: i32) -> JobStatus {
        JobStatus {
            active: Some(active),
            ready: Some(ready),
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        }
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(
            JobVerdict::from_status(&status(0, 0, 1, 0)),
            JobVerdict::Succeeded
        );
        assert_eq!(JobVerdict::from_status(&status(1, 1, 0, 1)), JobVerdict::Failed);
        assert_eq!(JobVerdict::from_status(&status(1, 0, 0, 0)), JobVerdict::Active);
        assert_eq!(JobVerdict::from_status(&status(0, 0, 0, 0)), JobVerdict::NotReady);
        assert_eq!(JobVerdict::from_status(&status(0, 1, 0, 0)), JobVerdict::Unknown);
    }

    #[test]
    fn test_empty_status_is_not_ready() {
        assert_eq!(
            JobVerdict::from_status(&JobStatus::default()),
            JobVerdict::NotReady
        );
    }

    fn job_ref() -> ResourceRef {
        ResourceRef::namespaced(ResourceKind::Job, "test-kubeflow", "test-kubeflow")
    }

    fn job_poller() -> Poller {
        Poller::new(
            BackoffPolicy::job_completion(),
            PollLimit::Elapsed(Duration::from_secs(3600)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_succeeds_on_third_poll() {
        let cluster = FakeCluster::default();
        cluster.script_job_statuses(
            &job_ref(),
            vec![status(1, 0, 0, 0), status(1, 1, 0, 0), status(0, 0, 1, 0)],
        );
        let started = tokio::time::Instant::now();

        let result = wait_for_job(&cluster, &job_ref(), &job_poller()).await;

        assert_eq!(result.unwrap().succeeded, Some(1));
        assert_eq!(cluster.gets_of(&job_ref()), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_is_fatal_on_first_poll() {
        let cluster = FakeCluster::default();
        cluster.script_job_statuses(&job_ref(), vec![status(0, 0, 0, 1)]);

        let result = wait_for_job(&cluster, &job_ref(), &job_poller()).await;

        assert!(matches!(
            result,
            Err(PollError::Fatal(JobWaitError::JobFailed(_, _)))
        ));
        assert_eq!(cluster.gets_of(&job_ref()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_is_fatal() {
        let cluster = FakeCluster::default();
        cluster.script_job_statuses(&job_ref(), vec![status(0, 1, 0, 0)]);

        let result = wait_for_job(&cluster, &job_ref(), &job_poller()).await;

        assert!(matches!(
            result,
            Err(PollError::Fatal(JobWaitError::UnknownStatus(_, _)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_is_fatal() {
        let cluster = FakeCluster::default();

        let result = wait_for_job(&cluster, &job_ref(), &job_poller()).await;

        assert!(matches!(
            result,
            Err(PollError::Fatal(JobWaitError::Vanished(_)))
        ));
    }
}
