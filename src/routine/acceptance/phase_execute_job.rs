use tracing::{info, instrument, warn};

use super::{AcceptanceContext, ScenarioState};
use crate::error::{SpannedErr, SpannedExt};
use crate::kubernetes_objects::cluster::{Cascade, ClusterClient, ResourceRef};
use crate::kubernetes_objects::guard::{DeletionPolicy, with_resource};
use crate::kubernetes_objects::job::wait_for_job;
use crate::kubernetes_objects::manifests::{self, GIT_SYNC_CONTAINER, TEST_CONTAINER};
use crate::polling::PollError;
use crate::routine::acceptance::ScenarioError;

impl<C: ClusterClient> AcceptanceContext<C> {
    /// Runs the test Job in its own scope, so it is deleted right after its
    /// logs are fetched and before anything created earlier.
    #[instrument("phase_job", skip(self))]
    pub(super) async fn phase_job(&mut self) -> Result<(), ScenarioError> {
        let job = manifests::test_job(&self.config).with_span_trace()?;
        self.ensure_running()?;
        info!("Starting Kubernetes Job {} to run notebook tests...", job.reference);

        let client = self.client.clone();
        with_resource(
            &client,
            &job,
            DeletionPolicy::immediate(Cascade::Background),
            move |job| async move {
                self.transition(ScenarioState::JobSubmitted);
                self.phase_execute_job(&job).await
            },
        )
        .await
    }

    #[instrument("phase_execute_job", skip(self), fields(job = %job))]
    async fn phase_execute_job(&mut self, job: &ResourceRef) -> Result<(), ScenarioError> {
        let poller = self.poller(&self.config.polling.job);
        let result = wait_for_job(&self.client, job, &poller).await;

        match &result {
            Err(PollError::Interrupted { signal, .. }) => {
                return Err(ScenarioError::Interrupted(*signal));
            }
            Ok(_) | Err(PollError::Fatal(_)) => self.transition(ScenarioState::JobTerminal),
            Err(PollError::Timeout { .. }) => {
                warn!("{} did not reach a terminal state, fetching its logs anyway.", job);
            }
        }

        self.fetch_job_logs(job).await;
        self.transition(ScenarioState::LogsFetched);

        result
            .map(|_| ())
            .map_err(|e| ScenarioError::Job(job.clone(), SpannedErr::new(e)))
    }

    #[instrument("fetch_job_logs", skip(self))]
    async fn fetch_job_logs(&self, job: &ResourceRef) {
        info!("Fetching Job logs...");

        let mut containers = Vec::new();
        if !self.config.local_run {
            containers.push(GIT_SYNC_CONTAINER);
        }
        containers.push(TEST_CONTAINER);

        for container in containers {
            match self.client.job_logs(job, Some(container)).await {
                Ok(logs) => {
                    println!("##### {container} container logs #####");
                    println!("{logs}");
                }
                Err(e) => warn!("Failed to fetch logs of container '{}': {}", container, e),
            }
        }
    }
}
