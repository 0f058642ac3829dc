pub mod error;
mod finalizer;
mod phase_execute_job;
mod phase_extra_resources;
mod phase_profile;

use std::fmt;

use tracing::{info, instrument};

use crate::config::Config;
use crate::config::polling::PollingConfig;
use crate::error::SpannedExt;
use crate::kubernetes_objects::cluster::{ClusterClient, ManagedResource, ResourceRef};
use crate::kubernetes_objects::guard::{DeletionPolicy, GuardStack, ResourceGuard};
use crate::polling::Poller;
use crate::routine::shutdown::Shutdown;

pub use self::error::ScenarioError;

/// Progress of an acceptance run. Only moves forward; a failure jumps
/// straight to `CleanedUp`. A Job wait that times out goes from
/// `JobSubmitted` to `LogsFetched`, as the Job never became terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    NamespaceAbsent,
    NamespaceActive,
    ProfileReady,
    JobSubmitted,
    JobTerminal,
    LogsFetched,
    CleanedUp,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) struct AcceptanceContext<C: ClusterClient> {
    pub(crate) config: Config,
    pub(crate) client: C,
    shutdown: Shutdown,
    state: ScenarioState,
    guards: GuardStack<C>,
}

impl<C: ClusterClient> AcceptanceContext<C> {
    pub(crate) fn new(config: Config, client: C, shutdown: Shutdown) -> Self {
        Self {
            config,
            client,
            shutdown,
            state: ScenarioState::NamespaceAbsent,
            guards: GuardStack::default(),
        }
    }

    pub(crate) fn state(&self) -> ScenarioState {
        self.state
    }

    #[instrument("acceptance", skip(self), fields(namespace = %self.config.namespace))]
    pub(crate) async fn run(&mut self) -> Result<(), ScenarioError> {
        info!("Starting acceptance run...");

        let result = self.scenario().await;
        if result.is_ok() {
            info!("Acceptance run completed successfully.");
        }

        self.finalizer(result).await
    }

    async fn scenario(&mut self) -> Result<(), ScenarioError> {
        self.phase_profile().await?;
        self.phase_settle().await?;
        self.phase_extra_resources().await?;
        self.phase_job().await
    }

    fn transition(&mut self, next: ScenarioState) {
        info!("Scenario state: {} -> {}", self.state, next);
        self.state = next;
    }

    fn poller(&self, polling: &PollingConfig) -> Poller {
        polling.poller().with_shutdown(self.shutdown.clone())
    }

    /// Nothing new is created once shutdown was requested.
    fn ensure_running(&self) -> Result<(), ScenarioError> {
        match self.shutdown.signal() {
            Some(signal) => Err(ScenarioError::Interrupted(signal)),
            None => Ok(()),
        }
    }

    async fn acquire(
        &mut self,
        resource: &ManagedResource,
        deletion: DeletionPolicy,
    ) -> Result<ResourceRef, ScenarioError> {
        self.ensure_running()?;
        let guard = ResourceGuard::acquire(self.client.clone(), resource, deletion)
            .await
            .with_span_trace()?;
        let reference = guard.resource().clone();
        self.guards.push(guard);
        Ok(reference)
    }
}
