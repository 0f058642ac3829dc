use tracing::{info, instrument, warn};

use super::{AcceptanceContext, ScenarioState};
use crate::kubernetes_objects::cluster::ClusterClient;
use crate::routine::acceptance::ScenarioError;

impl<C: ClusterClient> AcceptanceContext<C> {
    /// Releases every guard of the run and hands back `result`. A cleanup
    /// failure only replaces a successful result.
    #[instrument("finalizer", skip(self, result))]
    pub(super) async fn finalizer(
        &mut self,
        result: Result<(), ScenarioError>,
    ) -> Result<(), ScenarioError> {
        info!(
            "Deleting {} resource(s) created by this run...",
            self.guards.len()
        );
        let mut failures = self.guards.release_all().await;
        self.transition(ScenarioState::CleanedUp);

        if failures.is_empty() {
            return result;
        }
        warn!("{} resource(s) could not be deleted.", failures.len());
        match result {
            Ok(()) => Err(ScenarioError::Cleanup {
                failures: failures.len(),
                first: failures.remove(0),
            }),
            Err(e) => Err(e),
        }
    }
}
