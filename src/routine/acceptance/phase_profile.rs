use tracing::{info, instrument};

use super::{AcceptanceContext, ScenarioState};
use crate::error::SpannedExt;
use crate::kubernetes_objects::cluster::{Cascade, ClusterClient, ResourceKind, ResourceRef};
use crate::kubernetes_objects::guard::DeletionPolicy;
use crate::kubernetes_objects::manifests;
use crate::kubernetes_objects::presence::{check_exists, check_namespace_active};
use crate::routine::acceptance::ScenarioError;

impl<C: ClusterClient> AcceptanceContext<C> {
    /// Creates the Profile and waits until its namespace is Active and the
    /// Kubeflow Pipelines PodDefault has been synced into it.
    #[instrument("phase_profile", skip(self))]
    pub(super) async fn phase_profile(&mut self) -> Result<(), ScenarioError> {
        let profile = manifests::profile(&self.config).with_span_trace()?;
        let deletion = DeletionPolicy::wait_until_gone(
            Cascade::Foreground,
            self.poller(&self.config.polling.deletion),
        );
        self.acquire(&profile, deletion).await?;

        let namespace = self.config.namespace.clone();
        self.poller(&self.config.polling.namespace)
            .poll(&format!("namespace '{namespace}'"), || {
                check_namespace_active(&self.client, &namespace)
            })
            .await
            .map_err(|e| {
                ScenarioError::from_wait(e, |e| {
                    ScenarioError::NamespaceNotActive(namespace.clone(), e)
                })
            })?;
        self.transition(ScenarioState::NamespaceActive);

        let kfp = ResourceRef::namespaced(
            ResourceKind::PodDefault,
            &self.config.kfp_poddefault,
            &namespace,
        );
        info!("Waiting for {} to be created...", kfp);
        self.poller(&self.config.polling.poddefault)
            .poll(&kfp.to_string(), || check_exists(&self.client, &kfp))
            .await
            .map_err(|e| {
                ScenarioError::from_wait(e, |e| ScenarioError::PodDefaultMissing(kfp.clone(), e))
            })?;
        self.transition(ScenarioState::ProfileReady);

        Ok(())
    }

    #[instrument("phase_settle", skip(self))]
    pub(super) async fn phase_settle(&mut self) -> Result<(), ScenarioError> {
        let namespace = &self.config.namespace;
        info!(
            "Sleeping for {}s to allow the creation of PodDefaults in {} namespace..",
            self.config.poddefault_settle.as_secs(),
            namespace
        );
        let mut shutdown = self.shutdown.clone();
        if shutdown.sleep_or_shutdown(self.config.poddefault_settle).await {
            return Err(ScenarioError::Interrupted(
                shutdown.signal().unwrap_or("shutdown"),
            ));
        }

        let names: Vec<String> = self
            .client
            .list(ResourceKind::PodDefault, Some(namespace))
            .await
            .with_span_trace()?
            .into_iter()
            .filter_map(|pd| pd.metadata.name)
            .collect();
        info!("PodDefaults in {} namespace are {:?}.", namespace, names);

        Ok(())
    }
}
