use tracing::{info, instrument, warn};

use super::AcceptanceContext;
use crate::error::SpannedExt;
use crate::kubernetes_objects::cluster::{Cascade, ClusterClient};
use crate::kubernetes_objects::guard::DeletionPolicy;
use crate::kubernetes_objects::{admission, manifests};
use crate::routine::acceptance::ScenarioError;

impl<C: ClusterClient> AcceptanceContext<C> {
    /// Creates the optional PodDefaults and, for local runs, the RuntimeClass
    /// that exempts the test pod from Pod Security Standards along with the
    /// admission configuration granting that exemption.
    #[instrument("phase_extra_resources", skip(self))]
    pub(super) async fn phase_extra_resources(&mut self) -> Result<(), ScenarioError> {
        let namespace = &self.config.namespace;
        let mut resources = Vec::new();

        if let Some(proxy) = &self.config.proxy {
            resources.push(manifests::proxy_poddefault(namespace, proxy));
        }
        if let Some(toleration) = &self.config.toleration {
            resources.push(manifests::toleration_poddefault(namespace, toleration));
        }
        if let Some(policy) = self.config.security_policy {
            resources.push(manifests::security_policy_poddefault(namespace, policy));
        }
        if self.config.local_run {
            self.configure_admission().await?;
            info!("Creating the RuntimeClass for exemption from Pod Security Standards...");
            resources.push(manifests::runtime_class(&self.config.runtimeclass));
        }

        for resource in resources {
            let resource = resource.with_span_trace()?;
            self.acquire(&resource, DeletionPolicy::immediate(Cascade::Default))
                .await?;
        }

        Ok(())
    }

    async fn configure_admission(&self) -> Result<(), ScenarioError> {
        let Some(admission_config) = &self.config.admission_config else {
            warn!(
                "No admission configuration given. The RuntimeClass exempts the tests only if PodSecurity already exempts it."
            );
            return Ok(());
        };
        info!("Configuring the Admission Controller for exemptions from Pod Security Standards...");
        admission::configure_pod_security(
            admission_config,
            &self.config.pod_security_config,
            &self.config.runtimeclass,
        )
        .await
        .with_span_trace()?;
        Ok(())
    }
}
