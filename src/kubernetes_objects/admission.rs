use std::path::{Path, PathBuf};

use serde_json::json;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::RuntimeClassConfig;

const POD_SECURITY_PLUGIN: &str = "PodSecurity";

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Failed to read '{0}': {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to write '{0}': {1}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse '{0}': {1}")]
    Yaml(PathBuf, #[source] serde_yaml::Error),

    #[error("Admission configuration has no 'plugins' list")]
    NoPlugins,

    #[error(
        "PodSecurity is already configured from '{existing}'. Updating an existing PodSecurity plugin is not supported"
    )]
    PodSecurityConflict { existing: String },
}

pub fn pod_security_configuration(runtimeclass: &RuntimeClassConfig) -> serde_json::Value {
    json!({
        "apiVersion": "pod-security.admission.config.k8s.io/v1",
        "kind": "PodSecurityConfiguration",
        "defaults": {
            "enforce": "privileged",
            "enforce-version": "latest",
            "audit": "privileged",
            "audit-version": "latest",
            "warn": "privileged",
            "warn-version": "latest",
        },
        "exemptions": {
            "usernames": [],
            "runtimeClasses": [runtimeclass.name],
            "namespaces": [],
        },
    })
}

/// Adds a `PodSecurity` plugin reading `plugin_path` to an
/// AdmissionConfiguration. Returns whether the configuration changed.
fn register_pod_security(admission: &mut Value, plugin_path: &str) -> Result<bool, AdmissionError> {
    let plugins = admission
        .get_mut("plugins")
        .and_then(Value::as_sequence_mut)
        .ok_or(AdmissionError::NoPlugins)?;

    let existing = plugins
        .iter()
        .find(|plugin| plugin.get("name").and_then(Value::as_str) == Some(POD_SECURITY_PLUGIN));
    if let Some(plugin) = existing {
        let path = plugin.get("path").and_then(Value::as_str).unwrap_or_default();
        if path != plugin_path {
            return Err(AdmissionError::PodSecurityConflict {
                existing: path.to_string(),
            });
        }
        return Ok(false);
    }

    let mut entry = Mapping::new();
    entry.insert("name".into(), POD_SECURITY_PLUGIN.into());
    entry.insert("path".into(), plugin_path.into());
    plugins.push(Value::Mapping(entry));
    Ok(true)
}

/// Writes the exemption for `runtimeclass` to `pod_security_config` and
/// points the API server's PodSecurity admission plugin at it.
///
/// The API server reads its admission configuration only at startup; the
/// file is left patched after the run.
#[instrument("admission/configure_pod_security", skip(runtimeclass))]
pub async fn configure_pod_security(
    admission_config: &Path,
    pod_security_config: &Path,
    runtimeclass: &RuntimeClassConfig,
) -> Result<(), AdmissionError> {
    let pod_security_config = std::path::absolute(pod_security_config)
        .map_err(|e| AdmissionError::Write(pod_security_config.to_path_buf(), e))?;
    let plugin_path = pod_security_config.to_string_lossy().into_owned();

    let text = tokio::fs::read_to_string(admission_config)
        .await
        .map_err(|e| AdmissionError::Read(admission_config.to_path_buf(), e))?;
    let mut admission: Value = serde_yaml::from_str(&text)
        .map_err(|e| AdmissionError::Yaml(admission_config.to_path_buf(), e))?;
    let changed = register_pod_security(&mut admission, &plugin_path)?;

    let exemption = serde_yaml::to_string(&pod_security_configuration(runtimeclass))
        .map_err(|e| AdmissionError::Yaml(pod_security_config.clone(), e))?;
    tokio::fs::write(&pod_security_config, exemption)
        .await
        .map_err(|e| AdmissionError::Write(pod_security_config.clone(), e))?;

    if changed {
        let text = serde_yaml::to_string(&admission)
            .map_err(|e| AdmissionError::Yaml(admission_config.to_path_buf(), e))?;
        tokio::fs::write(admission_config, text)
            .await
            .map_err(|e| AdmissionError::Write(admission_config.to_path_buf(), e))?;
        info!("Registered the PodSecurity plugin in {}", admission_config.display());
    } else {
        info!("PodSecurity plugin already registered.");
    }
    Ok(())
}
