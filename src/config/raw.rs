use std::path::PathBuf;

use duration_string::DurationString;
use serde::Deserialize;
use thiserror::Error;

use super::polling::RawPollingSet;
use super::{
    Config, Overrides, ProxyConfig, RuntimeClassConfig, SecurityPolicy, TolerationConfig,
};

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(super) struct RawConfig {
    pub(super) namespace: Option<String>,
    pub(super) profile_owner: Option<String>,
    pub(super) job_name: Option<String>,
    pub(super) tests_image: Option<String>,

    /// PodDefault the Kubeflow Pipelines controller syncs into new profiles
    pub(super) kfp_poddefault: Option<String>,

    /// Time given to the remaining PodDefaults to sync before the Job starts
    pub(super) poddefault_settle: Option<DurationString>,

    pub(super) repository: Option<String>,
    pub(super) commit: Option<String>,
    pub(super) runner_build_image: Option<String>,
    pub(super) local_run: Option<bool>,
    pub(super) local_repo_dir: Option<PathBuf>,
    pub(super) filter: Option<String>,
    pub(super) include_gpu_tests: Option<bool>,
    pub(super) include_kubeflow_trainer_tests: Option<bool>,
    pub(super) proxy: Option<ProxyConfig>,
    pub(super) toleration: Option<TolerationConfig>,
    pub(super) security_policy: Option<SecurityPolicy>,
    pub(super) runtimeclass: Option<RuntimeClassConfig>,
    pub(super) admission_config: Option<PathBuf>,
    pub(super) pod_security_config: Option<PathBuf>,

    #[serde(default)]
    pub(super) polling: RawPollingSet,
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("'{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error(
        "'{field}' value '{value}' is not a valid Kubernetes name (lowercase alphanumerics and '-', at most 63 characters)"
    )]
    InvalidName { field: &'static str, value: String },
}

impl RawConfig {
    pub(super) fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            namespace,
            tests_image,
            repository,
            commit,
            filter,
            include_gpu_tests,
            include_kubeflow_trainer_tests,
            local_run,
            admission_config,
            proxy,
            toleration,
            security_policy,
        } = overrides;

        if namespace.is_some() {
            self.namespace = namespace;
        }
        if tests_image.is_some() {
            self.tests_image = tests_image;
        }
        if repository.is_some() {
            self.repository = repository;
        }
        if commit.is_some() {
            self.commit = commit;
        }
        if filter.is_some() {
            self.filter = filter;
        }
        if include_gpu_tests {
            self.include_gpu_tests = Some(true);
        }
        if include_kubeflow_trainer_tests {
            self.include_kubeflow_trainer_tests = Some(true);
        }
        if local_run {
            self.local_run = Some(true);
        }
        if admission_config.is_some() {
            self.admission_config = admission_config;
        }
        if proxy.is_some() {
            self.proxy = proxy;
        }
        if toleration.is_some() {
            self.toleration = toleration;
        }
        if security_policy.is_some() {
            self.security_policy = security_policy;
        }
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, ConfigParseError> {
    if value.trim().is_empty() {
        Err(ConfigParseError::EmptyField { field })
    } else {
        Ok(value)
    }
}

fn kubernetes_name(field: &'static str, value: String) -> Result<String, ConfigParseError> {
    let value = non_empty(field, value)?;
    let valid = value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(value)
    } else {
        Err(ConfigParseError::InvalidName { field, value })
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigParseError;
    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = Config::default();

        let namespace = match raw.namespace {
            Some(namespace) => kubernetes_name("namespace", namespace)?,
            None => defaults.namespace,
        };
        let job_name = match raw.job_name {
            Some(job_name) => kubernetes_name("job_name", job_name)?,
            None => defaults.job_name,
        };
        let kfp_poddefault = match raw.kfp_poddefault {
            Some(name) => kubernetes_name("kfp_poddefault", name)?,
            None => defaults.kfp_poddefault,
        };
        let runtimeclass = match raw.runtimeclass {
            Some(runtimeclass) => RuntimeClassConfig {
                name: kubernetes_name("runtimeclass.name", runtimeclass.name)?,
                handler: non_empty("runtimeclass.handler", runtimeclass.handler)?,
            },
            None => defaults.runtimeclass,
        };

        Ok(Config {
            namespace,
            profile_owner: raw
                .profile_owner
                .map(|v| non_empty("profile_owner", v))
                .transpose()?
                .unwrap_or(defaults.profile_owner),
            job_name,
            tests_image: raw
                .tests_image
                .map(|v| non_empty("tests_image", v))
                .transpose()?
                .unwrap_or(defaults.tests_image),
            kfp_poddefault,
            poddefault_settle: raw
                .poddefault_settle
                .map_or(defaults.poddefault_settle, Into::into),
            repository: raw.repository.filter(|r| !r.trim().is_empty()),
            commit: raw.commit.filter(|c| !c.trim().is_empty()),
            runner_build_image: raw
                .runner_build_image
                .map(|v| non_empty("runner_build_image", v))
                .transpose()?
                .unwrap_or(defaults.runner_build_image),
            local_run: raw.local_run.unwrap_or(defaults.local_run),
            local_repo_dir: raw.local_repo_dir.unwrap_or(defaults.local_repo_dir),
            filter: raw.filter.filter(|f| !f.trim().is_empty()),
            include_gpu_tests: raw.include_gpu_tests.unwrap_or(defaults.include_gpu_tests),
            include_kubeflow_trainer_tests: raw
                .include_kubeflow_trainer_tests
                .unwrap_or(defaults.include_kubeflow_trainer_tests),
            proxy: raw.proxy,
            toleration: raw.toleration,
            security_policy: raw.security_policy,
            runtimeclass,
            admission_config: raw.admission_config,
            pod_security_config: raw
                .pod_security_config
                .unwrap_or(defaults.pod_security_config),
            polling: raw.polling.resolve(),
        })
    }
}
