pub mod polling;
mod raw;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use self::polling::PollingSet;
use self::raw::RawConfig;

pub use self::raw::ConfigParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub namespace: String,
    pub profile_owner: String,
    pub job_name: String,
    pub tests_image: String,
    pub kfp_poddefault: String,
    pub poddefault_settle: Duration,
    /// Repository holding this driver and the notebooks. Defaults to the
    /// `origin` remote of the current checkout.
    pub repository: Option<String>,
    pub commit: Option<String>,
    pub runner_build_image: String,
    pub local_run: bool,
    pub local_repo_dir: PathBuf,
    pub filter: Option<String>,
    pub include_gpu_tests: bool,
    pub include_kubeflow_trainer_tests: bool,
    pub proxy: Option<ProxyConfig>,
    pub toleration: Option<TolerationConfig>,
    pub security_policy: Option<SecurityPolicy>,
    pub runtimeclass: RuntimeClassConfig,
    /// kube-apiserver admission configuration patched on local runs.
    pub admission_config: Option<PathBuf>,
    pub pod_security_config: PathBuf,
    pub polling: PollingSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "test-kubeflow".to_string(),
            profile_owner: "admin".to_string(),
            job_name: "test-kubeflow".to_string(),
            tests_image: "kubeflownotebookswg/jupyter-scipy:v1.10.0-rc.1".to_string(),
            kfp_poddefault: "access-ml-pipeline".to_string(),
            poddefault_settle: Duration::from_secs(10),
            repository: None,
            commit: None,
            // glibc no newer than the jupyter images'
            runner_build_image: "rust:1-slim-bullseye".to_string(),
            local_run: false,
            local_repo_dir: PathBuf::from("."),
            filter: None,
            include_gpu_tests: false,
            include_kubeflow_trainer_tests: false,
            proxy: None,
            toleration: None,
            security_policy: None,
            runtimeclass: RuntimeClassConfig::default(),
            admission_config: None,
            pod_security_config: PathBuf::from("pod-security-admission-configuration.yaml"),
            polling: PollingSet::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TolerationConfig {
    pub key: String,
    pub operator: Option<String>,
    pub value: Option<String>,
    pub effect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SecurityPolicy {
    Privileged,
    Baseline,
    Restricted,
}

impl SecurityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityPolicy::Privileged => "privileged",
            SecurityPolicy::Baseline => "baseline",
            SecurityPolicy::Restricted => "restricted",
        }
    }
}

/// RuntimeClass created for local runs, where the test pod needs an
/// exemption from Pod Security Standards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeClassConfig {
    pub name: String,
    pub handler: String,
}

impl Default for RuntimeClassConfig {
    fn default() -> Self {
        Self {
            name: "uats".to_string(),
            handler: "runc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub tests_image: Option<String>,
    pub repository: Option<String>,
    pub commit: Option<String>,
    pub filter: Option<String>,
    pub include_gpu_tests: bool,
    pub include_kubeflow_trainer_tests: bool,
    pub local_run: bool,
    pub admission_config: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
    pub toleration: Option<TolerationConfig>,
    pub security_policy: Option<SecurityPolicy>,
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file '{0}': {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}': {1}")]
    Yaml(PathBuf, #[source] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] ConfigParseError),

    #[error("Cannot determine the tests to check out: {0}")]
    Source(String),

    #[error(
        "The checkout tracks '{origin}', not '{repository}'. Pass --commit for a commit of '{repository}'"
    )]
    RepositoryMismatch { repository: String, origin: String },
}

impl Config {
    #[instrument("config/load", skip(overrides))]
    pub async fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigLoadError> {
        let mut raw = match path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ConfigLoadError::Io(path.to_path_buf(), e))?;
                serde_yaml::from_str::<RawConfig>(&text)
                    .map_err(|e| ConfigLoadError::Yaml(path.to_path_buf(), e))?
            }
            None => RawConfig::default(),
        };
        raw.apply(overrides);
        Ok(Config::try_from(raw)?)
    }

    /// Fills `repository` and `commit` from the current checkout when unset.
    /// Local runs mount the checkout instead of cloning it and need neither.
    #[instrument("config/resolve_source", skip(self))]
    pub async fn resolve_source(&mut self) -> Result<(), ConfigLoadError> {
        if self.local_run || (self.repository.is_some() && self.commit.is_some()) {
            return Ok(());
        }

        let origin = git(&["remote", "get-url", "origin"]).await?;
        match &self.repository {
            None => self.repository = Some(origin),
            Some(repository) if same_repository(repository, &origin) => {}
            Some(repository) => {
                return Err(ConfigLoadError::RepositoryMismatch {
                    repository: repository.clone(),
                    origin,
                });
            }
        }
        if self.commit.is_none() {
            self.commit = Some(git(&["rev-parse", "HEAD"]).await?);
        }

        info!(
            "Testing {} at commit {}",
            self.repository.as_deref().unwrap_or_default(),
            self.commit.as_deref().unwrap_or_default()
        );
        Ok(())
    }
}

async fn git(args: &[&str]) -> Result<String, ConfigLoadError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| ConfigLoadError::Source(format!("git {}: {}", args.join(" "), e)))?;
    if !output.status.success() {
        return Err(ConfigLoadError::Source(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Compares remote URLs ignoring transport, credentials and a `.git` suffix,
/// so `git@github.com:org/repo.git` matches `https://github.com/org/repo`.
fn same_repository(a: &str, b: &str) -> bool {
    fn normalize(url: &str) -> String {
        let url = url.trim().trim_end_matches('/');
        let url = url.strip_suffix(".git").unwrap_or(url);
        let url = url.split_once("://").map_or(url, |(_, rest)| rest);
        let url = url.split_once('@').map_or(url, |(_, host)| host);
        url.replacen(':', "/", 1).to_lowercase()
    }
    normalize(a) == normalize(b)
}
