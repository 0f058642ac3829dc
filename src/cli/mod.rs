use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::config::{Overrides, ProxyConfig, SecurityPolicy, TolerationConfig};
use crate::notebook::filter::{FilterError, NameFilter};
use crate::notebook::suite::SuiteSelection;

#[derive(Debug, Parser)]
#[clap(name = "kubeflow-uats", version, about = "Kubeflow user acceptance tests")]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) subcommand: SubCommands,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum SubCommands {
    /// Run the acceptance scenario against the current cluster
    Run(RunArgs),

    /// Execute the notebook suite (inside the test Job)
    Notebooks(NotebooksArgs),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct RunArgs {
    /// YAML config file; every setting has a default
    #[clap(short, long)]
    pub(crate) config: Option<PathBuf>,

    /// Proxy settings: http_proxy=.. https_proxy=.. no_proxy=..
    #[clap(long, num_args = 1.., value_parser = parse_key_val)]
    pub(crate) proxy: Vec<(String, String)>,

    /// Keyword expression selecting notebooks, e.g. "kfp or katib"
    #[clap(long)]
    pub(crate) filter: Option<String>,

    /// Also run the notebooks under the gpu directory
    #[clap(long)]
    pub(crate) include_gpu_tests: bool,

    /// Also run the Kubeflow Trainer notebooks
    #[clap(long)]
    pub(crate) include_kubeflow_trainer_tests: bool,

    /// GPU toleration: key=.. [operator=..] [value=..] [effect=..]
    #[clap(long, num_args = 1.., value_parser = parse_key_val)]
    pub(crate) toleration: Vec<(String, String)>,

    #[clap(long, value_enum)]
    pub(crate) security_policy: Option<SecurityPolicy>,

    #[clap(long)]
    pub(crate) namespace: Option<String>,

    #[clap(long)]
    pub(crate) tests_image: Option<String>,

    /// Repository to clone (defaults to the checkout's origin)
    #[clap(long)]
    pub(crate) repository: Option<String>,

    /// Commit of the tests to clone (defaults to the checked out HEAD)
    #[clap(long)]
    pub(crate) commit: Option<String>,

    /// Mount the local checkout instead of cloning the repository
    #[clap(long)]
    pub(crate) local: bool,

    /// kube-apiserver AdmissionConfiguration to register the PodSecurity
    /// exemption in (local runs)
    #[clap(long, alias = "k8s-admission-config-file-path")]
    pub(crate) admission_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct NotebooksArgs {
    #[clap(long = "dir", default_value = "notebooks/cpu")]
    pub(crate) dirs: Vec<PathBuf>,

    #[clap(long, default_value = "notebooks/gpu")]
    pub(crate) gpu_dir: PathBuf,

    #[clap(long, default_value = "notebooks/kubeflow-trainer")]
    pub(crate) trainer_dir: PathBuf,

    #[clap(long)]
    pub(crate) filter: Option<NameFilter>,

    #[clap(long)]
    pub(crate) include_gpu_tests: bool,

    #[clap(long)]
    pub(crate) include_kubeflow_trainer_tests: bool,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Unknown key '{key}' for --{option}")]
    UnknownKey { option: &'static str, key: String },

    #[error("Missing key '{key}' for --{option}")]
    MissingKey { option: &'static str, key: &'static str },

    #[error("Invalid --filter: {0}")]
    Filter(#[from] FilterError),
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    Ok((key.trim().to_string(), value.to_string()))
}

fn take(pairs: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    let index = pairs.iter().position(|(k, _)| k == key)?;
    Some(pairs.remove(index).1)
}

fn reject_rest(option: &'static str, pairs: Vec<(String, String)>) -> Result<(), CliError> {
    match pairs.into_iter().next() {
        Some((key, _)) => Err(CliError::UnknownKey { option, key }),
        None => Ok(()),
    }
}

fn proxy(mut pairs: Vec<(String, String)>) -> Result<Option<ProxyConfig>, CliError> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut required = |key: &'static str| {
        take(&mut pairs, key).ok_or(CliError::MissingKey {
            option: "proxy",
            key,
        })
    };
    let proxy = ProxyConfig {
        http_proxy: required("http_proxy")?,
        https_proxy: required("https_proxy")?,
        no_proxy: required("no_proxy")?,
    };
    reject_rest("proxy", pairs)?;
    Ok(Some(proxy))
}

fn toleration(mut pairs: Vec<(String, String)>) -> Result<Option<TolerationConfig>, CliError> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let toleration = TolerationConfig {
        key: take(&mut pairs, "key").ok_or(CliError::MissingKey {
            option: "toleration",
            key: "key",
        })?,
        operator: take(&mut pairs, "operator"),
        value: take(&mut pairs, "value"),
        effect: take(&mut pairs, "effect"),
    };
    reject_rest("toleration", pairs)?;
    Ok(Some(toleration))
}

impl RunArgs {
    pub(crate) fn overrides(&self) -> Result<Overrides, CliError> {
        if let Some(filter) = &self.filter {
            filter.parse::<NameFilter>()?;
        }
        Ok(Overrides {
            namespace: self.namespace.clone(),
            tests_image: self.tests_image.clone(),
            repository: self.repository.clone(),
            commit: self.commit.clone(),
            filter: self.filter.clone(),
            include_gpu_tests: self.include_gpu_tests,
            include_kubeflow_trainer_tests: self.include_kubeflow_trainer_tests,
            local_run: self.local,
            admission_config: self.admission_config.clone(),
            proxy: proxy(self.proxy.clone())?,
            toleration: toleration(self.toleration.clone())?,
            security_policy: self.security_policy,
        })
    }
}

impl NotebooksArgs {
    pub(crate) fn selection(&self) -> SuiteSelection {
        SuiteSelection {
            cpu_dirs: self.dirs.clone(),
            gpu_dir: self.gpu_dir.clone(),
            trainer_dir: self.trainer_dir.clone(),
            include_gpu_tests: self.include_gpu_tests,
            include_kubeflow_trainer_tests: self.include_kubeflow_trainer_tests,
            filter: self.filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["kubeflow-uats", "run"].iter().chain(args)).unwrap();
        match cli.subcommand {
            SubCommands::Run(args) => args,
            other => panic!("unexpected subcommand {other:?}"),
        }
    }

    #[test]
    fn test_run_overrides() {
        let args = run_args(&[
            "--proxy",
            "http_proxy=http://proxy:3128",
            "https_proxy=\"http://proxy:3128\"",
            "no_proxy=.svc,10.0.0.0/8",
            "--filter",
            "kfp or katib",
            "--include-gpu-tests",
            "--include-kubeflow-trainer-tests",
            "--k8s-admission-config-file-path",
            "/etc/kubernetes/admission.yaml",
            "--toleration",
            "key=nvidia.com/gpu",
            "effect=NoSchedule",
            "--security-policy",
            "restricted",
            "--local",
        ]);

        let overrides = args.overrides().unwrap();

        let proxy = overrides.proxy.unwrap();
        assert_eq!(proxy.https_proxy, "http://proxy:3128");
        assert_eq!(proxy.no_proxy, ".svc,10.0.0.0/8");
        let toleration = overrides.toleration.unwrap();
        assert_eq!(toleration.key, "nvidia.com/gpu");
        assert_eq!(toleration.effect.as_deref(), Some("NoSchedule"));
        assert!(toleration.operator.is_none());
        assert_eq!(overrides.filter.as_deref(), Some("kfp or katib"));
        assert_eq!(overrides.security_policy, Some(SecurityPolicy::Restricted));
        assert!(overrides.include_gpu_tests);
        assert!(overrides.include_kubeflow_trainer_tests);
        assert_eq!(
            overrides.admission_config,
            Some(PathBuf::from("/etc/kubernetes/admission.yaml"))
        );
        assert!(overrides.local_run);
    }

    #[test]
    fn test_incomplete_proxy_rejected() {
        let args = run_args(&["--proxy", "http_proxy=http://proxy:3128"]);
        assert!(matches!(
            args.overrides(),
            Err(CliError::MissingKey {
                option: "proxy",
                key: "https_proxy"
            })
        ));
    }

    #[test]
    fn test_unknown_toleration_key_rejected() {
        let args = run_args(&["--toleration", "key=gpu", "tolerationSeconds=30"]);
        assert!(matches!(
            args.overrides(),
            Err(CliError::UnknownKey { option: "toleration", ref key }) if key == "tolerationSeconds"
        ));
    }

    #[test]
    fn test_invalid_filter_rejected_early() {
        let args = run_args(&["--filter", "kfp or"]);
        assert!(matches!(args.overrides(), Err(CliError::Filter(_))));
    }

    #[test]
    fn test_notebooks_defaults() {
        let cli = Cli::try_parse_from(["kubeflow-uats", "notebooks", "--filter", "not gpu"]).unwrap();
        let SubCommands::Notebooks(args) = cli.subcommand else {
            panic!("expected notebooks subcommand");
        };
        let selection = args.selection();

        assert_eq!(selection.cpu_dirs, vec![PathBuf::from("notebooks/cpu")]);
        assert_eq!(selection.gpu_dir, PathBuf::from("notebooks/gpu"));
        assert_eq!(selection.trainer_dir, PathBuf::from("notebooks/kubeflow-trainer"));
        assert!(!selection.include_gpu_tests);
        assert!(!selection.include_kubeflow_trainer_tests);
        assert!(selection.filter.unwrap().matches("kfp"));
    }
}
