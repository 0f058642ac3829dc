use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use self::cli::{Cli, CliError, NotebooksArgs, RunArgs, SubCommands};
use self::config::Config;
use self::kubernetes_objects::kube_cluster::KubeCluster;
use self::notebook::{NbconvertRunner, run_suite};
use self::routine::acceptance::{AcceptanceContext, ScenarioError};
use self::routine::shutdown::Shutdown;

pub mod cli;
pub mod config;
pub mod error;
pub mod kubernetes_objects;
pub mod notebook;
pub mod polling;
pub mod routine;
#[cfg(test)]
mod test_support;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid arguments.\n{0}")]
    CliError(#[from] CliError),

    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] config::ConfigLoadError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("Acceptance run stopped due to following error:\n{0}")]
    ScenarioError(#[from] ScenarioError),

    #[error("Failed to collect notebooks.\n{0}")]
    NotebookError(#[from] notebook::NotebookError),

    #[error("No notebooks selected")]
    NoNotebooks,

    #[error("{failed} of {total} notebook(s) failed")]
    NotebooksFailed { failed: usize, total: usize },
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::ScenarioError(e) => e.span_trace(),
            _ => None,
        }
    }
}

pub async fn app() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.subcommand {
        SubCommands::Run(args) => run(args).await,
        SubCommands::Notebooks(args) => notebooks(args).await,
    }
}

async fn run(args: RunArgs) -> Result<(), AppError> {
    let overrides = args.overrides()?;
    let mut config = Config::load(args.config.as_deref(), overrides).await?;
    config.resolve_source().await?;

    info!("Config Loaded.");

    let client = kube::Client::try_default().await?;

    info!("Kubernetes Client Initialized.");

    let mut context = AcceptanceContext::new(config, KubeCluster::new(client), Shutdown::listen());
    context.run().await?;

    Ok(())
}

async fn notebooks(args: NotebooksArgs) -> Result<(), AppError> {
    let notebooks = args.selection().collect()?;
    if notebooks.is_empty() {
        return Err(AppError::NoNotebooks);
    }

    let report = run_suite(&NbconvertRunner::default(), notebooks).await;
    let failed = report.failures().count();
    if failed > 0 {
        return Err(AppError::NotebooksFailed {
            failed,
            total: report.results.len(),
        });
    }

    Ok(())
}
