use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{Instrument, error, info, info_span, instrument};

use super::filter::NameFilter;
use super::model::NotebookOutcome;
use super::runner::NotebookRunner;
use super::{NotebookError, discover_notebooks};
use crate::error::{SpannedErr, SpannedExt};

#[derive(Debug, Clone)]
pub struct SuiteSelection {
    pub cpu_dirs: Vec<PathBuf>,
    pub gpu_dir: PathBuf,
    pub trainer_dir: PathBuf,
    pub include_gpu_tests: bool,
    pub include_kubeflow_trainer_tests: bool,
    pub filter: Option<NameFilter>,
}

impl SuiteSelection {
    /// Notebooks to run, by name. Later directories (GPU, then Trainer) win
    /// over CPU notebooks of the same name.
    pub fn collect(&self) -> Result<BTreeMap<String, PathBuf>, NotebookError> {
        let mut notebooks = BTreeMap::new();
        for dir in &self.cpu_dirs {
            notebooks.extend(discover_notebooks(dir)?);
        }
        if self.include_gpu_tests {
            notebooks.extend(discover_notebooks(&self.gpu_dir)?);
        }
        if self.include_kubeflow_trainer_tests {
            notebooks.extend(discover_notebooks(&self.trainer_dir)?);
        }

        if let Some(filter) = &self.filter {
            notebooks.retain(|name, _| filter.matches(name));
        }
        Ok(notebooks)
    }
}

#[derive(Debug)]
pub struct NotebookResult {
    pub name: String,
    pub path: PathBuf,
    pub outcome: Result<NotebookOutcome, SpannedErr<NotebookError>>,
}

impl NotebookResult {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.is_success())
    }
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<NotebookResult>,
}

impl SuiteReport {
    pub fn failures(&self) -> impl Iterator<Item = &NotebookResult> {
        self.results.iter().filter(|result| !result.passed())
    }

    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[instrument("notebook_suite", skip_all, fields(notebooks = notebooks.len()))]
pub async fn run_suite<R: NotebookRunner>(
    runner: &R,
    notebooks: BTreeMap<String, PathBuf>,
) -> SuiteReport {
    info!("NOTEBOOKS: {:?}", notebooks.keys().collect::<Vec<_>>());

    let mut report = SuiteReport::default();
    for (name, path) in notebooks {
        let outcome = async {
            info!("Running {}...", name);
            let outcome = runner
                .execute(&path)
                .await
                .with_span_trace()
                .map(|executed| executed.outcome);
            match &outcome {
                Ok(NotebookOutcome::Success) => info!("{} passed.", name),
                Ok(NotebookOutcome::CellFailure {
                    cell_index,
                    error_name,
                    error_value,
                    traceback,
                }) => {
                    error!("{}", traceback);
                    error!(
                        "{} failed in cell {} with {}: {}",
                        name, cell_index, error_name, error_value
                    );
                }
                Err(e) => error!("{} could not be executed: {}", name, e),
            }
            outcome
        }
        .instrument(info_span!("notebook", name = %name))
        .await;

        report.results.push(NotebookResult {
            name,
            path,
            outcome,
        });
    }

    let failed = report.failures().count();
    info!(
        "{} notebook(s) run, {} passed, {} failed.",
        report.results.len(),
        report.results.len() - failed,
        failed
    );
    report
}
