use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{Instrument, debug, info, trace_span};

use super::NotebookError;
use super::model::{Notebook, NotebookOutcome};

#[derive(Debug, Clone)]
pub struct ExecutedNotebook {
    pub notebook: Notebook,
    pub outcome: NotebookOutcome,
}

#[allow(async_fn_in_trait)]
pub trait NotebookRunner {
    async fn execute(&self, path: &Path) -> Result<ExecutedNotebook, NotebookError>;
}

/// Executes notebooks with `jupyter nbconvert`, writing the executed notebook
/// over the original file. A `requirements.txt` next to the notebook is
/// installed first.
#[derive(Debug, Clone)]
pub struct NbconvertRunner {
    pub jupyter: PathBuf,
    pub python: PathBuf,
    pub kernel: String,
    pub skip_tag: String,
}

impl Default for NbconvertRunner {
    fn default() -> Self {
        Self {
            jupyter: PathBuf::from("jupyter"),
            python: PathBuf::from("python3"),
            kernel: "python3".to_string(),
            skip_tag: "pytest-skip".to_string(),
        }
    }
}

impl NbconvertRunner {
    async fn install_requirements(&self, dir: &Path) -> Result<(), NotebookError> {
        let requirements = dir.join("requirements.txt");
        let present = tokio::fs::try_exists(&requirements)
            .await
            .map_err(|e| NotebookError::Io(requirements.clone(), e))?;
        if !present {
            debug!("No requirements.txt in {}", dir.display());
            return Ok(());
        }

        info!("Installing requirements from {}...", requirements.display());
        let mut command = Command::new(&self.python);
        command
            .args(["-m", "pip", "install", "-r", "requirements.txt"])
            .current_dir(dir);
        run_command(command).await
    }

    fn nbconvert(&self, dir: &Path, file_name: &str) -> Command {
        let mut command = Command::new(&self.jupyter);
        command
            .args([
                "nbconvert",
                "--to",
                "notebook",
                "--execute",
                "--inplace",
                "--allow-errors",
                "--ExecutePreprocessor.timeout=-1",
            ])
            .arg(format!("--ExecutePreprocessor.kernel_name={}", self.kernel))
            .arg(format!(
                "--ExecutePreprocessor.skip_cells_with_tag={}",
                self.skip_tag
            ))
            .arg(file_name)
            .current_dir(dir);
        command
    }
}

impl NotebookRunner for NbconvertRunner {
    async fn execute(&self, path: &Path) -> Result<ExecutedNotebook, NotebookError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| NotebookError::InvalidPath(path.to_path_buf()))?;

        async {
            self.install_requirements(dir).await?;
            run_command(self.nbconvert(dir, file_name)).await
        }
        .instrument(trace_span!("nbconvert", notebook = %path.display()))
        .await?;

        let notebook = Notebook::read(path).await?;
        let outcome = notebook.outcome();
        Ok(ExecutedNotebook { notebook, outcome })
    }
}

async fn run_command(mut command: Command) -> Result<(), NotebookError> {
    let rendered = format!("{:?}", command.as_std());
    let output = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| NotebookError::Spawn(rendered.clone(), e))?
        .wait_with_output()
        .await
        .map_err(|e| NotebookError::Spawn(rendered.clone(), e))?;

    if !output.status.success() {
        return Err(NotebookError::CommandFailed {
            command: rendered,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
