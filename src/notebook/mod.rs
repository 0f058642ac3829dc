//! The in-Job side of the acceptance run: discover the notebooks, execute
//! them and fail when any of them produced an error.

mod discovery;
pub mod filter;
pub mod model;
pub mod runner;
pub mod suite;

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

pub use self::discovery::discover_notebooks;
pub use self::filter::NameFilter;
pub use self::model::{Notebook, NotebookOutcome};
pub use self::runner::{ExecutedNotebook, NbconvertRunner, NotebookRunner};
pub use self::suite::{SuiteReport, SuiteSelection, run_suite};

#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{0} is not a valid notebook: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("{0} is not a usable notebook path")]
    InvalidPath(PathBuf),

    #[error("Failed to run {0}: {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Invalid notebook search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to walk notebook directory: {0}")]
    Walk(#[from] glob::GlobError),
}
