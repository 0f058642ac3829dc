use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::NotebookError;

const CHECKPOINTS_DIR: &str = ".ipynb_checkpoints";

/// Finds every `.ipynb` below `dir`, keyed by file stem. Jupyter checkpoint
/// copies are ignored. A missing directory yields no notebooks.
pub fn discover_notebooks(dir: &Path) -> Result<BTreeMap<String, PathBuf>, NotebookError> {
    let mut notebooks = BTreeMap::new();
    if !dir.is_dir() {
        warn!("Notebook directory {} does not exist", dir.display());
        return Ok(notebooks);
    }

    let pattern = dir.join("**").join("*.ipynb");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| NotebookError::InvalidPath(dir.to_path_buf()))?;

    for entry in glob::glob(pattern)? {
        let path = entry?;
        if path
            .components()
            .any(|component| component.as_os_str() == CHECKPOINTS_DIR)
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        debug!("Discovered notebook {} at {}", stem, path.display());
        if let Some(previous) = notebooks.insert(stem.to_string(), path.clone()) {
            warn!(
                "Notebook name '{}' is used by both {} and {}; keeping the latter",
                stem,
                previous.display(),
                path.display()
            );
        }
    }

    Ok(notebooks)
}
