//! The parts of the Jupyter notebook format (nbformat 4) the suite inspects.
//! Everything else is carried through untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::NotebookError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Output>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<Vec<String>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotebookOutcome {
    Success,
    CellFailure {
        cell_index: usize,
        error_name: String,
        error_value: String,
        traceback: String,
    },
}

impl NotebookOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NotebookOutcome::Success)
    }
}

impl Notebook {
    pub async fn read(path: &Path) -> Result<Self, NotebookError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NotebookError::Io(path.to_path_buf(), e))?;
        serde_json::from_str(&text).map_err(|e| NotebookError::Parse(path.to_path_buf(), e))
    }

    /// The first error output decides the outcome, whatever the cell's tags.
    pub fn outcome(&self) -> NotebookOutcome {
        self.cells
            .iter()
            .enumerate()
            .find_map(|(index, cell)| {
                let error = cell
                    .outputs
                    .as_deref()?
                    .iter()
                    .find(|output| output.output_type == "error")?;
                Some(NotebookOutcome::CellFailure {
                    cell_index: index,
                    error_name: error.ename.clone().unwrap_or_default(),
                    error_value: error.evalue.clone().unwrap_or_default(),
                    traceback: format_traceback(error.traceback.as_deref().unwrap_or_default()),
                })
            })
            .unwrap_or(NotebookOutcome::Success)
    }
}

pub fn format_traceback(lines: &[String]) -> String {
    strip_ansi(&lines.join("\n"))
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            // CSI sequence ends at the first byte in '@'..='~'
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn notebook(value: Value) -> Notebook {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_success_without_error_outputs() {
        let nb = notebook(json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": [
                { "cell_type": "markdown", "metadata": {}, "source": "# Title" },
                {
                    "cell_type": "code",
                    "metadata": { "tags": ["pytest-skip"] },
                    "source": "print(1)",
                    "outputs": [{ "output_type": "stream", "name": "stdout", "text": "1\n" }],
                },
            ],
        }));

        assert_eq!(nb.outcome(), NotebookOutcome::Success);
        assert_eq!(nb.cells[1].metadata.tags, vec!["pytest-skip"]);
    }

    #[test]
    fn test_first_error_output_fails() {
        let nb = notebook(json!({
            "cells": [
                { "cell_type": "code", "metadata": {}, "source": "", "outputs": [] },
                {
                    "cell_type": "code",
                    "metadata": { "tags": ["raises-exception"] },
                    "source": "assert False",
                    "outputs": [{
                        "output_type": "error",
                        "ename": "AssertionError",
                        "evalue": "pipeline run failed",
                        "traceback": ["\u{1b}[0;31mAssertionError\u{1b}[0m", "pipeline run failed"],
                    }],
                },
                {
                    "cell_type": "code",
                    "metadata": {},
                    "source": "",
                    "outputs": [{ "output_type": "error", "ename": "NameError", "evalue": "x" }],
                },
            ],
        }));

        assert_eq!(
            nb.outcome(),
            NotebookOutcome::CellFailure {
                cell_index: 1,
                error_name: "AssertionError".to_string(),
                error_value: "pipeline run failed".to_string(),
                traceback: "AssertionError\npipeline run failed".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let value = json!({
            "nbformat": 4,
            "metadata": { "kernelspec": { "name": "python3" } },
            "cells": [{ "cell_type": "code", "metadata": { "collapsed": true }, "source": "x", "execution_count": 3, "outputs": [] }],
        });

        let back = serde_json::to_value(notebook(value.clone())).unwrap();

        assert_eq!(back, value);
    }
}
