//! Path layout for a run directory: `<base>/<run_id>/...`.

use std::path::{Path, PathBuf};

/// Resolves the well-known files and directories inside one run's directory.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(base: &Path, run_id: &str) -> Self {
        Self {
            root: base.join(run_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_json(&self) -> PathBuf {
        self.root.join("run.json")
    }

    pub fn nodes_jsonl(&self) -> PathBuf {
        self.root.join("nodes.jsonl")
    }

    pub fn results_jsonl(&self) -> PathBuf {
        self.root.join("results.jsonl")
    }

    pub fn queue_jsonl(&self) -> PathBuf {
        self.root.join("queue.jsonl")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn wiki_dir(&self) -> PathBuf {
        self.artifacts_dir().join("wiki")
    }

    pub fn wiki_nodes_dir(&self) -> PathBuf {
        self.wiki_dir().join("nodes")
    }

    pub fn review_dir(&self) -> PathBuf {
        self.artifacts_dir().join("review")
    }

    /// Path for a sanitized node's wiki document, relative to the run root
    /// (the form stored in `artifacts[]`/`output_index`).
    pub fn wiki_node_relative_path(&self, sanitized_node_id: &str) -> String {
        format!("artifacts/wiki/nodes/{sanitized_node_id}.md")
    }
}

/// Replace characters that are unsafe in a filename with `_`.
pub fn sanitize_for_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
