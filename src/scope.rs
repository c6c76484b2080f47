//! Scope Walker: bounded, cycle-safe directory traversal producing the
//! file-level metrics the decision engine and leaf executor operate on.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Directories that would otherwise dominate naive file-count/byte-total
/// split decisions without contributing reviewable content.
const NOISE_DIRS: &[&str] = &["target", "node_modules", ".git", "__pycache__", "dist", "build"];

fn is_noise(name: &str) -> bool {
    name.starts_with('.') || NOISE_DIRS.contains(&name)
}

/// Result of walking a node's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeMetrics {
    pub file_count: u64,
    pub total_bytes: u64,
    pub sampled_files: Vec<PathBuf>,
}

impl ScopeMetrics {
    /// Extension histogram over `sampled_files`, most frequent first.
    pub fn extension_histogram(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for path in &self.sampled_files {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string();
            *counts.entry(ext).or_default() += 1;
        }
        let mut histogram: Vec<(String, usize)> = counts.into_iter().collect();
        histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        histogram
    }
}

/// Walk `paths` depth-first, capped at `max_files` sampled entries, with
/// cycle suppression on the canonicalized absolute path. Inaccessible
/// entries are silently skipped.
pub fn walk_scope(paths: &[String], max_files: usize) -> ScopeMetrics {
    let mut metrics = ScopeMetrics::default();
    let mut visited: HashSet<PathBuf> = HashSet::new();

    for raw in paths {
        walk_one(Path::new(raw), &mut visited, &mut metrics, max_files);
    }

    metrics
}

fn walk_one(path: &Path, visited: &mut HashSet<PathBuf>, metrics: &mut ScopeMetrics, max_files: usize) {
    let canonical = match path.canonicalize() {
        Ok(c) => c,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "skipping inaccessible scope entry");
            return;
        }
    };
    if !visited.insert(canonical.clone()) {
        return;
    }

    let metadata = match std::fs::symlink_metadata(&canonical) {
        Ok(m) => m,
        Err(err) => {
            tracing::debug!(path = %canonical.display(), error = %err, "skipping unreadable entry");
            return;
        }
    };

    if metadata.is_dir() {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&canonical) {
            Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(err) => {
                tracing::debug!(path = %canonical.display(), error = %err, "skipping unreadable directory");
                return;
            }
        };
        entries.sort();

        for entry in entries {
            let name = entry
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if is_noise(&name) {
                continue;
            }
            walk_one(&entry, visited, metrics, max_files);
        }
    } else if metadata.is_file() {
        metrics.file_count += 1;
        metrics.total_bytes += metadata.len();
        if metrics.sampled_files.len() < max_files {
            metrics.sampled_files.push(path.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn counts_files_and_bytes_skipping_noise_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/junk.bin"), [0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.rs"), "fn sub() {}").unwrap();

        let metrics = walk_scope(&[dir.path().to_string_lossy().to_string()], 200);
        assert_eq!(metrics.file_count, 2);
        assert!(metrics.sampled_files.iter().any(|p| p.ends_with("a.rs")));
        assert!(metrics.sampled_files.iter().any(|p| p.ends_with("b.rs")));
    }

    #[test]
    fn suppresses_symlink_cycles() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f.txt"), "x").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            let _ = symlink(dir.path(), sub.join("loop"));
        }

        let metrics = walk_scope(&[dir.path().to_string_lossy().to_string()], 200);
        assert_eq!(metrics.file_count, 1);
    }

    #[test]
    fn respects_max_files_sample_cap() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let metrics = walk_scope(&[dir.path().to_string_lossy().to_string()], 3);
        assert_eq!(metrics.sampled_files.len(), 3);
    }

    #[test]
    fn extension_histogram_sorted_by_frequency() {
        let mut metrics = ScopeMetrics::default();
        metrics.sampled_files = vec![
            PathBuf::from("a.rs"),
            PathBuf::from("b.rs"),
            PathBuf::from("c.md"),
        ];
        let hist = metrics.extension_histogram();
        assert_eq!(hist[0], ("rs".to_string(), 2));
        assert_eq!(hist[1], ("md".to_string(), 1));
    }
}
