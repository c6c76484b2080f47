//! Split Planner: turns one node's scope into non-overlapping child
//! scopes with distributed budgets.

use std::path::{Path, PathBuf};

use crate::store::{sanitize_for_filename, Budgets, Node, ScopeRef, ScopeType};

/// Cost of a split charged to the parent before the remainder is divided
/// across children.
const SPLIT_LLM_CALL_COST: i64 = 1;
const SPLIT_TOKEN_COST: i64 = 4_000;

/// Files are grouped into chunks of this size when a scope has no
/// subdirectories to split along.
const FILE_GROUP_SIZE: usize = 8;

pub struct PlannedChild {
    pub node_id: String,
    pub scope_type: ScopeType,
    pub scope_ref: ScopeRef,
    pub budgets: Budgets,
}

/// Enumerate non-overlapping child scopes for `parent`. Prefers one child
/// per immediate subdirectory; if the scope's paths contain no
/// subdirectories, falls back to grouping the leaf files into chunks of up
/// to [`FILE_GROUP_SIZE`].
///
/// Returns an empty vec if the scope enumerates to nothing splittable —
/// callers must apply the `split_no_children_fallback_leaf` fallback.
pub fn plan_children(parent: &Node) -> Vec<PlannedChild> {
    let (dirs, files) = enumerate_immediate_children(&parent.scope_ref.paths);

    if !dirs.is_empty() {
        let child_budgets = distribute_budgets(&parent.budgets, dirs.len());
        dirs.into_iter()
            .enumerate()
            .map(|(i, dir)| {
                let label = dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("dir")
                    .to_string();
                PlannedChild {
                    node_id: child_node_id(&parent.node_id, i, &label),
                    scope_type: ScopeType::Dir,
                    scope_ref: ScopeRef { paths: vec![dir.to_string_lossy().to_string()] },
                    budgets: child_budgets,
                }
            })
            .collect()
    } else {
        let child_budgets = distribute_budgets(&parent.budgets, file_group_count(&files));
        files
            .chunks(FILE_GROUP_SIZE)
            .enumerate()
            .map(|(i, group)| {
                let label = format!("group-{i}");
                PlannedChild {
                    node_id: child_node_id(&parent.node_id, i, &label),
                    scope_type: ScopeType::FileGroup,
                    scope_ref: ScopeRef {
                        paths: group.iter().map(|p| p.to_string_lossy().to_string()).collect(),
                    },
                    budgets: child_budgets,
                }
            })
            .collect()
    }
}

fn file_group_count(files: &[PathBuf]) -> usize {
    if files.is_empty() {
        0
    } else {
        (files.len() + FILE_GROUP_SIZE - 1) / FILE_GROUP_SIZE
    }
}

/// Hierarchical id: `parent_id + ":" + index + ":" + sanitized_label`.
fn child_node_id(parent_id: &str, index: usize, label: &str) -> String {
    format!("{parent_id}:{index}:{}", sanitize_for_filename(label))
}

/// Deduct the split cost from the parent's remaining budgets, then split the
/// remainder evenly (integer division) across `child_count` children. The
/// deadline is inherited verbatim.
fn distribute_budgets(parent: &Budgets, child_count: usize) -> Budgets {
    let child_count = child_count.max(1) as i64;
    let remaining_llm_calls = (parent.remaining_llm_calls - SPLIT_LLM_CALL_COST).max(0);
    let remaining_tokens = (parent.remaining_tokens - SPLIT_TOKEN_COST).max(0);
    Budgets {
        max_depth: parent.max_depth,
        remaining_llm_calls: remaining_llm_calls / child_count,
        remaining_tokens: remaining_tokens / child_count,
        deadline_epoch_ms: parent.deadline_epoch_ms,
    }
}

/// Walk one level into each of `paths`: directories entered become entries
/// in the first return value, files become entries in the second. A path
/// that cannot be read contributes nothing.
fn enumerate_immediate_children(paths: &[String]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for raw in paths {
        let path = Path::new(raw);
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if metadata.is_dir() {
            let mut entries: Vec<PathBuf> = match std::fs::read_dir(path) {
                Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
                Err(_) => continue,
            };
            entries.sort();
            for entry in entries {
                let entry_meta = match std::fs::symlink_metadata(&entry) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if entry_meta.is_dir() {
                    dirs.push(entry);
                } else if entry_meta.is_file() {
                    files.push(entry);
                }
            }
        } else if metadata.is_file() {
            files.push(path.to_path_buf());
        }
    }

    (dirs, files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Node, ScopeType};
    use std::collections::HashSet;
    use std::fs;
    use tempfile::tempdir;

    fn parent_node(paths: Vec<String>, budgets: Budgets) -> Node {
        Node::new_queued(
            "run-1",
            "run-1:root",
            None,
            0,
            ScopeType::Dir,
            ScopeRef { paths },
            "audit",
            None,
            budgets,
        )
    }

    fn default_budgets() -> Budgets {
        Budgets {
            max_depth: 4,
            remaining_llm_calls: 300,
            remaining_tokens: 500_000,
            deadline_epoch_ms: 1_000,
        }
    }

    #[test]
    fn splits_by_subdirectory_when_present() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("README.md"), "hi").unwrap();

        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], default_budgets());
        let children = plan_children(&parent);

        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.scope_type == ScopeType::Dir));
        let labels: HashSet<_> = children
            .iter()
            .map(|c| c.node_id.rsplit(':').next().unwrap().to_string())
            .collect();
        assert!(labels.contains("src"));
        assert!(labels.contains("tests"));
    }

    #[test]
    fn groups_files_when_no_subdirectories() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("f{i}.rs")), "x").unwrap();
        }

        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], default_budgets());
        let children = plan_children(&parent);

        assert_eq!(children.len(), 3); // 20 files / 8 per group, rounded up
        assert!(children.iter().all(|c| c.scope_type == ScopeType::FileGroup));

        let mut all_files: Vec<&String> = children.iter().flat_map(|c| &c.scope_ref.paths).collect();
        all_files.sort();
        all_files.dedup();
        assert_eq!(all_files.len(), 20);
    }

    #[test]
    fn child_scopes_are_disjoint() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}.rs")), "x").unwrap();
        }

        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], default_budgets());
        let children = plan_children(&parent);

        let mut seen = HashSet::new();
        for child in &children {
            for path in &child.scope_ref.paths {
                assert!(seen.insert(path.clone()), "path {path} claimed by more than one child");
            }
        }
    }

    #[test]
    fn loose_sibling_files_do_not_shrink_directory_child_budgets() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }

        let mut budgets = default_budgets();
        budgets.remaining_llm_calls = 11;
        budgets.remaining_tokens = 10_000;
        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], budgets);

        let children = plan_children(&parent);
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.budgets.remaining_llm_calls, (11 - 1) / 2);
            assert_eq!(child.budgets.remaining_tokens, (10_000 - 4_000) / 2);
        }
    }

    #[test]
    fn empty_scope_yields_no_children() {
        let dir = tempdir().unwrap();
        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], default_budgets());
        let children = plan_children(&parent);
        assert!(children.is_empty());
    }

    #[test]
    fn budgets_are_deducted_then_divided_and_deadline_inherited() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();

        let mut budgets = default_budgets();
        budgets.remaining_llm_calls = 11;
        budgets.remaining_tokens = 10_000;
        let parent = parent_node(vec![dir.path().to_string_lossy().to_string()], budgets);

        let children = plan_children(&parent);
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.budgets.remaining_llm_calls, (11 - 1) / 2);
            assert_eq!(child.budgets.remaining_tokens, (10_000 - 4_000) / 2);
            assert_eq!(child.budgets.deadline_epoch_ms, 1_000);
            assert_eq!(child.budgets.max_depth, 4);
        }
    }
}
