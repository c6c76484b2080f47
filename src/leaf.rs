//! Leaf Executor: runs a bounded heuristic analysis over a leaf node's
//! scope and emits a `NodeResult` plus, in wiki mode, a per-node artifact.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::finding::{Evidence, Finding, Severity};
use crate::scope::{walk_scope, ScopeMetrics};
use crate::store::{Domain, Node, NodeResult, ResultArtifact, RunLayout, RunMode};

const MAX_SAMPLE_FILES: usize = 200;
const MAX_SCANNED_FILES: usize = 40;
const MAX_FILE_BYTES_SCANNED: u64 = 256 * 1024;
const MAX_FINDINGS: usize = 25;

struct PatternSpec {
    pattern: &'static str,
    /// Whole-word match via `\b...\b` rather than a plain substring search.
    word_boundary: bool,
    severity: Severity,
    confidence: f64,
    domain: Domain,
    title: &'static str,
    suggested_fix: &'static str,
}

/// Fixed pattern set scanned in review mode.
const PATTERNS: &[PatternSpec] = &[
    PatternSpec {
        pattern: "eval(",
        word_boundary: false,
        severity: Severity::High,
        confidence: 0.8,
        domain: Domain::Security,
        title: "Potential dynamic code execution",
        suggested_fix: "Avoid eval-like constructs or strictly validate inputs",
    },
    PatternSpec {
        pattern: "TODO",
        word_boundary: false,
        severity: Severity::Low,
        confidence: 0.6,
        domain: Domain::Quality,
        title: "Unresolved TODO found",
        suggested_fix: "Track TODO in issue and resolve or remove",
    },
    PatternSpec {
        pattern: "any",
        word_boundary: true,
        severity: Severity::Medium,
        confidence: 0.6,
        domain: Domain::Quality,
        title: "Type safety risk",
        suggested_fix: "Replace with stricter types",
    },
];

/// A pattern matcher: either a plain substring search or a compiled
/// whole-word regex.
enum Matcher {
    Substring,
    WordBoundary(Regex),
}

/// Matchers for [`PATTERNS`], built once. Each whole-word pattern compiles
/// its `\b...\b` regex a single time rather than per scan.
static MATCHERS: LazyLock<Vec<Matcher>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|spec| {
            if spec.word_boundary {
                let pattern = format!(r"\b{}\b", regex::escape(spec.pattern));
                Matcher::WordBoundary(Regex::new(&pattern).expect("pattern spec regex is valid"))
            } else {
                Matcher::Substring
            }
        })
        .collect()
});

impl Matcher {
    fn is_match(&self, line: &str, pattern: &str) -> bool {
        match self {
            Matcher::Substring => line.contains(pattern),
            Matcher::WordBoundary(re) => re.is_match(line),
        }
    }
}

pub struct LeafOutcome {
    pub result: NodeResult,
}

/// Execute `node` as a leaf: walk its scope, optionally scan for review
/// patterns, and optionally write a wiki artifact, per `mode`.
pub fn execute_leaf(node: &Node, mode: RunMode, layout: &RunLayout) -> LeafOutcome {
    let started = std::time::Instant::now();
    let metrics = walk_scope(&node.scope_ref.paths, MAX_SAMPLE_FILES);

    let findings = if mode == RunMode::Review {
        scan_for_findings(&metrics)
    } else {
        Vec::new()
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let summary = summary_line(node, &metrics, &findings, duration_ms);

    let mut artifacts = Vec::new();
    if mode == RunMode::Wiki {
        if let Some(artifact) = write_wiki_node(node, &metrics, layout) {
            artifacts.push(artifact);
        }
    }

    let result = NodeResult::completed(&node.run_id, &node.node_id, summary)
        .with_findings(findings)
        .with_artifacts(artifacts);

    LeafOutcome { result }
}

fn summary_line(
    node: &Node,
    metrics: &ScopeMetrics,
    findings: &[Finding],
    duration_ms: u64,
) -> String {
    let top_extensions = metrics
        .extension_histogram()
        .into_iter()
        .take(5)
        .map(|(ext, count)| format!("{ext}:{count}"))
        .collect::<Vec<_>>()
        .join(",");
    let sample_files = metrics
        .sampled_files
        .iter()
        .take(5)
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut line = format!(
        "Leaf analysis for node {} | scope={:?} | files={} | bytes={} | top_extensions={} | sample_files={}",
        node.node_id, node.scope_type, metrics.file_count, metrics.total_bytes, top_extensions, sample_files,
    );
    if !findings.is_empty() {
        line.push_str(&format!(" | findings={}", findings.len()));
    }
    line.push_str(&format!(" | duration_ms={duration_ms}"));
    line
}

/// Scan up to [`MAX_SCANNED_FILES`] sampled files (each capped at
/// [`MAX_FILE_BYTES_SCANNED`]) for the fixed pattern table, stopping once
/// [`MAX_FINDINGS`] have been produced.
fn scan_for_findings(metrics: &ScopeMetrics) -> Vec<Finding> {
    let mut findings = Vec::new();

    'files: for path in metrics.sampled_files.iter().take(MAX_SCANNED_FILES) {
        let Ok(meta) = fs::metadata(path) else { continue };
        if meta.len() > MAX_FILE_BYTES_SCANNED {
            continue;
        }
        let Ok(contents) = fs::read_to_string(path) else { continue };

        for (line_idx, line) in contents.lines().enumerate() {
            for (spec, matcher) in PATTERNS.iter().zip(MATCHERS.iter()) {
                if matcher.is_match(line, spec.pattern) {
                    let line_no = (line_idx + 1) as u32;
                    let evidence = Evidence::new(path.display().to_string(), line_no, spec.pattern);
                    let id = format!(
                        "{}:{}:{}",
                        path.display(),
                        line_no,
                        spec.title.replace(' ', "-").to_lowercase()
                    );
                    findings.push(
                        Finding::new(
                            id,
                            spec.domain,
                            spec.severity,
                            spec.confidence,
                            spec.title,
                            format!("Pattern `{}` matched.", spec.pattern),
                            vec![evidence],
                        )
                        .with_suggested_fix(spec.suggested_fix),
                    );
                    if findings.len() >= MAX_FINDINGS {
                        break 'files;
                    }
                    // Each line contributes at most one finding per pattern match
                    // position; move on to the next line once scored.
                    break;
                }
            }
        }
    }

    findings
}

/// Write `artifacts/wiki/nodes/<sanitized_node_id>.md` summarizing the
/// node's scope and sample files.
fn write_wiki_node(node: &Node, metrics: &ScopeMetrics, layout: &RunLayout) -> Option<ResultArtifact> {
    let sanitized = crate::store::sanitize_for_filename(&node.node_id);
    let path = layout.wiki_nodes_dir().join(format!("{sanitized}.md"));

    let mut body = format!("# {}\n\n", node.node_id);
    body.push_str(&format!("- scope_type: {:?}\n", node.scope_type));
    body.push_str(&format!("- files: {}\n", metrics.file_count));
    body.push_str(&format!("- bytes: {}\n", metrics.total_bytes));
    body.push_str(&format!("- objective: {}\n\n", node.objective));
    body.push_str("## Sample files\n\n");
    for file in metrics.sampled_files.iter().take(20) {
        body.push_str(&format!("- `{}`\n", file.display()));
    }

    if fs::create_dir_all(layout.wiki_nodes_dir()).is_err() {
        return None;
    }
    if write_file(&path, &body).is_err() {
        return None;
    }

    Some(ResultArtifact {
        kind: "wiki_node".to_string(),
        path: layout.wiki_node_relative_path(&sanitized),
    })
}

fn write_file(path: &Path, body: &str) -> std::io::Result<()> {
    fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Budgets, ScopeRef, ScopeType};
    use std::fs;
    use tempfile::tempdir;

    fn budgets() -> Budgets {
        Budgets {
            max_depth: 4,
            remaining_llm_calls: 300,
            remaining_tokens: 500_000,
            deadline_epoch_ms: i64::MAX,
        }
    }

    fn leaf_node(run_base: &std::path::Path) -> Node {
        Node::new_queued(
            "run-1",
            "run-1:root:0:f",
            None,
            1,
            ScopeType::FileGroup,
            ScopeRef { paths: vec![run_base.to_string_lossy().to_string()] },
            "review the repo",
            None,
            budgets(),
        )
    }

    #[test]
    fn generic_mode_emits_summary_without_findings() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello world").unwrap();
        let run_dir = tempdir().unwrap();
        let layout = RunLayout::new(run_dir.path(), "run-1");

        let node = leaf_node(dir.path());
        let outcome = execute_leaf(&node, RunMode::Generic, &layout);
        assert!(outcome.result.findings.is_empty());
        assert!(outcome.result.summary.contains("files=1"));
    }

    #[test]
    fn review_mode_detects_eval_and_todo_with_evidence() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.rs");
        let mut contents = String::new();
        for _ in 0..6 {
            contents.push_str("let x = 1;\n");
        }
        contents.push_str("eval(x)\n"); // line 7
        for _ in 0..4 {
            contents.push_str("let y = 2;\n");
        }
        contents.push_str("// TODO fix\n"); // line 12
        fs::write(&file, contents).unwrap();

        let run_dir = tempdir().unwrap();
        let layout = RunLayout::new(run_dir.path(), "run-1");
        let node = leaf_node(dir.path());
        let outcome = execute_leaf(&node, RunMode::Review, &layout);

        assert_eq!(outcome.result.findings.len(), 2);
        let eval_finding = outcome
            .result
            .findings
            .iter()
            .find(|f| f.title == "Potential dynamic code execution")
            .unwrap();
        assert_eq!(eval_finding.evidence[0].line_start, 7);
        assert_eq!(eval_finding.evidence[0].line_end, 7);
        assert_eq!(eval_finding.severity, Severity::High);

        let todo_finding = outcome
            .result
            .findings
            .iter()
            .find(|f| f.title == "Unresolved TODO found")
            .unwrap();
        assert_eq!(todo_finding.evidence[0].line_start, 12);
        assert_eq!(todo_finding.severity, Severity::Low);
    }

    #[test]
    fn wiki_mode_writes_node_artifact() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let run_dir = tempdir().unwrap();
        let layout = RunLayout::new(run_dir.path(), "run-1");

        let node = leaf_node(dir.path());
        let outcome = execute_leaf(&node, RunMode::Wiki, &layout);

        assert_eq!(outcome.result.artifacts.len(), 1);
        assert_eq!(outcome.result.artifacts[0].kind, "wiki_node");
        let full_path = run_dir.path().join(&outcome.result.artifacts[0].path);
        assert!(full_path.exists());
    }

    #[test]
    fn findings_cap_at_max_per_node() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            let mut body = String::new();
            for _ in 0..10 {
                body.push_str("eval(x)\n");
            }
            fs::write(dir.path().join(format!("f{i}.rs")), body).unwrap();
        }
        let run_dir = tempdir().unwrap();
        let layout = RunLayout::new(run_dir.path(), "run-1");
        let node = leaf_node(dir.path());
        let outcome = execute_leaf(&node, RunMode::Review, &layout);
        assert!(outcome.result.findings.len() <= MAX_FINDINGS);
    }

    #[test]
    fn any_pattern_requires_word_boundary() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.rs"), "let company = many(x);\nlet v: any = 1;\n").unwrap();
        let run_dir = tempdir().unwrap();
        let layout = RunLayout::new(run_dir.path(), "run-1");
        let node = leaf_node(dir.path());
        let outcome = execute_leaf(&node, RunMode::Review, &layout);

        let any_findings: Vec<_> = outcome
            .result
            .findings
            .iter()
            .filter(|f| f.title == "Type safety risk")
            .collect();
        assert_eq!(any_findings.len(), 1);
        assert_eq!(any_findings[0].evidence[0].line_start, 2);
    }
}
