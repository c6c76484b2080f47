//! Synthesis Engine: rolls a completed run's node results into
//! human/CI-facing artifacts — a wiki tree or a deterministic review bundle.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};
use sha1::{Digest as _, Sha1};
use sha2::{Digest as _, Sha256};

use crate::error::Result;
use crate::finding::{Evidence, Finding, Severity};
use crate::store::{Node, NodeResult, OutputEntry, RunMode, Store};

/// Which artifact families to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Auto,
    Wiki,
    Review,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisOutcome {
    pub entries: Vec<OutputEntry>,
}

/// Keyword tags derived from a free-text objective.
const TAG_KEYWORDS: &[&str] = &["security", "performance", "quality", "docs", "architecture"];

pub fn synthesize(store: &Store, target: Target) -> Result<SynthesisOutcome> {
    let run = store.get_run()?;
    let (do_wiki, do_review) = match target {
        Target::Wiki => (true, false),
        Target::Review => (false, true),
        Target::All => (true, true),
        Target::Auto => (run.mode == RunMode::Wiki, run.mode == RunMode::Review),
    };

    let mut entries = Vec::new();
    if do_wiki {
        entries.extend(synthesize_wiki(store)?);
    }
    if do_review {
        entries.extend(synthesize_review(store)?);
    }

    store.register_outputs(entries.clone())?;
    Ok(SynthesisOutcome { entries })
}

fn objective_tags(objective: &str) -> Vec<String> {
    let lower = objective.to_lowercase();
    TAG_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

/// The module a node's wiki page is filed under: the first path component of
/// its first scope path.
fn module_key(node: &Node) -> String {
    node.scope_ref
        .paths
        .first()
        .and_then(|p| Path::new(p).components().next())
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}

struct WikiEntry {
    node_id: String,
    module: String,
    relative_path: String,
}

fn synthesize_wiki(store: &Store) -> Result<Vec<OutputEntry>> {
    let run = store.get_run()?;
    let layout = store.layout();
    let nodes = store.all_nodes()?;
    let results_by_node: HashMap<String, NodeResult> = store
        .all_results()?
        .into_iter()
        .map(|r| (r.node_id.clone(), r))
        .collect();

    let mut seen_paths = HashSet::new();
    let mut wiki_entries = Vec::new();
    for node in &nodes {
        let Some(result) = results_by_node.get(&node.node_id) else {
            continue;
        };
        for artifact in &result.artifacts {
            if artifact.kind != "wiki_node" || !seen_paths.insert(artifact.path.clone()) {
                continue;
            }
            if !layout.root().join(&artifact.path).exists() {
                tracing::warn!(node_id = %node.node_id, path = %artifact.path, "wiki artifact missing on disk, omitting from index");
                continue;
            }
            wiki_entries.push(WikiEntry {
                node_id: node.node_id.clone(),
                module: module_key(node),
                relative_path: artifact.path.clone(),
            });
        }
    }

    fs::create_dir_all(layout.wiki_dir())?;

    let mut module_counts: HashMap<String, u64> = HashMap::new();
    for entry in &wiki_entries {
        *module_counts.entry(entry.module.clone()).or_insert(0) += 1;
    }

    let index_path = layout.wiki_dir().join("index.md");
    fs::write(&index_path, render_wiki_index(&wiki_entries))?;

    let module_index_path = layout.wiki_dir().join("module-index.md");
    fs::write(&module_index_path, render_module_index(&module_counts))?;

    let summaries: Vec<&str> = nodes
        .iter()
        .filter_map(|n| results_by_node.get(&n.node_id))
        .map(|r| r.summary.as_str())
        .take(30)
        .collect();
    let tags = objective_tags(&run.objective);
    let architecture_path = layout.wiki_dir().join("architecture-summary.md");
    fs::write(
        &architecture_path,
        render_architecture_summary(&run.objective, &tags, &run.progress, &summaries),
    )?;

    Ok(vec![
        OutputEntry { kind: "wiki_index".into(), path: "artifacts/wiki/index.md".into() },
        OutputEntry { kind: "wiki_module_index".into(), path: "artifacts/wiki/module-index.md".into() },
        OutputEntry {
            kind: "wiki_architecture_summary".into(),
            path: "artifacts/wiki/architecture-summary.md".into(),
        },
    ])
}

fn render_wiki_index(entries: &[WikiEntry]) -> String {
    let mut body = String::from("# Wiki Index\n\n");
    body.push_str("See [module index](module-index.md) and [architecture summary](architecture-summary.md).\n\n");
    for entry in entries {
        body.push_str(&format!(
            "- [{}]({})\n",
            entry.node_id,
            entry.relative_path.trim_start_matches("artifacts/wiki/")
        ));
    }
    body
}

fn render_module_index(counts: &HashMap<String, u64>) -> String {
    let mut modules: Vec<(&String, &u64)> = counts.iter().collect();
    modules.sort_by(|a, b| a.0.cmp(b.0));
    let mut body = String::from("# Module Index\n\n");
    for (module, count) in modules {
        body.push_str(&format!("- `{module}`: {count} page(s)\n"));
    }
    body
}

fn render_architecture_summary(
    objective: &str,
    tags: &[String],
    progress: &crate::store::Progress,
    summaries: &[&str],
) -> String {
    let mut body = String::from("# Architecture Summary\n\n");
    body.push_str(&format!("- objective: {objective}\n"));
    body.push_str(&format!("- focus tags: {}\n", if tags.is_empty() { "none".to_string() } else { tags.join(", ") }));
    body.push_str(&format!(
        "- coverage: {} total, {} completed, {} failed\n\n",
        progress.nodes_total, progress.nodes_completed, progress.nodes_failed
    ));
    body.push_str("## Node summaries\n\n");
    for summary in summaries {
        body.push_str(&format!("- {summary}\n"));
    }
    body
}

struct ClusterAgg {
    domain: crate::store::Domain,
    severity: Severity,
    confidence: f64,
    affected_paths: HashSet<String>,
    count: u64,
}

fn cluster_key(f: &Finding) -> (crate::store::Domain, String, String) {
    let first = f.evidence.first();
    let first_segment = first
        .map(|e| {
            Path::new(&e.path)
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .unwrap_or_else(|| e.path.clone())
        })
        .unwrap_or_default();
    let title_words: String = f
        .title
        .to_lowercase()
        .split_whitespace()
        .take(8)
        .collect::<Vec<_>>()
        .join(" ");
    (f.domain, first_segment, title_words)
}

fn cluster_id(key: &(crate::store::Domain, String, String)) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{:?}|{}|{}", key.0, key.1, key.2).as_bytes());
    let digest = hasher.finalize();
    format!("cluster_{:x}", digest)[..20].to_string()
}

fn synthesize_review(store: &Store) -> Result<Vec<OutputEntry>> {
    let run = store.get_run()?;
    let layout = store.layout();

    let raw: Vec<Finding> = store
        .all_results()?
        .into_iter()
        .flat_map(|r| r.findings)
        .filter(|f| !f.evidence.is_empty())
        .collect();
    let raw_count = raw.len();

    // Step 2: dedupe/rank, keeping the higher-severity (then higher-confidence) entry.
    let mut deduped_map: HashMap<(String, String, String, u32, u32), Finding> = HashMap::new();
    for finding in raw {
        let Some(key) = finding.dedupe_key() else { continue };
        match deduped_map.get(&key) {
            Some(existing)
                if existing.severity > finding.severity
                    || (existing.severity == finding.severity && existing.confidence() >= finding.confidence()) =>
            {
                // existing entry already ranks at least as high
            }
            _ => {
                deduped_map.insert(key, finding);
            }
        }
    }
    let mut deduped: Vec<Finding> = deduped_map.into_values().collect();
    deduped.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(b.confidence().partial_cmp(&a.confidence()).unwrap_or(std::cmp::Ordering::Equal))
    });
    let deduped_count = deduped.len();

    // Step 3: cluster.
    let mut clusters: HashMap<String, ClusterAgg> = HashMap::new();
    for finding in &deduped {
        let key = cluster_key(finding);
        let id = cluster_id(&key);
        let entry = clusters.entry(id).or_insert_with(|| ClusterAgg {
            domain: finding.domain,
            severity: finding.severity,
            confidence: finding.confidence(),
            affected_paths: HashSet::new(),
            count: 0,
        });
        entry.severity = entry.severity.max(finding.severity);
        entry.confidence = entry.confidence.max(finding.confidence());
        entry.count += 1;
        for e in &finding.evidence {
            entry.affected_paths.insert(e.path.clone());
        }
    }
    let cluster_count = clusters.len();

    let mut cluster_rows: Vec<(String, ClusterAgg)> = clusters.into_iter().collect();
    cluster_rows.sort_by(|a, b| {
        b.1.severity
            .rank()
            .cmp(&a.1.severity.rank())
            .then(b.1.count.cmp(&a.1.count))
            .then(b.1.confidence.partial_cmp(&a.1.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });

    // Step 4: risk score.
    let risk_score = (deduped
        .iter()
        .map(|f| f64::from(f.severity.rank()) * f.confidence().clamp(0.2, 1.0))
        .sum::<f64>()
        * 100.0)
        .round()
        / 100.0;

    let mut severity_counts: HashMap<&'static str, u64> = HashMap::new();
    for finding in &deduped {
        *severity_counts.entry(finding.severity.as_str()).or_insert(0) += 1;
    }

    let tags = objective_tags(&run.objective);

    fs::create_dir_all(layout.review_dir())?;

    let findings_ranked = json!({
        "run_id": run.run_id,
        "objective": run.objective,
        "objective_tags": tags,
        "raw_count": raw_count,
        "deduped_count": deduped_count,
        "cluster_count": cluster_count,
        "risk_score": risk_score,
        "severity_counts": severity_counts,
        "findings": deduped.iter().map(finding_json).collect::<Vec<_>>(),
    });
    write_json(&layout.review_dir().join("findings-ranked.json"), &findings_ranked)?;

    let clusters_json = json!({
        "clusters": cluster_rows.iter().map(|(id, agg)| {
            let mut paths: Vec<&String> = agg.affected_paths.iter().collect();
            paths.sort();
            json!({
                "cluster_id": id,
                "domain": agg.domain.as_str(),
                "severity": agg.severity.as_str(),
                "confidence": agg.confidence,
                "count": agg.count,
                "affected_paths": paths,
            })
        }).collect::<Vec<_>>(),
    });
    write_json(&layout.review_dir().join("findings-clusters.json"), &clusters_json)?;

    let hotspots = top_hotspots(&deduped, 10);
    let summary_json = json!({
        "run_id": run.run_id,
        "risk_score": risk_score,
        "hotspots": hotspots,
    });
    write_json(&layout.review_dir().join("summary.json"), &summary_json)?;

    let report = render_report_md(&run.objective, &severity_counts, &cluster_rows, &deduped);
    fs::write(layout.review_dir().join("report.md"), report)?;

    let codequality = codequality_json(&deduped);
    write_json(&layout.review_dir().join("codequality.json"), &codequality)?;

    let sarif = sarif_json(&deduped);
    write_json(&layout.review_dir().join("sarif.json"), &sarif)?;

    Ok(vec![
        OutputEntry { kind: "review_findings_ranked".into(), path: "artifacts/review/findings-ranked.json".into() },
        OutputEntry { kind: "review_findings_clusters".into(), path: "artifacts/review/findings-clusters.json".into() },
        OutputEntry { kind: "review_summary".into(), path: "artifacts/review/summary.json".into() },
        OutputEntry { kind: "review_report".into(), path: "artifacts/review/report.md".into() },
        OutputEntry { kind: "review_codequality".into(), path: "artifacts/review/codequality.json".into() },
        OutputEntry { kind: "review_sarif".into(), path: "artifacts/review/sarif.json".into() },
    ])
}

#[derive(Serialize)]
struct HotSpot<'a> {
    path: &'a str,
    count: u64,
    max_severity: &'static str,
}

fn top_hotspots(findings: &[Finding], limit: usize) -> Vec<HotSpot<'_>> {
    let mut by_path: HashMap<&str, (u64, Severity)> = HashMap::new();
    for finding in findings {
        let Some(first) = finding.evidence.first() else { continue };
        let entry = by_path.entry(first.path.as_str()).or_insert((0, Severity::Info));
        entry.0 += 1;
        entry.1 = entry.1.max(finding.severity);
    }
    let mut rows: Vec<(&str, u64, Severity)> = by_path.into_iter().map(|(p, (c, s))| (p, c, s)).collect();
    rows.sort_by(|a, b| b.2.rank().cmp(&a.2.rank()).then(b.1.cmp(&a.1)));
    rows.into_iter()
        .take(limit)
        .map(|(path, count, severity)| HotSpot { path, count, max_severity: severity.as_str() })
        .collect()
}

fn finding_json(f: &Finding) -> Value {
    json!({
        "id": f.id,
        "domain": f.domain.as_str(),
        "severity": f.severity.as_str(),
        "confidence": f.confidence(),
        "title": f.title,
        "description": f.description,
        "suggested_fix": f.suggested_fix,
        "evidence": f.evidence,
    })
}

fn codequality_json(findings: &[Finding]) -> Value {
    Value::Array(
        findings
            .iter()
            .filter_map(|f| {
                let first = f.evidence.first()?;
                let key = f.dedupe_key()?;
                let mut hasher = Sha256::new();
                hasher.update(format!("{key:?}").as_bytes());
                let fingerprint = format!("{:x}", hasher.finalize());
                Some(json!({
                    "description": f.description,
                    "check_name": format!("pi-rlm-{}", f.domain.as_str()),
                    "fingerprint": fingerprint,
                    "severity": gitlab_severity(f.severity),
                    "location": {
                        "path": first.path,
                        "lines": { "begin": first.line_start },
                    },
                }))
            })
            .collect(),
    )
}

fn gitlab_severity(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "blocker",
        Severity::High => "critical",
        Severity::Medium => "major",
        Severity::Low => "minor",
        Severity::Info => "info",
    }
}

fn sarif_json(findings: &[Finding]) -> Value {
    let mut rules: Vec<String> = Vec::new();
    let mut seen_rules = HashSet::new();
    let mut results = Vec::new();

    for f in findings {
        let rule_id = format!("{}:{}", f.domain.as_str(), slugify(&f.title));
        if seen_rules.insert(rule_id.clone()) {
            rules.push(rule_id.clone());
        }
        let level = if f.severity.rank() >= Severity::High.rank() {
            "error"
        } else if f.severity == Severity::Medium {
            "warning"
        } else {
            "note"
        };
        let locations: Vec<Value> = f
            .evidence
            .iter()
            .map(|e| {
                json!({
                    "physicalLocation": {
                        "artifactLocation": { "uri": e.path },
                        "region": { "startLine": e.line_start, "endLine": e.line_end },
                    }
                })
            })
            .collect();
        results.push(json!({
            "ruleId": rule_id,
            "level": level,
            "message": { "text": f.description },
            "locations": locations,
        }));
    }

    json!({
        "$schema": "https://json.schemastore.org/sarif-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "rlm-engine",
                    "informationUri": "https://github.com/rand/loop",
                    "rules": rules.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
                }
            },
            "results": results,
        }],
    })
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn render_report_md(
    objective: &str,
    severity_counts: &HashMap<&'static str, u64>,
    clusters: &[(String, ClusterAgg)],
    findings: &[Finding],
) -> String {
    let mut body = format!("# Review Report\n\nobjective: {objective}\n\n## Severity breakdown\n\n");
    for sev in ["critical", "high", "medium", "low", "info"] {
        body.push_str(&format!("- {sev}: {}\n", severity_counts.get(sev).copied().unwrap_or(0)));
    }

    body.push_str("\n## Top clusters\n\n");
    for (id, agg) in clusters.iter().take(20) {
        body.push_str(&format!(
            "- `{id}` [{}] severity={} count={} confidence={:.2}\n",
            agg.domain.as_str(),
            agg.severity.as_str(),
            agg.count,
            agg.confidence
        ));
    }

    body.push_str("\n## Top findings\n\n");
    for f in findings.iter().take(50) {
        let location = f
            .evidence
            .first()
            .map(|e| format!("{}:{}", e.path, e.line_start))
            .unwrap_or_else(|| "-".to_string());
        body.push_str(&format!(
            "- [{}] {} ({location}, confidence={:.2})\n",
            f.severity.as_str(),
            f.title,
            f.confidence()
        ));
    }

    body
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Budgets, Checkpoint, Domain, Progress, Run, RunConfig, RunStatus, ScopeRef, ScopeType};
    use chrono::Utc;
    use tempfile::tempdir;

    fn init_run(store: &Store, mode: RunMode) {
        let now = Utc::now();
        let run = Run {
            run_id: "run-1".into(),
            objective: "review the auth module for security issues".into(),
            mode,
            status: RunStatus::Running,
            root_node_id: "run-1:root".into(),
            config: RunConfig::default(),
            progress: Progress::default(),
            output_index: Vec::new(),
            checkpoint: Checkpoint::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.init_run(&run).unwrap();
    }

    fn budgets() -> Budgets {
        Budgets { max_depth: 4, remaining_llm_calls: 300, remaining_tokens: 500_000, deadline_epoch_ms: i64::MAX }
    }

    #[test]
    fn review_synthesis_dedupes_clusters_and_scores_risk() {
        let run_dir = tempdir().unwrap();
        let store = Store::new(run_dir.path(), "run-1");
        init_run(&store, RunMode::Review);

        let node = Node::new_queued(
            "run-1",
            "run-1:root",
            None,
            0,
            ScopeType::Repo,
            ScopeRef { paths: vec!["src".into()] },
            "review",
            None,
            budgets(),
        );
        store.append_node(&node).unwrap();

        let evidence = Evidence::new("src/auth.rs", 10, "eval(x)");
        let f1 = Finding::new(
            "f1",
            Domain::Security,
            Severity::High,
            0.8,
            "Potential dynamic code execution",
            "eval found",
            vec![evidence.clone()],
        );
        let f2 = Finding::new(
            "f2",
            Domain::Security,
            Severity::Medium,
            0.5,
            "Potential dynamic code execution",
            "weaker duplicate",
            vec![evidence],
        );
        let result = NodeResult::completed("run-1", "run-1:root", "leaf summary").with_findings(vec![f1, f2]);
        store.append_result(&result).unwrap();

        let outcome = synthesize(&store, Target::Review).unwrap();
        assert!(outcome.entries.iter().any(|e| e.kind == "review_findings_ranked"));

        let layout = store.layout();
        let ranked: Value =
            serde_json::from_slice(&fs::read(layout.review_dir().join("findings-ranked.json")).unwrap()).unwrap();
        assert_eq!(ranked["raw_count"], 2);
        assert_eq!(ranked["deduped_count"], 1); // f2 collides with f1's dedupe key, loses on severity
        assert_eq!(ranked["cluster_count"], 1);
        assert!(ranked["risk_score"].as_f64().unwrap() > 0.0);

        let sarif: Value = serde_json::from_slice(&fs::read(layout.review_dir().join("sarif.json")).unwrap()).unwrap();
        assert_eq!(sarif["runs"][0]["results"].as_array().unwrap().len(), 1);

        let run = store.get_run().unwrap();
        assert!(run.output_index.iter().any(|e| e.path == "artifacts/review/report.md"));
    }

    #[test]
    fn module_key_uses_first_path_component_not_last() {
        let node = Node::new_queued(
            "run-1",
            "run-1:root:0:src",
            Some("run-1:root".into()),
            1,
            ScopeType::Dir,
            ScopeRef { paths: vec!["src/utils".into()] },
            "document the repo",
            None,
            budgets(),
        );
        assert_eq!(module_key(&node), "src");
    }

    #[test]
    fn wiki_synthesis_omits_artifacts_missing_from_disk() {
        let run_dir = tempdir().unwrap();
        let store = Store::new(run_dir.path(), "run-1");
        init_run(&store, RunMode::Wiki);

        let node = Node::new_queued(
            "run-1",
            "run-1:root",
            None,
            0,
            ScopeType::Repo,
            ScopeRef { paths: vec!["src".into()] },
            "document the repo",
            None,
            budgets(),
        );
        store.append_node(&node).unwrap();

        let mut result = NodeResult::completed("run-1", "run-1:root", "wiki summary");
        result.artifacts.push(crate::store::ResultArtifact {
            kind: "wiki_node".into(),
            path: "artifacts/wiki/nodes/missing.md".into(),
        });
        store.append_result(&result).unwrap();

        synthesize(&store, Target::Wiki).unwrap();

        let layout = store.layout();
        let index = fs::read_to_string(layout.wiki_dir().join("index.md")).unwrap();
        assert!(!index.contains("missing.md"));
    }

    #[test]
    fn auto_target_selects_nothing_for_generic_mode() {
        let run_dir = tempdir().unwrap();
        let store = Store::new(run_dir.path(), "run-1");
        init_run(&store, RunMode::Generic);

        let outcome = synthesize(&store, Target::Auto).unwrap();
        assert!(outcome.entries.is_empty());
    }
}
