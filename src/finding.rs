//! Finding and evidence types shared by leaf execution and synthesis.

use serde::{Deserialize, Serialize};

use crate::store::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Ordinal used for risk scoring and sorting.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 5,
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
            Self::Info => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

/// A `(path, line_start, line_end, quote?)` tuple proving a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl Evidence {
    pub fn new(path: impl Into<String>, line: u32, quote: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line_start: line,
            line_end: line,
            quote: Some(quote.into()),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.line_start <= self.line_end
    }
}

/// A reviewable observation. Invariant: severity above `info` must
/// carry at least one evidence pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub domain: Domain,
    pub severity: Severity,
    /// Stored as fixed-point basis points to keep `Finding` derive-friendly
    /// `Eq`; use [`Finding::confidence`]/[`Finding::with_confidence`] to work
    /// with the `[0,1]` float callers reason about.
    confidence_bp: u16,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    pub evidence: Vec<Evidence>,
}

impl Finding {
    pub fn new(
        id: impl Into<String>,
        domain: Domain,
        severity: Severity,
        confidence: f64,
        title: impl Into<String>,
        description: impl Into<String>,
        evidence: Vec<Evidence>,
    ) -> Self {
        Self {
            id: id.into(),
            domain,
            severity,
            confidence_bp: to_bp(confidence),
            title: title.into(),
            description: description.into(),
            suggested_fix: None,
            evidence,
        }
    }

    pub fn confidence(&self) -> f64 {
        f64::from(self.confidence_bp) / 10_000.0
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_bp = to_bp(confidence);
        self
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    /// Invariant: a finding above `info` needs at least one evidence
    /// pointer, and every pointer must be well-formed.
    pub fn is_valid(&self) -> bool {
        let has_required_evidence = self.severity == Severity::Info || !self.evidence.is_empty();
        has_required_evidence && self.evidence.iter().all(Evidence::is_well_formed)
    }

    /// Dedupe/rank key: `(domain, title, evidence0.path,
    /// evidence0.line_start, evidence0.line_end)`.
    pub fn dedupe_key(&self) -> Option<(String, String, String, u32, u32)> {
        let first = self.evidence.first()?;
        Some((
            self.domain.as_str().to_string(),
            self.title.clone(),
            first.path.clone(),
            first.line_start,
            first.line_end,
        ))
    }
}

fn to_bp(confidence: f64) -> u16 {
    (confidence.clamp(0.0, 1.0) * 10_000.0).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_finding_needs_no_evidence() {
        let f = Finding::new("f1", Domain::Quality, Severity::Info, 0.5, "t", "d", vec![]);
        assert!(f.is_valid());
    }

    #[test]
    fn high_finding_without_evidence_is_invalid() {
        let f = Finding::new("f1", Domain::Security, Severity::High, 0.9, "t", "d", vec![]);
        assert!(!f.is_valid());
    }

    #[test]
    fn malformed_evidence_range_is_invalid() {
        let bad = Evidence {
            path: "a.rs".into(),
            line_start: 10,
            line_end: 5,
            quote: None,
        };
        let f = Finding::new("f1", Domain::Security, Severity::High, 0.9, "t", "d", vec![bad]);
        assert!(!f.is_valid());
    }

    #[test]
    fn confidence_roundtrips_through_basis_points() {
        let f = Finding::new("f1", Domain::Quality, Severity::Low, 0.73, "t", "d", vec![]);
        assert!((f.confidence() - 0.73).abs() < 1e-3);
    }
}
