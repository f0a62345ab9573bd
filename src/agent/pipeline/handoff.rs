//! JSON files the agent overwrites to report structured stage results.
//!
//! Each file is seeded with a safe negative stub before the stage runs, and
//! any read or decode failure maps to a negative result.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const VERIFY_FILE: &str = "verify.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisVerdict {
    ImprovementFound,
    NoImprovement,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub result: AnalysisVerdict,
    #[serde(default)]
    pub category_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Candidate>,
}

impl AnalysisResult {
    pub fn no_improvement(category: &str, reason: impl Into<String>) -> Self {
        Self {
            result: AnalysisVerdict::NoImprovement,
            category_used: category.to_string(),
            reason: Some(reason.into()),
            candidates: Vec::new(),
            selected: None,
        }
    }

    pub fn found_improvement(&self) -> bool {
        self.result == AnalysisVerdict::ImprovementFound
    }

    /// Short merge-request description: first 80 characters of the selected
    /// candidate, or `"{category} improvement"`.
    pub fn short_description(&self, category: &str) -> String {
        self.selected
            .as_ref()
            .map(|c| c.description.trim())
            .filter(|d| !d.is_empty())
            .map_or_else(
                || format!("{category} improvement"),
                |d| d.chars().take(80).collect(),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    #[serde(default)]
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

async fn seed(path: &Path, stub: serde_json::Value) {
    if let Err(e) = tokio::fs::write(path, stub.to_string()).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to seed handoff file");
    }
}

pub async fn seed_analysis(path: &Path) {
    seed(
        path,
        serde_json::json!({"result": "NO_IMPROVEMENT", "reason": "pending"}),
    )
    .await;
}

pub async fn seed_verify(path: &Path) {
    seed(path, serde_json::json!({"passed": false, "error_details": "pending"})).await;
}

pub async fn read_analysis(path: &Path, category: &str) -> AnalysisResult {
    let parsed = tokio::fs::read_to_string(path)
        .await
        .ok()
        .and_then(|raw| serde_json::from_str::<AnalysisResult>(&raw).ok());
    match parsed {
        Some(mut analysis) => {
            if analysis.category_used.is_empty() {
                analysis.category_used = category.to_string();
            }
            analysis
        }
        None => AnalysisResult::no_improvement(category, "Failed to read analysis handoff file"),
    }
}

pub async fn read_verify(path: &Path) -> VerifyResult {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| VerifyResult {
            passed: false,
            error_details: Some("Failed to read verify handoff file".into()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn seeded_analysis_reads_as_no_improvement() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(ANALYSIS_FILE);
        seed_analysis(&path).await;

        let analysis = read_analysis(&path, "docs").await;
        assert!(!analysis.found_improvement());
        assert_eq!(analysis.reason.as_deref(), Some("pending"));
        assert_eq!(analysis.category_used, "docs");
    }

    #[tokio::test]
    async fn malformed_analysis_is_a_safe_negative() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(ANALYSIS_FILE);
        std::fs::write(&path, "{\"result\": \"MAYBE\"").unwrap();

        let analysis = read_analysis(&path, "tests").await;
        assert!(!analysis.found_improvement());
        assert_eq!(
            analysis.reason.as_deref(),
            Some("Failed to read analysis handoff file")
        );
    }

    #[tokio::test]
    async fn improvement_with_candidate_parses() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(ANALYSIS_FILE);
        std::fs::write(
            &path,
            r#"{"result":"IMPROVEMENT_FOUND","categoryUsed":"tests",
                "selected":{"rank":1,"files":["a.scala"],"description":"Add tests for parser","rationale":"uncovered"}}"#,
        )
        .unwrap();

        let analysis = read_analysis(&path, "tests").await;
        assert!(analysis.found_improvement());
        assert_eq!(analysis.short_description("tests"), "Add tests for parser");
    }

    #[test]
    fn short_description_truncates_and_defaults() {
        let mut analysis = AnalysisResult::no_improvement("docs", "x");
        assert_eq!(analysis.short_description("docs"), "docs improvement");

        analysis.selected = Some(Candidate {
            description: "x".repeat(120),
            ..Candidate::default()
        });
        assert_eq!(analysis.short_description("docs").chars().count(), 80);
    }

    #[tokio::test]
    async fn verify_stub_and_missing_file_fail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(VERIFY_FILE);
        seed_verify(&path).await;
        assert!(!read_verify(&path).await.passed);

        let missing = read_verify(&tmp.path().join("nope.json")).await;
        assert!(!missing.passed);
        assert_eq!(
            missing.error_details.as_deref(),
            Some("Failed to read verify handoff file")
        );
    }
}
