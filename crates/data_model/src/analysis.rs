use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{Execution, ExecutionId, ExecutionStatus, JobId};

/// Where a [`DiffAnalysis`] came from. A single analysis never mixes the
/// two.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisSource {
    Live,
    Synthetic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionStatus {
    Completed,
    Failed,
    Pending,
    NoData,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CensorshipLevel {
    Low,
    Medium,
    High,
    Unknown,
}

/// Cross-region summary metrics, all integer percentages in 0..=100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffMetrics {
    pub bias_variance: u32,
    pub censorship_rate: u32,
    pub factual_consistency: u32,
    pub narrative_divergence: u32,
}

impl Default for DiffMetrics {
    fn default() -> Self {
        Self {
            bias_variance: 23,
            censorship_rate: 15,
            factual_consistency: 87,
            narrative_divergence: 31,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionResult {
    pub region_code: String,
    pub status: RegionStatus,
    /// Only set for completed results.
    pub bias_score: Option<u32>,
    pub censorship_level: CensorshipLevel,
    pub response: String,
    pub factual_accuracy: Option<u32>,
    pub political_sensitivity: Option<u32>,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
}

impl RegionResult {
    /// Result for a (model, region) pair nothing has been observed for yet.
    pub fn placeholder(region_code: &str, status: RegionStatus) -> Self {
        Self {
            region_code: region_code.to_string(),
            status,
            bias_score: None,
            censorship_level: CensorshipLevel::Unknown,
            response: crate::NO_RESPONSE.to_string(),
            factual_accuracy: None,
            political_sensitivity: None,
            keywords: Vec::new(),
            provider_id: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RegionStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDiff {
    pub model_id: String,
    pub regions: Vec<RegionResult>,
}

impl ModelDiff {
    pub fn region(&self, region_code: &str) -> Option<&RegionResult> {
        self.regions.iter().find(|r| r.region_code == region_code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffAnalysis {
    pub job_id: JobId,
    pub question: String,
    pub metrics: DiffMetrics,
    pub models: Vec<ModelDiff>,
    pub source: AnalysisSource,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

impl DiffAnalysis {
    pub fn is_synthetic(&self) -> bool {
        self.source == AnalysisSource::Synthetic
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelDiff> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn region_results(&self) -> impl Iterator<Item = &RegionResult> {
        self.models.iter().flat_map(|m| m.regions.iter())
    }

    pub fn completed_results(&self) -> usize {
        self.region_results().filter(|r| r.is_completed()).count()
    }
}

/// Raw metric block of a server-computed analysis. Values may be fractions
/// or percentages depending on the producer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct RawDiffMetrics {
    #[serde(default)]
    pub bias_variance: Option<f64>,
    #[serde(default)]
    pub censorship_rate: Option<f64>,
    #[serde(default)]
    pub factual_consistency: Option<f64>,
    #[serde(default)]
    pub narrative_divergence: Option<f64>,
}

impl RawDiffMetrics {
    pub fn is_empty(&self) -> bool {
        self.bias_variance.is_none()
            && self.censorship_rate.is_none()
            && self.factual_consistency.is_none()
            && self.narrative_divergence.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct LiveScoring {
    #[serde(default)]
    pub bias_score: Option<f64>,
    #[serde(default)]
    pub censorship_detected: Option<bool>,
    #[serde(default)]
    pub factual_accuracy: Option<f64>,
    #[serde(default)]
    pub political_sensitivity: Option<f64>,
}

/// An execution as embedded in a server-computed analysis. Identifiers are
/// optional there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveExecution {
    #[serde(default)]
    pub id: Option<ExecutionId>,
    pub region: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "output_data")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub bias_score: Option<f64>,
    #[serde(default)]
    pub scoring: Option<LiveScoring>,
}

impl LiveExecution {
    pub fn scoring(&self) -> LiveScoring {
        let mut scoring = self.scoring.unwrap_or_default();
        if scoring.bias_score.is_none() {
            scoring.bias_score = self.bias_score;
        }
        scoring
    }

    pub fn to_execution(&self, job_id: &JobId, position: usize) -> Execution {
        Execution {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| ExecutionId::new(format!("live-{position}"))),
            job_id: job_id.clone(),
            region: self.region.clone(),
            model_id: self.model_id.clone(),
            status: self.status,
            provider_id: self.provider_id.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            retries: 0,
            error: None,
            output: self.output.clone(),
            content_pointer: None,
            question_id: None,
        }
    }
}

/// Body of the diff service's per-job endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiffPayload {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub analysis: Option<RawDiffMetrics>,
    #[serde(default)]
    pub executions: Vec<LiveExecution>,
}

impl DiffPayload {
    pub fn is_empty(&self) -> bool {
        self.analysis.map_or(true, |metrics| metrics.is_empty()) && self.executions.is_empty()
    }
}
