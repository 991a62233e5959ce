//! The two ways a [`DiffAnalysis`] can be produced.
//!
//! The aggregator picks one strategy per call and hands it the axes of the
//! result (catalog models x requested regions). Each strategy fills every
//! cell of that grid, so the output is total regardless of how sparse the
//! executions are.

use std::cmp::Ordering;

use data_model::{
    AnalysisSource,
    CensorshipLevel,
    DiffAnalysis,
    DiffMetrics,
    DiffPayload,
    Execution,
    ExecutionStatus,
    JobHandle,
    JobId,
    LiveScoring,
    ModelDiff,
    RawDiffMetrics,
    RegionResult,
    RegionStatus,
};
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::keywords::{self, extract_keywords};

/// What a strategy needs to know about the job being analyzed.
pub struct AggregationInput<'a> {
    pub job_id: &'a JobId,
    pub job: Option<&'a JobHandle>,
    pub catalog: &'a [String],
    pub regions: Vec<String>,
}

impl AggregationInput<'_> {
    fn question(&self) -> String {
        self.job
            .and_then(|job| job.spec.as_ref())
            .and_then(|spec| spec.questions.first().cloned())
            .unwrap_or_default()
    }

    fn job_executions(&self) -> &[Execution] {
        self.job.map(|job| job.executions.as_slice()).unwrap_or(&[])
    }
}

pub trait AnalysisStrategy: Send + Sync {
    fn source(&self) -> AnalysisSource;

    fn build(&self, input: &AggregationInput<'_>) -> DiffAnalysis;
}

/// Catalog models first, then models only seen in executions in first-seen
/// order.
pub fn model_axis<'a>(catalog: &[String], executions: impl Iterator<Item = &'a Execution>) -> Vec<String> {
    let mut models: Vec<String> = catalog.to_vec();
    for model in executions.filter_map(|e| e.model_id.as_ref()) {
        if !models.contains(model) {
            models.push(model.clone());
        }
    }
    models
}

fn default_model(catalog: &[String]) -> Option<&str> {
    catalog.first().map(String::as_str)
}

/// Completed beats not completed; ties go to the latest completion, then
/// the latest start, then the greatest id.
fn preference(a: &Execution, b: &Execution) -> Ordering {
    a.is_completed()
        .cmp(&b.is_completed())
        .then_with(|| a.completed_at.cmp(&b.completed_at))
        .then_with(|| a.started_at.cmp(&b.started_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Index of the execution that represents `(region, model)` for `question`,
/// if any. Executions without a question id match every question, and an
/// empty `question` matches every execution.
pub fn pick_execution(
    executions: &[Execution],
    region: &str,
    model: &str,
    question: &str,
    catalog: &[String],
) -> Option<usize> {
    let fallback_model = default_model(catalog);
    executions
        .iter()
        .enumerate()
        .filter(|(_, e)| e.canonical_region() == region)
        .filter(|(_, e)| e.model_id.as_deref().or(fallback_model) == Some(model))
        .filter(|(_, e)| match e.question_id.as_deref() {
            Some(asked) => question.is_empty() || asked == question,
            None => true,
        })
        .max_by(|(_, a), (_, b)| preference(a, b))
        .map(|(index, _)| index)
}

fn region_status(status: ExecutionStatus) -> RegionStatus {
    match status {
        ExecutionStatus::Completed => RegionStatus::Completed,
        ExecutionStatus::Failed | ExecutionStatus::Cancelled | ExecutionStatus::Timeout => {
            RegionStatus::Failed
        }
        ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Unknown => {
            RegionStatus::Pending
        }
    }
}

/// Result for an execution that has not completed. Scores stay empty.
fn unfinished_result(region: &str, execution: &Execution) -> RegionResult {
    let status = region_status(execution.status);
    let mut result = RegionResult::placeholder(region, status);
    result.provider_id = execution.provider_id.clone();
    if let Some(error) = &execution.error {
        result.response = error.clone();
    }
    result
}

fn to_percent(value: f64) -> Option<u32> {
    if !value.is_finite() {
        return None;
    }
    let percent = if value <= 1.0 { value * 100.0 } else { value };
    Some(percent.round().clamp(0.0, 100.0) as u32)
}

pub fn normalize_metrics(raw: Option<RawDiffMetrics>) -> DiffMetrics {
    let defaults = DiffMetrics::default();
    let Some(raw) = raw else {
        return defaults;
    };
    let pick = |value: Option<f64>, default: u32| value.and_then(to_percent).unwrap_or(default);
    DiffMetrics {
        bias_variance: pick(raw.bias_variance, defaults.bias_variance),
        censorship_rate: pick(raw.censorship_rate, defaults.censorship_rate),
        factual_consistency: pick(raw.factual_consistency, defaults.factual_consistency),
        narrative_divergence: pick(raw.narrative_divergence, defaults.narrative_divergence),
    }
}

/// Uses the server-computed analysis as is.
pub struct LiveStrategy {
    payload: DiffPayload,
}

impl LiveStrategy {
    pub fn new(payload: DiffPayload) -> Self {
        Self { payload }
    }

    fn live_result(region: &str, execution: &Execution, scoring: LiveScoring) -> RegionResult {
        if !execution.is_completed() {
            return unfinished_result(region, execution);
        }
        let response = execution.response_text();
        let keywords = extract_keywords(&response);
        let censorship_level = match scoring.censorship_detected {
            Some(true) => CensorshipLevel::High,
            _ => keywords::censorship_level(&keywords),
        };
        RegionResult {
            region_code: region.to_string(),
            status: RegionStatus::Completed,
            bias_score: Some(
                scoring
                    .bias_score
                    .and_then(to_percent)
                    .unwrap_or_else(|| keywords::keyword_bias_score(&keywords)),
            ),
            censorship_level,
            factual_accuracy: Some(
                scoring
                    .factual_accuracy
                    .and_then(to_percent)
                    .unwrap_or_else(|| keywords::keyword_factual_accuracy(&keywords)),
            ),
            political_sensitivity: Some(
                scoring
                    .political_sensitivity
                    .and_then(to_percent)
                    .unwrap_or_else(|| keywords::keyword_political_sensitivity(&keywords)),
            ),
            response,
            keywords,
            provider_id: execution.provider_id.clone(),
        }
    }
}

impl AnalysisStrategy for LiveStrategy {
    fn source(&self) -> AnalysisSource {
        AnalysisSource::Live
    }

    fn build(&self, input: &AggregationInput<'_>) -> DiffAnalysis {
        let (executions, scorings): (Vec<Execution>, Vec<LiveScoring>) =
            if self.payload.executions.is_empty() {
                input
                    .job_executions()
                    .iter()
                    .map(|e| (e.clone(), LiveScoring::default()))
                    .unzip()
            } else {
                self.payload
                    .executions
                    .iter()
                    .enumerate()
                    .map(|(position, live)| (live.to_execution(input.job_id, position), live.scoring()))
                    .unzip()
            };
        let question = self
            .payload
            .question
            .clone()
            .unwrap_or_else(|| input.question());

        let models = model_axis(input.catalog, executions.iter())
            .into_iter()
            .map(|model_id| {
                let regions = input
                    .regions
                    .iter()
                    .map(|region| {
                        match pick_execution(
                            &executions,
                            region,
                            &model_id,
                            &question,
                            input.catalog,
                        ) {
                            Some(index) => {
                                Self::live_result(region, &executions[index], scorings[index])
                            }
                            None => RegionResult::placeholder(region, RegionStatus::NoData),
                        }
                    })
                    .collect();
                ModelDiff { model_id, regions }
            })
            .collect();

        DiffAnalysis {
            job_id: input.job_id.clone(),
            question,
            metrics: normalize_metrics(self.payload.analysis),
            models,
            source: AnalysisSource::Live,
            generated_at: self.payload.generated_at,
        }
    }
}

struct RegionProfile {
    bias: (u32, u32),
    factual: (u32, u32),
    sensitivity: (u32, u32),
    medium_censorship_chance: f64,
}

fn region_profile(region: &str) -> RegionProfile {
    match region {
        "US" => RegionProfile {
            bias: (10, 30),
            factual: (80, 95),
            sensitivity: (20, 45),
            medium_censorship_chance: 0.1,
        },
        "EU" => RegionProfile {
            bias: (8, 28),
            factual: (82, 96),
            sensitivity: (15, 40),
            medium_censorship_chance: 0.1,
        },
        "ASIA" => RegionProfile {
            bias: (55, 85),
            factual: (55, 75),
            sensitivity: (60, 90),
            medium_censorship_chance: 0.6,
        },
        _ => RegionProfile {
            bias: (20, 60),
            factual: (65, 90),
            sensitivity: (30, 70),
            medium_censorship_chance: 0.3,
        },
    }
}

/// Seed for the `(region, model)` pair. Stable across runs and platforms.
pub fn pair_seed(region: &str, model: &str) -> u64 {
    let digest = Sha256::digest(format!("{}|{}", region, model).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Derives scores locally when no server analysis exists. Output depends
/// only on the executions, so repeated calls agree.
pub struct SyntheticStrategy;

impl SyntheticStrategy {
    fn synthetic_result(region: &str, model: &str, execution: &Execution) -> RegionResult {
        if !execution.is_completed() {
            return unfinished_result(region, execution);
        }
        let profile = region_profile(region);
        let mut rng = StdRng::seed_from_u64(pair_seed(region, model));
        let response = execution.response_text();
        let keywords = extract_keywords(&response);
        let bias_score = rng.random_range(profile.bias.0..=profile.bias.1);
        let factual_accuracy = rng.random_range(profile.factual.0..=profile.factual.1);
        let political_sensitivity = rng.random_range(profile.sensitivity.0..=profile.sensitivity.1);
        let censorship_level = if keywords.iter().any(|k| k == keywords::CENSORSHIP) {
            CensorshipLevel::High
        } else if rng.random_bool(profile.medium_censorship_chance) {
            CensorshipLevel::Medium
        } else {
            CensorshipLevel::Low
        };
        RegionResult {
            region_code: region.to_string(),
            status: RegionStatus::Completed,
            bias_score: Some(bias_score),
            censorship_level,
            response,
            factual_accuracy: Some(factual_accuracy),
            political_sensitivity: Some(political_sensitivity),
            keywords,
            provider_id: execution.provider_id.clone(),
        }
    }
}

/// Summary metrics computed from the completed cells of a synthetic grid.
pub fn synthetic_metrics(models: &[ModelDiff]) -> DiffMetrics {
    let defaults = DiffMetrics::default();
    let completed: Vec<&RegionResult> = models
        .iter()
        .flat_map(|m| m.regions.iter())
        .filter(|r| r.is_completed())
        .collect();
    if completed.is_empty() {
        return defaults;
    }

    let biases: Vec<u32> = completed.iter().filter_map(|r| r.bias_score).collect();
    let bias_variance = match biases.iter().minmax().into_option() {
        Some((min, max)) => max - min,
        None => defaults.bias_variance,
    };

    let high = completed
        .iter()
        .filter(|r| r.censorship_level == CensorshipLevel::High)
        .count();
    let censorship_rate = ((high as f64 / completed.len() as f64) * 100.0).round() as u32;

    let accuracies: Vec<u32> = completed.iter().filter_map(|r| r.factual_accuracy).collect();
    let factual_consistency = if accuracies.is_empty() {
        defaults.factual_consistency
    } else {
        (accuracies.iter().sum::<u32>() as f64 / accuracies.len() as f64).round() as u32
    };

    let distances: Vec<f64> = completed
        .iter()
        .tuple_combinations()
        .map(|(a, b)| jaccard_distance(&a.keywords, &b.keywords))
        .collect();
    let narrative_divergence = if distances.is_empty() {
        defaults.narrative_divergence
    } else {
        ((distances.iter().sum::<f64>() / distances.len() as f64) * 100.0).round() as u32
    };

    DiffMetrics {
        bias_variance,
        censorship_rate,
        factual_consistency,
        narrative_divergence,
    }
}

fn jaccard_distance(a: &[String], b: &[String]) -> f64 {
    let union = a.iter().chain(b.iter()).unique().count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.iter().filter(|k| b.contains(k)).count();
    1.0 - intersection as f64 / union as f64
}

impl AnalysisStrategy for SyntheticStrategy {
    fn source(&self) -> AnalysisSource {
        AnalysisSource::Synthetic
    }

    fn build(&self, input: &AggregationInput<'_>) -> DiffAnalysis {
        let executions = input.job_executions();
        let question = input.question();
        let models: Vec<ModelDiff> = model_axis(input.catalog, executions.iter())
            .into_iter()
            .map(|model_id| {
                let regions = input
                    .regions
                    .iter()
                    .map(|region| {
                        match pick_execution(executions, region, &model_id, &question, input.catalog)
                        {
                            Some(index) => {
                                Self::synthetic_result(region, &model_id, &executions[index])
                            }
                            None => RegionResult::placeholder(region, RegionStatus::Pending),
                        }
                    })
                    .collect();
                ModelDiff { model_id, regions }
            })
            .collect();

        DiffAnalysis {
            job_id: input.job_id.clone(),
            question,
            metrics: synthetic_metrics(&models),
            models,
            source: AnalysisSource::Synthetic,
            generated_at: None,
        }
    }
}
