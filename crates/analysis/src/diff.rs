use std::sync::Arc;

use anyhow::Result;
use data_model::{DiffAnalysis, JobHandle, JobId};
use gateway::{ExecutionFilter, FetchGateway, GatewayError, JobQuery};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::strategy::{AggregationInput, AnalysisStrategy, LiveStrategy, SyntheticStrategy};

fn default_models() -> Vec<String> {
    ["llama3.2-1b", "mistral-7b", "qwen2.5-1.5b"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_regions() -> Vec<String> {
    ["US", "EU", "ASIA"].iter().map(|r| r.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Model catalog every analysis is laid out against.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Regions used when the job does not say which it requested.
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            regions: default_regions(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(anyhow::anyhow!("analysis.models must not be empty"));
        }
        if self.regions.is_empty() {
            return Err(anyhow::anyhow!("analysis.regions must not be empty"));
        }
        Ok(())
    }
}

/// Turns a job's executions into a cross-region, cross-model diff.
pub struct DiffAggregator {
    gateway: Arc<dyn FetchGateway>,
    config: AnalysisConfig,
    metrics: metrics::analysis_stats::Metrics,
}

impl DiffAggregator {
    pub fn new(gateway: Arc<dyn FetchGateway>, config: AnalysisConfig) -> Self {
        Self {
            gateway,
            config,
            metrics: metrics::analysis_stats::Metrics::new(),
        }
    }

    /// Returns the analysis for `job_id`, preferring the server's own.
    /// `None` means neither a server analysis nor executions to synthesize
    /// from exist.
    pub async fn aggregate(&self, job_id: &JobId, job: Option<&JobHandle>) -> Option<DiffAnalysis> {
        let _timer = metrics::Timer::start(&self.metrics.aggregation_latency);
        let Some(strategy) = self.select_strategy(job_id, job).await else {
            info!(job_id = %job_id, "no analysis available");
            self.metrics.analyses_unavailable.add(1, &[]);
            return None;
        };

        let input = AggregationInput {
            job_id,
            job,
            catalog: &self.config.models,
            regions: self.requested_regions(job),
        };
        let analysis = strategy.build(&input);
        if analysis.is_synthetic() {
            warn!(
                job_id = %job_id,
                completed = analysis.completed_results(),
                "server analysis unavailable, showing synthetic diff"
            );
        }
        self.metrics.analyses.add(
            1,
            &[KeyValue::new("source", analysis.source.as_ref().to_string())],
        );
        Some(analysis)
    }

    /// Fetches the job (and its executions when the job endpoint omits
    /// them) and aggregates it. Used outside the tracker.
    pub async fn aggregate_job(&self, job_id: &JobId) -> Result<Option<DiffAnalysis>, GatewayError> {
        let mut job = self.gateway.fetch_job(job_id, &JobQuery::default()).await?;
        if job.executions.is_empty() {
            job.executions = self
                .gateway
                .fetch_executions(&ExecutionFilter::for_job(job_id))
                .await?;
        }
        Ok(self.aggregate(job_id, Some(&job)).await)
    }

    fn requested_regions(&self, job: Option<&JobHandle>) -> Vec<String> {
        let from_job = job.map(|j| j.requested_regions()).unwrap_or_default();
        if from_job.is_empty() {
            self.config
                .regions
                .iter()
                .map(|r| data_model::canonical_region(r))
                .collect()
        } else {
            from_job
        }
    }

    async fn select_strategy(
        &self,
        job_id: &JobId,
        job: Option<&JobHandle>,
    ) -> Option<Box<dyn AnalysisStrategy>> {
        match self.gateway.fetch_diff_analysis(job_id).await {
            Ok(payload) if !payload.is_empty() => return Some(Box::new(LiveStrategy::new(payload))),
            Ok(_) => debug!(job_id = %job_id, "server analysis is empty"),
            Err(err) if err.is_not_found() => debug!(job_id = %job_id, "no server analysis"),
            Err(err) => warn!(job_id = %job_id, error = %err, "failed to fetch server analysis"),
        }
        match job {
            Some(job) if !job.executions.is_empty() => Some(Box::new(SyntheticStrategy)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use data_model::{
        test_objects::tests::{answered_execution, mock_job, TEST_MODELS},
        AnalysisSource,
        DiffPayload,
        JobStatus,
        RawDiffMetrics,
    };
    use gateway::InMemoryGateway;

    use super::*;

    fn aggregator(gateway: Arc<InMemoryGateway>) -> DiffAggregator {
        DiffAggregator::new(gateway, AnalysisConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.regions, vec!["US", "EU", "ASIA"]);
        assert!(config.validate().is_ok());
        assert!(AnalysisConfig {
            models: vec![],
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_live_analysis_preferred() {
        let gateway = Arc::new(InMemoryGateway::new());
        let job_id = JobId::from("job-1");
        gateway.set_diff(
            &job_id,
            DiffPayload {
                analysis: Some(RawDiffMetrics {
                    bias_variance: Some(0.23),
                    censorship_rate: Some(0.15),
                    factual_consistency: Some(0.87),
                    narrative_divergence: Some(0.31),
                }),
                ..Default::default()
            },
        );
        let analysis = aggregator(gateway).aggregate(&job_id, None).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Live);
        assert_eq!(analysis.metrics.bias_variance, 23);
        assert_eq!(analysis.models.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_payload_falls_back_to_synthetic() {
        let gateway = Arc::new(InMemoryGateway::new());
        let mut job = mock_job("job-1", JobStatus::Completed, &["US", "EU"]);
        job.executions = vec![answered_execution("1", "job-1", "US", TEST_MODELS[0], "ok")];
        gateway.set_diff(&job.id, DiffPayload::default());

        let analysis = aggregator(gateway)
            .aggregate(&job.id, Some(&job))
            .await
            .unwrap();
        assert_eq!(analysis.source, AnalysisSource::Synthetic);
        assert!(analysis.models.iter().all(|m| m.regions.len() == 2));
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let gateway = Arc::new(InMemoryGateway::new());
        let job = mock_job("job-1", JobStatus::Completed, &["US"]);
        let aggregator = aggregator(gateway);
        assert!(aggregator.aggregate(&job.id, Some(&job)).await.is_none());
        assert!(aggregator.aggregate(&job.id, None).await.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_job_fills_executions() {
        let gateway = Arc::new(InMemoryGateway::new());
        let mut job = mock_job("job-1", JobStatus::Completed, &["US"]);
        job.executions = vec![answered_execution("1", "job-1", "US", TEST_MODELS[0], "ok")];
        gateway.set_job(job.clone());

        let analysis = aggregator(gateway.clone())
            .aggregate_job(&job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.source, AnalysisSource::Synthetic);
        assert_eq!(analysis.completed_results(), 1);

        let missing = aggregator(gateway)
            .aggregate_job(&JobId::from("nope"))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }
}
