use anyhow::Result;
use async_trait::async_trait;
use data_model::{
    DiffPayload,
    Execution,
    ExecutionId,
    JobHandle,
    JobId,
    JobSpec,
    MerkleProof,
    SubmittedJob,
    TransparencyRoot,
};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{ExecutionFilter, FetchGateway, GatewayConfig, GatewayError, JobQuery};

/// [`FetchGateway`] over the runner's REST API.
pub struct HttpGateway {
    client: reqwest::Client,
    api_url: String,
    diffs_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            diffs_url: config.diffs_url().trim_end_matches('/').to_string(),
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        debug!(what, status = status.as_u16(), "gateway response");

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::not_found(what));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::transient(format!("{} returned {}", what, status)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::Decode {
            what: what.to_string(),
            message: e.to_string(),
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        return GatewayError::Decode {
            what: err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default(),
            message: err.to_string(),
        };
    }
    GatewayError::transient(err.to_string())
}

fn job_query_params(query: &JobQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if query.include_executions {
        params.push(("include", "executions".to_string()));
    }
    if let Some(limit) = query.exec_limit {
        params.push(("exec_limit", limit.to_string()));
    }
    params
}

fn execution_filter_params(filter: &ExecutionFilter) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(job_id) = &filter.job_id {
        params.push(("job_id", job_id.to_string()));
    }
    if let Some(region) = &filter.region {
        params.push(("region", region.clone()));
    }
    if let Some(status) = &filter.status {
        params.push(("status", status.to_string()));
    }
    if let Some(limit) = filter.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ExecutionList {
    Bare(Vec<Execution>),
    Wrapped { executions: Vec<Execution> },
}

#[async_trait]
impl FetchGateway for HttpGateway {
    async fn fetch_job(&self, id: &JobId, query: &JobQuery) -> Result<JobHandle, GatewayError> {
        let request = self
            .client
            .get(format!("{}/api/v1/jobs/{}", self.api_url, id))
            .query(&job_query_params(query));
        self.send_json(request, &format!("job {}", id)).await
    }

    async fn fetch_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, GatewayError> {
        let request = self
            .client
            .get(format!("{}/api/v1/executions", self.api_url))
            .query(&execution_filter_params(filter));
        let list: ExecutionList = self.send_json(request, "executions").await?;
        Ok(match list {
            ExecutionList::Bare(executions) | ExecutionList::Wrapped { executions } => executions,
        })
    }

    async fn fetch_diff_analysis(&self, job_id: &JobId) -> Result<DiffPayload, GatewayError> {
        let request = self
            .client
            .get(format!("{}/api/v1/diffs/by-job/{}", self.diffs_url, job_id));
        self.send_json(request, &format!("diff analysis for job {}", job_id))
            .await
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<SubmittedJob, GatewayError> {
        let request = self
            .client
            .post(format!("{}/api/v1/jobs", self.api_url))
            .json(spec);
        self.send_json(request, "job submission").await
    }

    async fn fetch_proof(
        &self,
        execution_id: &ExecutionId,
        content_pointer: &str,
    ) -> Result<MerkleProof, GatewayError> {
        let request = self
            .client
            .get(format!("{}/api/v1/transparency/proof", self.api_url))
            .query(&[
                ("execution_id", execution_id.to_string()),
                ("cid", content_pointer.to_string()),
            ]);
        self.send_json(request, &format!("proof for execution {}", execution_id))
            .await
    }

    async fn fetch_transparency_root(&self) -> Result<TransparencyRoot, GatewayError> {
        let request = self
            .client
            .get(format!("{}/api/v1/transparency/root", self.api_url));
        self.send_json(request, "transparency root").await
    }
}

#[cfg(test)]
mod tests {
    use data_model::ExecutionStatus;

    use super::*;

    #[test]
    fn test_job_query_params() {
        let params = job_query_params(&JobQuery::default());
        assert_eq!(
            params,
            vec![
                ("include", "executions".to_string()),
                ("exec_limit", "50".to_string())
            ]
        );
        let params = job_query_params(&JobQuery {
            include_executions: false,
            exec_limit: None,
        });
        assert!(params.is_empty());
    }

    #[test]
    fn test_execution_filter_params() {
        let filter = ExecutionFilter {
            job_id: Some(JobId::from("job-1")),
            status: Some(ExecutionStatus::Completed),
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            execution_filter_params(&filter),
            vec![
                ("job_id", "job-1".to_string()),
                ("status", "completed".to_string()),
                ("limit", "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_execution_list_shapes() {
        let bare: ExecutionList = serde_json::from_str(
            r#"[{"id": 1, "job_id": "j", "region": "US", "status": "running"}]"#,
        )
        .unwrap();
        let wrapped: ExecutionList = serde_json::from_str(
            r#"{"executions": [{"id": 1, "job_id": "j", "region": "US", "status": "running"}]}"#,
        )
        .unwrap();
        for list in [bare, wrapped] {
            match list {
                ExecutionList::Bare(e) | ExecutionList::Wrapped { executions: e } => {
                    assert_eq!(e.len(), 1)
                }
            }
        }
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let gateway = HttpGateway::new(&GatewayConfig {
            api_url: "https://runner.example/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(gateway.api_url, "https://runner.example");
        assert_eq!(gateway.diffs_url, "https://runner.example");
    }
}
