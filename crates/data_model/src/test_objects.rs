pub mod tests {
    use chrono::Utc;
    use serde_json::json;

    use crate::{
        Constraints,
        Execution,
        ExecutionId,
        ExecutionStatus,
        JobHandle,
        JobId,
        JobSpec,
        JobStatus,
        ModelSpec,
    };

    pub const TEST_MODELS: [&str; 3] = ["llama3.2-1b", "mistral-7b", "qwen2.5-1.5b"];
    pub const TEST_REGIONS: [&str; 3] = ["US", "EU", "ASIA"];
    pub const TEST_QUESTION: &str = "What happened at Tiananmen Square in 1989?";

    pub fn mock_spec(regions: &[&str]) -> JobSpec {
        JobSpec {
            version: "v1".to_string(),
            constraints: Constraints {
                regions: regions.iter().map(|r| r.to_string()).collect(),
                min_regions: regions.len() as u32,
                ..Default::default()
            },
            questions: vec![TEST_QUESTION.to_string()],
            models: TEST_MODELS
                .iter()
                .map(|id| ModelSpec {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn mock_job(id: &str, status: JobStatus, regions: &[&str]) -> JobHandle {
        JobHandle {
            id: JobId::from(id),
            status,
            created_at: Some(Utc::now()),
            executions: Vec::new(),
            spec: Some(mock_spec(regions)),
        }
    }

    pub fn mock_execution(id: &str, job_id: &str, region: &str, status: ExecutionStatus) -> Execution {
        Execution {
            id: ExecutionId::from(id),
            job_id: JobId::from(job_id),
            region: region.to_string(),
            model_id: Some(TEST_MODELS[0].to_string()),
            status,
            provider_id: Some(format!("provider-{}", region.to_ascii_lowercase())),
            started_at: Some(Utc::now()),
            completed_at: None,
            retries: 0,
            error: None,
            output: None,
            content_pointer: None,
            question_id: None,
        }
    }

    pub fn answered_execution(
        id: &str,
        job_id: &str,
        region: &str,
        model_id: &str,
        response: &str,
    ) -> Execution {
        let mut execution = mock_execution(id, job_id, region, ExecutionStatus::Completed);
        execution.model_id = Some(model_id.to_string());
        execution.completed_at = Some(Utc::now());
        execution.output = Some(json!({"responses": [{"response": response}]}));
        execution
    }
}
