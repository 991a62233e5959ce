use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExecutionId, JobId};

/// A push notification. The runner's websocket hub nests identifiers under
/// `data`, other producers put them at the top level; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PushFrame {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            job_id: None,
            execution_id: None,
            data: None,
        }
    }

    pub fn for_job(kind: &str, job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            ..Self::new(kind)
        }
    }

    pub fn for_execution(kind: &str, execution_id: &ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id.clone()),
            ..Self::new(kind)
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id.clone().or_else(|| {
            self.nested("job_id")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
        })
    }

    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.execution_id.clone().or_else(|| {
            self.nested("execution_id")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
        })
    }

    fn nested(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_nested_identifiers() {
        let frame: PushFrame = serde_json::from_value(json!({
            "type": "execution_update",
            "data": {"job_id": "job-7", "execution_id": 12},
        }))
        .unwrap();
        assert_eq!(frame.kind, "execution_update");
        assert_eq!(frame.job_id(), Some(JobId::from("job-7")));
        assert_eq!(frame.execution_id(), Some(ExecutionId::from("12")));
    }

    #[test]
    fn test_top_level_wins() {
        let frame: PushFrame = serde_json::from_value(json!({
            "type": "job_update",
            "job_id": "job-1",
            "data": {"job_id": "job-2"},
        }))
        .unwrap();
        assert_eq!(frame.job_id(), Some(JobId::from("job-1")));
        assert_eq!(frame.execution_id(), None);
    }
}
