use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::JobId;

fn default_min_regions() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Constraints {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default = "default_min_regions")]
    pub min_regions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_success_rate: Option<f64>,
    /// Timeouts, cost ceilings and provider pins travel through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A benchmark job as submitted to the runner. Fields the client does not
/// interpret (benchmark definition, metadata, wallet auth) are preserved so
/// a derived spec resubmits the same benchmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec {
    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.public_key.is_some()
    }

    /// Builds a follow-up spec that only targets `regions`. Signature,
    /// identity and creation time are dropped since they belong to the
    /// parent submission.
    pub fn derive_for_regions(&self, parent: &JobId, regions: Vec<String>) -> JobSpec {
        let mut spec = self.clone();
        spec.id = None;
        spec.signature = None;
        spec.public_key = None;
        spec.extra.remove("created_at");
        spec.constraints.regions = regions;
        spec.constraints.min_regions = 1;
        spec.parent_job_id = Some(parent.clone());
        spec
    }
}

/// Response body of a job submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmittedJob {
    #[serde(alias = "job_id")]
    pub id: JobId,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "id": "bias-detection-1",
            "version": "v1",
            "benchmark": {"name": "bias-detection", "container": {"image": "beacon/bias"}},
            "constraints": {"regions": ["US", "EU"], "min_regions": 2, "timeout": 600},
            "questions": ["identity_basic"],
            "models": [{"id": "llama3.2-1b", "provider": "modal", "container_image": "x"}],
            "created_at": "2025-01-01T00:00:00Z",
        });
        let spec: JobSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.constraints.extra.get("timeout"), Some(&json!(600)));
        assert!(spec.extra.contains_key("benchmark"));
        assert_eq!(spec.model_ids(), vec!["llama3.2-1b"]);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["benchmark"]["name"], "bias-detection");
        assert_eq!(value["models"][0]["container_image"], "x");
    }

    #[test]
    fn test_derive_for_regions() {
        let spec = JobSpec {
            id: Some(JobId::from("parent")),
            version: "v1".to_string(),
            constraints: Constraints {
                regions: vec!["US".into(), "EU".into(), "ASIA".into()],
                min_regions: 3,
                min_success_rate: Some(0.67),
                extra: Map::new(),
            },
            signature: Some("sig".into()),
            public_key: Some("pk".into()),
            ..Default::default()
        };
        let derived = spec.derive_for_regions(&JobId::from("parent"), vec!["ASIA".into()]);
        assert_eq!(derived.constraints.regions, vec!["ASIA"]);
        assert_eq!(derived.constraints.min_regions, 1);
        assert_eq!(derived.constraints.min_success_rate, Some(0.67));
        assert_eq!(derived.parent_job_id, Some(JobId::from("parent")));
        assert!(derived.id.is_none());
        assert!(!derived.is_signed());
    }
}
