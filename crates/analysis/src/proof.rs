use std::{collections::HashMap, sync::Arc};

use data_model::{Execution, ExecutionId, ProofCheck, ProofStatus};
use futures::future::join_all;
use gateway::FetchGateway;
use opentelemetry::KeyValue;
use tracing::{info, warn};

/// Checks that an execution's content is included in the published
/// transparency log.
pub struct ProofVerifier {
    gateway: Arc<dyn FetchGateway>,
    metrics: metrics::analysis_stats::Metrics,
}

impl ProofVerifier {
    pub fn new(gateway: Arc<dyn FetchGateway>) -> Self {
        Self {
            gateway,
            metrics: metrics::analysis_stats::Metrics::new(),
        }
    }

    pub async fn verify(&self, execution_id: &ExecutionId, content_pointer: &str) -> ProofCheck {
        let (proof, root) = tokio::join!(
            self.gateway.fetch_proof(execution_id, content_pointer),
            self.gateway.fetch_transparency_root(),
        );

        let check = match (proof, root) {
            // An empty log publishes an empty root; nothing can be proven yet.
            (Ok(proof), Ok(root)) if root.root.trim().is_empty() => ProofCheck {
                execution_id: execution_id.clone(),
                status: ProofStatus::Unavailable,
                proof_root: Some(proof.merkle_root),
                published_root: None,
                error: Some("transparency log has no published root".to_string()),
            },
            (Ok(proof), Ok(root)) => {
                let roots_match = proof.merkle_root.eq_ignore_ascii_case(&root.root);
                let path_ok = proof.path_is_consistent();
                if !path_ok {
                    warn!(execution_id = %execution_id, "proof path does not reproduce its root");
                }
                ProofCheck {
                    execution_id: execution_id.clone(),
                    status: if roots_match && path_ok {
                        ProofStatus::Verified
                    } else {
                        ProofStatus::Mismatched
                    },
                    proof_root: Some(proof.merkle_root),
                    published_root: Some(root.root),
                    error: None,
                }
            }
            (proof, root) => {
                let error = [proof.err(), root.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                ProofCheck {
                    execution_id: execution_id.clone(),
                    status: ProofStatus::Unavailable,
                    proof_root: None,
                    published_root: None,
                    error: Some(error),
                }
            }
        };

        info!(
            execution_id = %execution_id,
            status = %check.status,
            "proof checked"
        );
        self.metrics.proof_checks.add(
            1,
            &[KeyValue::new("status", check.status.as_ref().to_string())],
        );
        check
    }

    /// Verifies every execution that carries a content pointer.
    pub async fn verify_all<'a>(
        &self,
        executions: impl IntoIterator<Item = &'a Execution>,
    ) -> HashMap<ExecutionId, ProofCheck> {
        let checks = executions.into_iter().filter_map(|execution| {
            let pointer = execution.content_pointer.as_deref()?;
            Some(self.verify(&execution.id, pointer))
        });
        join_all(checks)
            .await
            .into_iter()
            .map(|check| (check.execution_id.clone(), check))
            .collect()
    }
}
