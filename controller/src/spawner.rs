//! Job spawners: start one worker per CR, fire-and-forget with background
//! log capture.
//!
//! Two implementations: local subprocess for dev and tests, and a cluster
//! Job applied through `kubectl` for production.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{error, info, warn};

use hadron::events::keys;
use hadron::kvs::Kvs;

/// Worker logs are retrievable for a day.
const WORKER_LOG_TTL: std::time::Duration = std::time::Duration::from_secs(86_400);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("spawn failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts a worker for a CR. Implementations must not block on worker
/// completion.
#[async_trait]
pub trait JobSpawner: Send + Sync {
    async fn spawn(&self, cr_id: &str) -> Result<(), SpawnError>;
}

/// Spawns `hadron-worker` as a local subprocess. Output is captured in the
/// background and stored for the `/logs` endpoint.
pub struct SubprocessJobSpawner {
    kvs: Arc<dyn Kvs>,
}

impl SubprocessJobSpawner {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// The worker binary next to the running controller, falling back to
    /// PATH lookup.
    fn worker_binary() -> std::path::PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("hadron-worker")))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| std::path::PathBuf::from("hadron-worker"))
    }
}

#[async_trait]
impl JobSpawner for SubprocessJobSpawner {
    async fn spawn(&self, cr_id: &str) -> Result<(), SpawnError> {
        info!(cr_id, "spawning subprocess worker");
        let mut child = Command::new(Self::worker_binary())
            .arg("--cr-id")
            .arg(cr_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let kvs = self.kvs.clone();
        let cr_id = cr_id.to_string();
        tokio::spawn(async move {
            let mut output = Vec::new();
            if let Some(mut stdout) = child.stdout.take() {
                let _ = stdout.read_to_end(&mut output).await;
            }
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_end(&mut output).await;
            }
            let status = child.wait().await;
            let text = String::from_utf8_lossy(&output).into_owned();
            for line in text.lines() {
                info!(worker = %cr_id, "{line}");
            }
            info!(cr_id = %cr_id, status = ?status.map(|s| s.code()), "worker exited");
            if !text.is_empty() {
                if let Err(e) = kvs.set_ex(&keys::worker_log(&cr_id), &text, WORKER_LOG_TTL).await
                {
                    warn!(cr_id = %cr_id, error = %e, "failed to store worker log");
                }
            }
        });
        Ok(())
    }
}

/// Applies a Kubernetes Job manifest via `kubectl`. Fire-and-forget: the
/// apply result is only logged.
pub struct KubectlJobSpawner {
    namespace: String,
    worker_image: String,
}

impl KubectlJobSpawner {
    pub fn new(namespace: impl Into<String>, worker_image: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            worker_image: worker_image.into(),
        }
    }

    fn job_manifest(&self, cr_id: &str) -> serde_json::Value {
        let job_name = format!("hadron-worker-{}", cr_id.to_lowercase().replace('_', "-"));
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": job_name,
                "namespace": self.namespace,
                "labels": {"app": "hadron-worker", "cr-id": cr_id},
            },
            "spec": {
                "backoffLimit": 1,
                "ttlSecondsAfterFinished": 3600,
                "template": {
                    "metadata": {"labels": {"app": "hadron-worker", "cr-id": cr_id}},
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "worker",
                            "image": self.worker_image,
                            "command": ["hadron-worker", "--cr-id", cr_id],
                            "envFrom": [{"configMapRef": {"name": "hadron-config"}}],
                            "resources": {
                                "requests": {"memory": "512Mi", "cpu": "500m"},
                                "limits": {"memory": "2Gi", "cpu": "2"},
                            },
                        }],
                    },
                },
            },
        })
    }
}

#[async_trait]
impl JobSpawner for KubectlJobSpawner {
    async fn spawn(&self, cr_id: &str) -> Result<(), SpawnError> {
        let manifest = self.job_manifest(cr_id).to_string();
        let mut child = Command::new("kubectl")
            .args(["apply", "-n", &self.namespace, "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(manifest.as_bytes()).await?;
        }

        let cr_id = cr_id.to_string();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    info!(cr_id = %cr_id, "k8s job created");
                }
                Ok(output) => {
                    error!(
                        cr_id = %cr_id,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "kubectl apply failed"
                    );
                }
                Err(e) => error!(cr_id = %cr_id, error = %e, "kubectl apply failed"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the generated Job manifest carries the CR id through
    /// name, labels and the worker command.
    #[test]
    fn job_manifest_shape() {
        let spawner = KubectlJobSpawner::new("hadron", "hadron-worker:latest");
        let manifest = spawner.job_manifest("CR-ab12_cd");
        assert_eq!(manifest["metadata"]["name"], "hadron-worker-cr-ab12-cd");
        assert_eq!(manifest["metadata"]["labels"]["cr-id"], "CR-ab12_cd");
        let command = &manifest["spec"]["template"]["spec"]["containers"][0]["command"];
        assert_eq!(command[2], "CR-ab12_cd");
    }
}
