//! Launches agents by asking a remote launch service over HTTP.

use async_trait::async_trait;
use job_types::{AgentLauncher, JobSpecification, LaunchError, LaunchReceipt};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchRequest<'a> {
    job_id: &'a str,
    specification: &'a JobSpecification,
}

/// POSTs `{"jobId": ..., "specification": {...}}` to a launch endpoint.
///
/// The response body, if it is JSON, is kept as the receipt's launcher data. There is no
/// handle: killing a remotely launched agent goes through the job status instead.
pub struct HttpAgentLauncher {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpAgentLauncher {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token,
        }
    }
}

#[async_trait]
impl AgentLauncher for HttpAgentLauncher {
    async fn launch(
        &self,
        job_id: &str,
        specification: &JobSpecification,
    ) -> Result<LaunchReceipt, LaunchError> {
        let mut req = self.client.post(&self.url).json(&LaunchRequest {
            job_id,
            specification,
        });
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let res = req
            .send()
            .await
            .map_err(|e| LaunchError::Unavailable(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| LaunchError::Unavailable(e.to_string()))?;
        if status.is_client_error() {
            return Err(LaunchError::Rejected(format!(
                "launch service returned {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(LaunchError::Unavailable(format!(
                "launch service returned {}: {}",
                status, body
            )));
        }
        tracing::info!(job_id = %job_id, url = %self.url, "agent launch requested");
        Ok(LaunchReceipt {
            handle: None,
            launcher_ext: serde_json::from_str(&body).ok(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
