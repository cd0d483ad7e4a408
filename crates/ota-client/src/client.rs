//! Deployment API client
//!
//! Asks the server whether a new deployment exists for this device and
//! pushes deployment status transitions. The check speaks two protocol
//! versions: a v2 POST carrying the full provides map, falling back to
//! the v1 GET when the server answers 404.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use ota_core::DeviceContext;

use crate::error::{ClientError, Result};
use crate::status::DeploymentStatus;

const CHECK_UPDATES_V1_URI: &str = "/api/devices/v1/deployments/device/deployments/next";
const CHECK_UPDATES_V2_URI: &str = "/api/devices/v2/deployments/device/deployments/next";
const STATUS_URI_PREFIX: &str = "/api/devices/v1/deployments/device/deployments";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body shape used by the deployment server
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Client for the device-facing deployments API
#[derive(Debug, Clone)]
pub struct DeploymentsClient {
    client: Client,
    server_url: Url,
}

impl DeploymentsClient {
    /// Create a new client for `server_url` (e.g. "https://updates.example.com").
    pub fn new(server_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Self::with_client(server_url, client)
    }

    /// Create a client reusing a caller-owned HTTP client (connection
    /// pool, TLS configuration).
    pub fn with_client(server_url: &str, client: Client) -> Result<Self> {
        let server_url = Url::parse(server_url)?;
        Ok(Self { client, server_url })
    }

    /// Ask the server whether a new deployment is available.
    ///
    /// Returns `Ok(Some(deployment))` on 200, `Ok(None)` on 204. A 404 on
    /// the v2 endpoint triggers the v1 GET fallback; the fallback request
    /// is only issued after the v2 response has been fully consumed, so
    /// the HTTP client is never re-entered. Any other status becomes
    /// [`ClientError::BadResponse`] with the server's error message when
    /// one can be decoded.
    pub async fn check_new_deployments(
        &self,
        ctx: &DeviceContext,
    ) -> Result<Option<serde_json::Value>> {
        let device_type = ctx.get_device_type()?;
        let provides = ctx.load_provides()?;
        let artifact_name = provides
            .get("artifact_name")
            .ok_or_else(|| ClientError::InvalidData("Missing artifact name data".to_string()))?
            .clone();

        let mut device_provides = serde_json::Map::new();
        device_provides.insert("device_type".to_string(), json!(device_type));
        for (key, value) in &provides {
            device_provides.insert(key.clone(), json!(value));
        }
        let body = json!({
            "update_control_map": false,
            "device_provides": device_provides,
        });

        let url = self.server_url.join(CHECK_UPDATES_V2_URI)?;
        debug!(%url, "Checking for new deployments");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(parse_json_body(response).await?)),
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::NOT_FOUND => {
                info!(
                    "POST request to v2 version of the deployments API failed, \
                     falling back to v1 version and GET"
                );
                self.check_new_deployments_v1(&artifact_name, &device_type)
                    .await
            }
            _ => Err(extract_error(response).await),
        }
    }

    async fn check_new_deployments_v1(
        &self,
        artifact_name: &str,
        device_type: &str,
    ) -> Result<Option<serde_json::Value>> {
        let url = self.server_url.join(CHECK_UPDATES_V1_URI)?;
        let response = self
            .client
            .get(url)
            .query(&[("artifact_name", artifact_name), ("device_type", device_type)])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(parse_json_body(response).await?)),
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(extract_error(response).await),
        }
    }

    /// Report a deployment status transition to the server.
    pub async fn push_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        substate: Option<&str>,
    ) -> Result<()> {
        let url = self
            .server_url
            .join(&format!("{STATUS_URI_PREFIX}/{deployment_id}/status"))?;

        let mut body = serde_json::Map::new();
        body.insert("status".to_string(), json!(status.as_str()));
        if let Some(substate) = substate {
            body.insert("substate".to_string(), json!(substate));
        }

        debug!(deployment_id, status = %status, "Pushing deployment status");
        let response = self
            .client
            .put(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            let err = extract_error(response).await;
            Err(match err {
                ClientError::BadResponse { status, message } => ClientError::BadResponse {
                    status,
                    message: format!("from status API: {message}"),
                },
                other => other,
            })
        }
    }
}

/// Extract the artifact name offered by a deployment response.
///
/// Used for the already-installed short circuit before any download
/// starts. Both the v1 and v2 responses nest it under `artifact`.
pub fn deployment_artifact_name(deployment: &serde_json::Value) -> Option<&str> {
    deployment
        .get("artifact")?
        .get("artifact_name")?
        .as_str()
}

/// Extract the deployment id from a deployment response.
pub fn deployment_id(deployment: &serde_json::Value) -> Option<&str> {
    deployment.get("id")?.as_str()
}

async fn parse_json_body(response: Response) -> Result<serde_json::Value> {
    response
        .json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))
}

/// Decode the server's `{"error": "..."}` body, falling back to the HTTP
/// status phrase.
async fn extract_error(response: Response) -> ClientError {
    let status = response.status();
    let message = match response.json::<ErrorResponse>().await {
        Ok(err) => err.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
    };
    ClientError::BadResponse {
        status: status.as_u16(),
        message,
    }
}
