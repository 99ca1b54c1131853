//! HTTP utilities for Azure Resource Manager REST calls

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        format!(
            "{}... [truncated, {} bytes total]",
            &body[..MAX_LOG_BODY_LENGTH],
            body.len()
        )
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for ARM API calls
#[derive(Clone)]
pub struct ArmHttpClient {
    client: Client,
}

impl ArmHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azprov/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to an ARM endpoint
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }

    /// Make a GET request where absence is an expected outcome.
    ///
    /// Returns `Ok(None)` only on 404. Any other failure is a real error:
    /// a permission or transport problem must not be mistaken for "the
    /// resource does not exist".
    pub async fn get_optional(&self, url: &str, token: &str) -> Result<Option<Value>> {
        tracing::debug!("GET {} (existence probe)", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        let value = serde_json::from_str(&body).context("Failed to parse response JSON")?;
        Ok(Some(value))
    }

    /// Make a PUT request to an ARM endpoint (create or update)
    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        tracing::debug!("PUT {}", url);

        let response = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!(
                "API error: {} - {}",
                status,
                sanitize_for_log(&response_body)
            );
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        // 202 Accepted on long-running creates can come with an empty body
        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).context("Failed to parse response JSON")
    }
}

impl Default for ArmHttpClient {
    fn default() -> Self {
        Self::new().expect("Failed to create default HTTP client")
    }
}

/// Format an ARM API error for display
/// Sanitizes error messages to avoid leaking API details
pub fn format_arm_error(error: &anyhow::Error) -> String {
    let error_str = error.to_string();

    if error_str.contains("403") {
        return "Permission denied. Check your Azure RBAC role assignments.".to_string();
    }
    if error_str.contains("401") {
        return "Authentication failed. Check AZURE_ACCESS_TOKEN or the service principal credentials.".to_string();
    }
    if error_str.contains("404") {
        return "Resource not found.".to_string();
    }
    if error_str.contains("429") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("400") {
        return "Invalid request. Check your parameters.".to_string();
    }
    if error_str.contains("500") || error_str.contains("503") {
        return "Azure service temporarily unavailable. Please try again.".to_string();
    }
    if error_str.contains("409") {
        return "Resource conflict. The resource may already exist or be in use.".to_string();
    }

    if error_str.contains("API request failed") {
        return "Request failed. Check your network connection and try again.".to_string();
    }

    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_optional_maps_404_to_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "ResourceNotFound"}
            })))
            .mount(&server)
            .await;

        let client = ArmHttpClient::new().unwrap();
        let result = client
            .get_optional(&format!("{}/missing", server.uri()), "token")
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_optional_returns_body_on_200() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/present"))
            .and(bearer_token("token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "vnet-apim",
                "properties": {"provisioningState": "Succeeded"}
            })))
            .mount(&server)
            .await;

        let client = ArmHttpClient::new().unwrap();
        let result = client
            .get_optional(&format!("{}/present", server.uri()), "token")
            .await
            .unwrap();

        assert_eq!(result.unwrap()["name"], "vnet-apim");
    }

    #[tokio::test]
    async fn get_optional_propagates_other_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "AuthorizationFailed"}
            })))
            .mount(&server)
            .await;

        let client = ArmHttpClient::new().unwrap();
        let result = client
            .get_optional(&format!("{}/forbidden", server.uri()), "token")
            .await;

        // 403 must not look like absence
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn put_handles_empty_accepted_body() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/slow-create"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = ArmHttpClient::new().unwrap();
        let result = client
            .put(
                &format!("{}/slow-create", server.uri()),
                "token",
                &json!({"location": "westeurope"}),
            )
            .await
            .unwrap();

        assert!(result.is_null());
    }

    #[test]
    fn sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("truncated"));
        assert!(sanitized.len() < body.len());
    }

    #[test]
    fn format_arm_error_maps_common_statuses() {
        let err = anyhow::anyhow!("API request failed: 401 Unauthorized");
        assert!(format_arm_error(&err).contains("Authentication failed"));

        let err = anyhow::anyhow!("API request failed: 403 Forbidden");
        assert!(format_arm_error(&err).contains("Permission denied"));
    }
}
