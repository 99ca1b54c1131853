//! Azure authentication
//!
//! Tokens come from one of two places: a pre-acquired bearer token in
//! `AZURE_ACCESS_TOKEN` (the `az account get-access-token` hand-off used by
//! the original pipeline), or the OAuth client-credentials grant against the
//! Microsoft identity platform when service principal variables are set.

use crate::error::{ProvisionError, Result};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Scope for Azure Resource Manager API access
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Default authority host; override with AZURE_AUTHORITY_HOST for sovereign clouds
const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the response does not carry one (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
enum TokenSource {
    /// Token supplied by the environment, used verbatim and never refreshed.
    Static(String),
    /// Service principal exchanged for tokens on demand.
    ClientCredentials {
        authority: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: TokenSource,
    http: reqwest::Client,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    /// Check if this cached token is still valid
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl AzureCredentials {
    /// Build credentials from the process environment.
    ///
    /// `AZURE_ACCESS_TOKEN` wins when present; otherwise all three of
    /// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, and `AZURE_CLIENT_SECRET`
    /// are required.
    pub fn from_env() -> Result<Self> {
        if let Some(token) = env_nonempty("AZURE_ACCESS_TOKEN") {
            return Ok(Self::with_source(TokenSource::Static(token)));
        }

        let tenant_id =
            env_nonempty("AZURE_TENANT_ID").ok_or_else(|| missing_credential("AZURE_TENANT_ID"))?;
        let client_id =
            env_nonempty("AZURE_CLIENT_ID").ok_or_else(|| missing_credential("AZURE_CLIENT_ID"))?;
        let client_secret = env_nonempty("AZURE_CLIENT_SECRET")
            .ok_or_else(|| missing_credential("AZURE_CLIENT_SECRET"))?;
        let authority =
            env_nonempty("AZURE_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());

        Ok(Self::with_source(TokenSource::ClientCredentials {
            authority,
            tenant_id,
            client_id,
            client_secret,
        }))
    }

    /// Credentials around a fixed token. Used by tests and by callers that
    /// already hold a valid bearer token.
    pub fn with_static_token(token: &str) -> Self {
        Self::with_source(TokenSource::Static(token.to_string()))
    }

    fn with_source(source: TokenSource) -> Self {
        Self {
            source,
            http: reqwest::Client::new(),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for API calls
    /// Checks token expiry before returning a cached token
    pub async fn get_token(&self) -> Result<String> {
        if let TokenSource::Static(token) = &self.source {
            return Ok(token.clone());
        }

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let (token, ttl) = self.fetch_token().await?;
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        let TokenSource::ClientCredentials {
            authority,
            tenant_id,
            client_id,
            client_secret,
        } = &self.source
        else {
            unreachable!("static tokens are returned before fetch");
        };

        let url = format!("{}/{}/oauth2/v2.0/token", authority, tenant_id);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", ARM_SCOPE),
            ])
            .send()
            .await
            .context("Failed to reach the token endpoint")?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Api(anyhow::anyhow!(
                "Token request failed: {}. Check the service principal credentials.",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        Ok((token.access_token, ttl))
    }
}

/// Resolve the target subscription from the environment
pub fn default_subscription() -> Result<String> {
    env_nonempty("AZURE_SUBSCRIPTION_ID")
        .ok_or_else(|| ProvisionError::configuration("AZURE_SUBSCRIPTION_ID"))
}

/// Resolve the AAD tenant from the environment. Needed even with a static
/// token: Key Vault create bodies carry the tenant ID.
pub fn tenant_id() -> Result<String> {
    env_nonempty("AZURE_TENANT_ID").ok_or_else(|| ProvisionError::configuration("AZURE_TENANT_ID"))
}

fn missing_credential(key: &str) -> ProvisionError {
    ProvisionError::configuration(format!(
        "{key} (set AZURE_ACCESS_TOKEN, or the full AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET trio)"
    ))
}

fn env_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_is_returned_verbatim() {
        let credentials = AzureCredentials::with_static_token("ey.test.token");
        let token = tokio_test::block_on(credentials.get_token()).unwrap();
        assert_eq!(token, "ey.test.token");
    }

    #[test]
    fn cached_token_expiry_check() {
        let valid = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(valid.is_valid());

        let expired = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now() - Duration::from_secs(1),
        };
        assert!(!expired.is_valid());
    }
}
