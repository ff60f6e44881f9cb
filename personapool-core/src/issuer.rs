use async_trait::async_trait;
use chrono::{DateTime, Utc};
use personapool_common::{IssuerConfig, PoolError, Secret, SessionCredential};
use serde::{Deserialize, Serialize};
use tracing::*;
use url::Url;

/// Obtains a session credential for a fingerprint from the target site.
/// `Ok(None)` means "no credential this round, try again later" and is
/// never fatal.
#[async_trait]
pub trait CredentialIssuer {
    async fn issue(&self, fingerprint: &str) -> Result<Option<SessionCredential>, PoolError>;
}

#[derive(Serialize)]
struct IssueRequest<'a> {
    fingerprint: &'a str,
}

#[derive(Deserialize)]
struct IssueResponse {
    token: String,
    secondary_token: Option<String>,
    tertiary_token: Option<String>,
    expires_at: DateTime<Utc>,
}

pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    url: Url,
}

impl HttpCredentialIssuer {
    pub fn new(config: &IssuerConfig) -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(PoolError::other)?;
        Ok(Self {
            client,
            url: Url::parse(&config.url)?,
        })
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self, fingerprint: &str) -> Result<Option<SessionCredential>, PoolError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&IssueRequest { fingerprint })
            .send()
            .await
            .map_err(PoolError::other)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Credential issuer refused the request");
            return Ok(None);
        }

        let body: IssueResponse = response.json().await.map_err(PoolError::other)?;
        Ok(Some(SessionCredential {
            token: Secret::new(body.token),
            secondary_token: body.secondary_token.map(Secret::new),
            tertiary_token: body.tertiary_token.map(Secret::new),
            expires_at: body.expires_at,
        }))
    }
}
