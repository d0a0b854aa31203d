//! Oracle REST Data Services (SODA) document client.
//!
//! Talks to one autonomous JSON database schema through the SODA REST API
//! using `reqwest`.  Every account is authenticated with the OAuth2
//! client-credentials grant against `{ords_url}/oauth/token`.
//!
//! URL mapping:
//!   Query:   `POST   {ords_url}/soda/latest/{alias}?action=query&...`
//!   Insert:  `POST   {ords_url}/soda/latest/{alias}`
//!   Delete:  `DELETE {ords_url}/soda/latest/{alias}/{id}`

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{Document, DocumentClient, QueryResult};
use crate::query::{PathFilter, QuerySpec};

// -- ORDS response types -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct InsertedItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    #[serde(default)]
    items: Vec<InsertedItem>,
}

#[derive(Debug, Deserialize)]
struct OrdsErrorResponse {
    title: Option<String>,
    message: Option<String>,
}

// -- Token management ---------------------------------------------------------

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Document client for a single ORDS schema.
pub struct OrdsClient {
    /// HTTP client for ORDS calls.
    client: reqwest::Client,
    /// Base schema URL exactly as configured.
    ords_url: String,
    /// OAuth2 client id.
    client_id: String,
    /// OAuth2 client secret.
    client_secret: String,
    /// Cached OAuth2 access token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl OrdsClient {
    /// Create a client for the schema at `ords_url`.
    ///
    /// Fails when the URL does not parse or the credentials are empty.
    /// No request is made until the first operation.
    pub fn new(
        ords_url: &str,
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let parsed = reqwest::Url::parse(ords_url)
            .map_err(|e| anyhow::anyhow!("Invalid ords_url '{ords_url}': {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Invalid ords_url '{ords_url}': scheme must be http or https");
        }
        if client_id.is_empty() || client_secret.is_empty() {
            anyhow::bail!("Missing OAuth client credentials for {ords_url}");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        info!("ORDS client initialized: url={}", ords_url);

        Ok(Self {
            client,
            ords_url: ords_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_cache: Mutex::new(None),
        })
    }

    /// Schema URL without a trailing slash.
    fn base(&self) -> &str {
        self.ords_url.trim_end_matches('/')
    }

    /// URL of the collection `alias`.
    fn collection_url(&self, alias: &str) -> String {
        format!("{}/soda/latest/{}", self.base(), Self::encode_segment(alias))
    }

    /// URL of the document `id` in collection `alias`.
    fn document_url(&self, alias: &str, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(alias),
            Self::encode_segment(id)
        )
    }

    /// Percent-encode a single path segment.
    fn encode_segment(segment: &str) -> String {
        percent_encoding::utf8_percent_encode(segment, percent_encoding::NON_ALPHANUMERIC)
            .to_string()
    }

    /// Get an OAuth2 access token, reusing the cached one until 60s before
    /// it expires.
    async fn get_access_token(&self) -> anyhow::Result<String> {
        {
            let cache = self.token_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let (token, expires_in) = self.fetch_access_token().await?;
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        {
            let mut cache = self.token_cache.lock().unwrap_or_else(|e| e.into_inner());
            *cache = Some(CachedToken {
                access_token: token.clone(),
                expiry,
            });
        }

        Ok(token)
    }

    /// Exchange the client credentials for a fresh access token.
    async fn fetch_access_token(&self) -> anyhow::Result<(String, u64)> {
        let url = format!("{}/oauth/token", self.base());
        debug!("Requesting ORDS access token from {}", url);

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_ords_error("token", status, &body));
        }

        let token: TokenResponse = resp.json().await?;
        Ok((token.access_token, token.expires_in))
    }

    /// Build authorization headers for SODA calls.
    async fn auth_headers(&self) -> anyhow::Result<HeaderMap> {
        let token = self.get_access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid auth header value: {e}"))?,
        );
        Ok(headers)
    }

    /// Map an ORDS HTTP error to an anyhow error with context.
    fn map_ords_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        if let Ok(err) = serde_json::from_str::<OrdsErrorResponse>(body) {
            if err.title.is_some() || err.message.is_some() {
                return anyhow::anyhow!(
                    "ORDS {}: {} {} (HTTP {})",
                    context,
                    err.title.unwrap_or_default(),
                    err.message.unwrap_or_default(),
                    status.as_u16()
                );
            }
        }
        anyhow::anyhow!("ORDS {context}: HTTP {status} - {body}")
    }

    async fn soda_query(
        &self,
        alias: &str,
        spec: &QuerySpec,
        filter: &PathFilter,
    ) -> anyhow::Result<QueryResult> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .post(self.collection_url(alias))
            .headers(auth)
            .query(&spec.params())
            .json(filter)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ORDS query request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_ords_error("query", status, &body));
        }

        Ok(resp.json().await?)
    }

    async fn soda_insert(&self, alias: &str, document: &Document) -> anyhow::Result<String> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .post(self.collection_url(alias))
            .headers(auth)
            .json(document)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ORDS insert request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_ords_error("insert", status, &body));
        }

        let inserted: InsertResponse = resp.json().await?;
        inserted
            .items
            .into_iter()
            .next()
            .map(|item| item.id)
            .ok_or_else(|| anyhow::anyhow!("ORDS insert: response carried no item id"))
    }

    async fn soda_delete(&self, alias: &str, id: &str) -> anyhow::Result<()> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .delete(self.document_url(alias, id))
            .headers(auth)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ORDS delete request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_ords_error("delete", status, &body));
        }

        Ok(())
    }
}

impl DocumentClient for OrdsClient {
    fn endpoint(&self) -> &str {
        &self.ords_url
    }

    fn query(
        &self,
        alias: &str,
        spec: &QuerySpec,
        filter: &PathFilter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<QueryResult>> + Send + '_>> {
        let alias = alias.to_string();
        let spec = *spec;
        let filter = filter.clone();
        Box::pin(async move { self.soda_query(&alias, &spec, &filter).await })
    }

    fn insert(
        &self,
        alias: &str,
        document: &Document,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let alias = alias.to_string();
        let document = document.clone();
        Box::pin(async move { self.soda_insert(&alias, &document).await })
    }

    fn delete(
        &self,
        alias: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let alias = alias.to_string();
        let id = id.to_string();
        Box::pin(async move { self.soda_delete(&alias, &id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> OrdsClient {
        OrdsClient::new(url, "id", "secret", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rejects_malformed_url() {
        assert!(OrdsClient::new("not a url", "id", "secret", Duration::from_secs(5)).is_err());
        assert!(OrdsClient::new("ftp://host/ords", "id", "secret", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_rejects_missing_credentials() {
        assert!(OrdsClient::new("https://host/ords/image", "", "secret", Duration::from_secs(5)).is_err());
        assert!(OrdsClient::new("https://host/ords/image", "id", "", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_endpoint_is_configured_url() {
        let c = client("https://host.example.com/ords/image/");
        assert_eq!(c.endpoint(), "https://host.example.com/ords/image/");
    }

    #[test]
    fn test_collection_and_document_urls() {
        let c = client("https://host.example.com/ords/image/");
        assert_eq!(
            c.collection_url("IMAGE"),
            "https://host.example.com/ords/image/soda/latest/IMAGE"
        );
        assert_eq!(
            c.document_url("IMAGE", "563BE46E"),
            "https://host.example.com/ords/image/soda/latest/IMAGE/563BE46E"
        );
    }

    #[test]
    fn test_alias_is_percent_encoded() {
        let c = client("https://host.example.com/ords/image");
        assert_eq!(
            c.collection_url("my images"),
            "https://host.example.com/ords/image/soda/latest/my%20images"
        );
    }

    #[test]
    fn test_map_ords_error_uses_title_and_message() {
        let body = r#"{"code":"Unauthorized","title":"Unauthorized","message":"token expired"}"#;
        let err = OrdsClient::map_ords_error("query", StatusCode::UNAUTHORIZED, body);
        let text = err.to_string();
        assert!(text.contains("Unauthorized"));
        assert!(text.contains("token expired"));
        assert!(text.contains("401"));
    }

    #[test]
    fn test_map_ords_error_falls_back_to_body() {
        let err = OrdsClient::map_ords_error("delete", StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("upstream down"));
    }
}
