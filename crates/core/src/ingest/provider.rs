use crate::config::Settings;
use crate::domain::records::UserRecords;
use crate::ingest::types::{validate_records, UserListResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_user_records(&self, user_id: &str) -> Result<UserRecords>;

    async fn list_users(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonRecordSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonRecordSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_record_provider_base_url()?.to_string();
        let api_key = settings.record_provider_api_key.clone();

        let timeout_secs = std::env::var("RECORD_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("RECORD_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build record provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .send()
            .await
            .context("record provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read record provider response")?;

        if !status.is_success() {
            anyhow::bail!("record provider HTTP {status} for {path}: {text}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("record provider response for {path} has unexpected shape"))
    }

    /// Exponential backoff: 1s, 2s, 4s, ... between attempts.
    async fn get_with_retries<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err.context(format!("giving up after {attempt} attempts")));
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                    tracing::warn!(attempt, ?backoff, path, error = %err, "record provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for HttpJsonRecordSource {
    fn source_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_user_records(&self, user_id: &str) -> Result<UserRecords> {
        let path = format!("/v1/users/{user_id}/records");
        let records: UserRecords = self.get_with_retries(&path).await?;
        validate_records(&records, user_id)?;
        Ok(records)
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let resp: UserListResponse = self.get_with_retries("/v1/users").await?;
        Ok(resp.users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base_url: &str, api_key: Option<&str>) -> HttpJsonRecordSource {
        HttpJsonRecordSource {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            retries: 1,
        }
    }

    #[test]
    fn joins_base_url_without_double_slash() {
        let s = source("https://records.example.test/", None);
        assert_eq!(
            s.url("/v1/users/u1/records"),
            "https://records.example.test/v1/users/u1/records"
        );
    }

    #[test]
    fn sends_api_key_header_only_when_configured() {
        assert!(source("http://x", None).headers().unwrap().is_empty());
        let headers = source("http://x", Some("secret")).headers().unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
    }

    #[test]
    fn from_settings_requires_base_url() {
        let settings = Settings {
            sentry_dsn: None,
            catalog_path: None,
            record_provider_base_url: None,
            record_provider_api_key: None,
            strict: false,
        };
        let err = HttpJsonRecordSource::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("RECORD_PROVIDER_BASE_URL"));
    }
}
