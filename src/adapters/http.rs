//! Shared HTTP transport for the dialect strategies. One thin wrapper around
//! [`reqwest::Client`] that owns base-url joining, auth-header injection, and the
//! status-code-to-[`ProviderError`] classification table from the error-handling
//! section, so every strategy maps upstream errors the same way.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProviderError;

/// How a strategy authenticates against its upstream.
#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    QueryParam { name: String, value: String },
    None,
}

#[derive(Clone)]
pub struct AdapterHttp {
    client: Client,
    base_url: String,
    default_headers: HeaderMap,
    query_auth: Option<(String, String)>,
}

impl AdapterHttp {
    pub fn new(
        timeout: Duration,
        base_url: impl Into<String>,
        extra_headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProviderError::Transport)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert("content-type", "application/json".parse().unwrap());

        let mut query_auth = None;
        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(v) = format!("Bearer {token}").parse() {
                    default_headers.insert("authorization", v);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::QueryParam { name, value } => query_auth = Some((name, value)),
            AuthStrategy::None => {}
        }

        for (k, v) in extra_headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                default_headers.insert(name, value);
            }
        }

        Ok(Self {
            client,
            base_url: base_url.into(),
            default_headers,
            query_auth,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let resp = self.post_json_raw(path, body).await?;
        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| ProviderError::Decode { message: e.to_string() })
    }

    pub async fn post_json_raw<Req: Serialize>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Response, ProviderError> {
        let mut req = self
            .client
            .request(Method::POST, self.url(path))
            .headers(self.default_headers.clone())
            .json(body);
        if let Some((name, value)) = &self.query_auth {
            req = req.query(&[(name.as_str(), value.as_str())]);
        }
        req.send().await.map_err(ProviderError::Transport)
    }

    pub async fn get_json<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, ProviderError> {
        let mut req = self
            .client
            .request(Method::GET, self.url(path))
            .headers(self.default_headers.clone());
        if let Some((name, value)) = &self.query_auth {
            req = req.query(&[(name.as_str(), value.as_str())]);
        }
        let resp = req.send().await.map_err(ProviderError::Transport)?;
        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| ProviderError::Decode { message: e.to_string() })
    }

    pub async fn get_raw(&self, path: &str, timeout: Duration) -> Result<Response, ProviderError> {
        let mut req = self
            .client
            .request(Method::GET, self.url(path))
            .headers(self.default_headers.clone())
            .timeout(timeout);
        if let Some((name, value)) = &self.query_auth {
            req = req.query(&[(name.as_str(), value.as_str())]);
        }
        req.send().await.map_err(ProviderError::Transport)
    }
}

/// Classifies a non-2xx upstream response per the error-handling table: 401/403
/// auth, 400/422 validation, 402 quota, 429 rate limit, other 4xx, 5xx.
pub async fn classify_error_response(resp: Response) -> ProviderError {
    let code = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(str::to_string))
                .or_else(|| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or(body);

    match code {
        401 | 403 => ProviderError::Upstream4xxAuth { code, message },
        400 | 422 => ProviderError::Upstream4xxValidation { code, message },
        402 => ProviderError::Upstream4xxQuota { code, message },
        429 => ProviderError::Upstream4xxRateLimit { code, message },
        400..=499 => ProviderError::Upstream4xxOther { code, message },
        500..=599 => ProviderError::Upstream5xx { code, message },
        _ => ProviderError::Upstream4xxOther { code, message },
    }
}
