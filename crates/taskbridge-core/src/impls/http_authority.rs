//! HTTP client for the authority's queue API.
//!
//! Every response is wrapped as `{"metadata": {"code", "message"}, "response": ...}`.
//! Request signing and response decryption sit behind [`RequestSigner`];
//! [`StaticHeaders`] only sends the consumer id and user key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{MilestoneUpdatePayload, RegistrationPayload};
use crate::ports::{
    AuthorityApi, AuthorityError, AuthorityResponse, AuthoritySchedule,
    MILESTONE_UPDATE_ENDPOINT, REGISTRATION_ENDPOINT,
};

/// Adds authentication headers and decodes protected response bodies.
pub trait RequestSigner: Send + Sync {
    fn headers(&self, timestamp: i64) -> Vec<(String, String)>;

    /// Decode a body the authority returned as an opaque string.
    fn decode(&self, raw: &str, _timestamp: i64) -> Result<serde_json::Value, AuthorityError> {
        Err(AuthorityError::Decode(format!(
            "protected response body ({} bytes) needs a decoding signer",
            raw.len()
        )))
    }
}

#[derive(Debug, Clone)]
pub struct StaticHeaders {
    pub cons_id: String,
    pub user_key: String,
}

impl RequestSigner for StaticHeaders {
    fn headers(&self, timestamp: i64) -> Vec<(String, String)> {
        vec![
            ("x-cons-id".into(), self.cons_id.clone()),
            ("x-timestamp".into(), timestamp.to_string()),
            ("user_key".into(), self.user_key.clone()),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Metadata,
    #[serde(default)]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    /// Sent as a number or as a numeric string.
    code: serde_json::Value,
    #[serde(default)]
    message: String,
}

impl Metadata {
    fn code(&self) -> Result<u16, AuthorityError> {
        let code = match &self.code {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        code.and_then(|c| u16::try_from(c).ok())
            .ok_or_else(|| AuthorityError::Decode(format!("invalid code {}", self.code)))
    }
}

pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
    signer: Arc<dyn RequestSigner>,
}

impl HttpAuthority {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    fn signed(&self, request: RequestBuilder, timestamp: i64) -> RequestBuilder {
        self.signer
            .headers(timestamp)
            .into_iter()
            .fold(request, |req, (name, value)| req.header(name, value))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Envelope, AuthorityError> {
        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest)?;
        serde_json::from_str(&text).map_err(|e| {
            AuthorityError::Decode(format!("http {status}: {e}: {}", truncate(&text, 200)))
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<AuthorityResponse, AuthorityError> {
        let timestamp = Utc::now().timestamp();
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "posting to authority");

        let request = self.signed(self.client.post(&url).json(body), timestamp);
        let envelope = self.send(request).await?;
        Ok(AuthorityResponse {
            code: envelope.metadata.code()?,
            message: envelope.metadata.message,
            body: envelope.response,
        })
    }
}

fn map_reqwest(err: reqwest::Error) -> AuthorityError {
    if err.is_timeout() {
        AuthorityError::Timeout
    } else {
        AuthorityError::Transport(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl AuthorityApi for HttpAuthority {
    async fn submit_registration(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<AuthorityResponse, AuthorityError> {
        self.post(REGISTRATION_ENDPOINT, payload).await
    }

    async fn submit_milestone_update(
        &self,
        payload: &MilestoneUpdatePayload,
    ) -> Result<AuthorityResponse, AuthorityError> {
        self.post(MILESTONE_UPDATE_ENDPOINT, payload).await
    }

    async fn fetch_schedules(
        &self,
        clinic_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AuthoritySchedule>, AuthorityError> {
        let timestamp = Utc::now().timestamp();
        let url = format!(
            "{}/jadwaldokter/kodepoli/{}/tanggal/{}",
            self.base_url,
            clinic_id,
            date.format("%Y-%m-%d")
        );
        let envelope = self
            .send(self.signed(self.client.get(&url), timestamp))
            .await?;

        read_schedules(envelope, self.signer.as_ref(), timestamp)
    }
}

/// 201 は「該当日の診療なし」。それ以外の 200 以外のコードは失敗として返す。
const NO_SCHEDULE: u16 = 201;

fn read_schedules(
    envelope: Envelope,
    signer: &dyn RequestSigner,
    timestamp: i64,
) -> Result<Vec<AuthoritySchedule>, AuthorityError> {
    match envelope.metadata.code()? {
        AuthorityResponse::OK => {}
        NO_SCHEDULE => {
            debug!(message = %envelope.metadata.message, "no schedules");
            return Ok(Vec::new());
        }
        code => {
            return Err(AuthorityError::Rejected {
                code,
                message: envelope.metadata.message,
            });
        }
    }

    let body = match envelope.response {
        serde_json::Value::String(raw) => signer.decode(&raw, timestamp)?,
        other => other,
    };
    decode_schedules(body)
}

fn decode_schedules(body: serde_json::Value) -> Result<Vec<AuthoritySchedule>, AuthorityError> {
    // list が直接来る場合と {"list": [...]} の場合がある
    let list = match body {
        serde_json::Value::Object(mut map) => map.remove("list").unwrap_or_default(),
        other => other,
    };
    if list.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(list).map_err(|e| AuthorityError::Decode(e.to_string()))
}
