//! AuthorityApi port - 保険者の受付キュー API
//!
//! 同一ペイロードの再送はエラーではない（208 が返る）前提で扱います。
//! 署名・暗号化は実装側（impls）の関心事。

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{MilestoneUpdatePayload, RegistrationPayload};

pub const REGISTRATION_ENDPOINT: &str = "/antrean/add";
pub const MILESTONE_UPDATE_ENDPOINT: &str = "/antrean/updatewaktu";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    /// 形式は正しいがエラーコードを返した応答
    #[error("authority answered {code}: {message}")]
    Rejected { code: u16, message: String },
}

/// 保険者からの応答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityResponse {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl AuthorityResponse {
    pub const OK: u16 = 200;
    pub const ALREADY_EXISTS: u16 = 208;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            body: serde_json::Value::Null,
        }
    }

    /// 成功と「登録済み」はどちらも送信済みとみなす
    pub fn is_accepted(&self) -> bool {
        matches!(self.code, Self::OK | Self::ALREADY_EXISTS)
    }
}

/// 保険者が公開している医師の診療枠 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySchedule {
    #[serde(rename = "kodepoli")]
    pub clinic_id: String,
    #[serde(rename = "namapoli", default)]
    pub clinic_name: Option<String>,
    #[serde(rename = "kodedokter")]
    pub provider_code: u64,
    #[serde(rename = "namadokter", default)]
    pub provider_name: Option<String>,
    /// `HH:MM-HH:MM` 形式
    #[serde(rename = "jadwal")]
    pub hours: String,
    #[serde(rename = "kapasitaspasien", default)]
    pub capacity: u32,
    #[serde(rename = "libur", default)]
    pub day_off: u8,
}

#[async_trait]
pub trait AuthorityApi: Send + Sync {
    async fn submit_registration(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<AuthorityResponse, AuthorityError>;

    async fn submit_milestone_update(
        &self,
        payload: &MilestoneUpdatePayload,
    ) -> Result<AuthorityResponse, AuthorityError>;

    async fn fetch_schedules(
        &self,
        clinic_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AuthoritySchedule>, AuthorityError>;
}
