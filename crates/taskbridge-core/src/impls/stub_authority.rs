//! StubAuthority - 保険者 API のスタブ
//!
//! スクリプトした応答を順に返し、尽きたら既定の応答（200）を返す。
//! テストと CLI の `--dry-run` で使う。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{MilestoneUpdatePayload, RegistrationPayload};
use crate::ports::{
    AuthorityApi, AuthorityError, AuthorityResponse, AuthoritySchedule,
    MILESTONE_UPDATE_ENDPOINT, REGISTRATION_ENDPOINT,
};

/// A call the stub received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub body: serde_json::Value,
}

struct StubState {
    scripted: VecDeque<Result<AuthorityResponse, AuthorityError>>,
    fallback: AuthorityResponse,
    calls: Vec<RecordedCall>,
    schedules: HashMap<(String, NaiveDate), Vec<AuthoritySchedule>>,
    schedule_error: Option<AuthorityError>,
    schedule_fetches: usize,
}

pub struct StubAuthority {
    state: Mutex<StubState>,
}

impl Default for StubAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl StubAuthority {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                scripted: VecDeque::new(),
                fallback: AuthorityResponse::new(AuthorityResponse::OK, "Ok."),
                calls: Vec::new(),
                schedules: HashMap::new(),
                schedule_error: None,
                schedule_fetches: 0,
            }),
        }
    }

    /// Response used once the script is exhausted.
    pub fn respond_always(&self, response: AuthorityResponse) {
        self.with_state(|s| s.fallback = response);
    }

    pub fn push_response(&self, response: Result<AuthorityResponse, AuthorityError>) {
        self.with_state(|s| s.scripted.push_back(response));
    }

    pub fn set_schedules(&self, clinic_id: &str, date: NaiveDate, schedules: Vec<AuthoritySchedule>) {
        self.with_state(|s| {
            s.schedules.insert((clinic_id.to_string(), date), schedules);
        });
    }

    pub fn fail_schedule_fetches(&self, error: Option<AuthorityError>) {
        self.with_state(|s| s.schedule_error = error);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn schedule_fetches(&self) -> usize {
        self.with_state(|s| s.schedule_fetches)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut StubState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn answer(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<AuthorityResponse, AuthorityError> {
        self.with_state(|s| {
            s.calls.push(RecordedCall {
                endpoint: endpoint.to_string(),
                body,
            });
            s.scripted
                .pop_front()
                .unwrap_or_else(|| Ok(s.fallback.clone()))
        })
    }
}

#[async_trait]
impl AuthorityApi for StubAuthority {
    async fn submit_registration(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<AuthorityResponse, AuthorityError> {
        let body = serde_json::to_value(payload).map_err(|e| AuthorityError::Decode(e.to_string()))?;
        self.answer(REGISTRATION_ENDPOINT, body)
    }

    async fn submit_milestone_update(
        &self,
        payload: &MilestoneUpdatePayload,
    ) -> Result<AuthorityResponse, AuthorityError> {
        let body = serde_json::to_value(payload).map_err(|e| AuthorityError::Decode(e.to_string()))?;
        self.answer(MILESTONE_UPDATE_ENDPOINT, body)
    }

    async fn fetch_schedules(
        &self,
        clinic_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AuthoritySchedule>, AuthorityError> {
        self.with_state(|s| {
            s.schedule_fetches += 1;
            if let Some(err) = &s.schedule_error {
                return Err(err.clone());
            }
            Ok(s
                .schedules
                .get(&(clinic_id.to_string(), date))
                .cloned()
                .unwrap_or_default())
        })
    }
}
