//! Registration admission.
//!
//! Decides READY or BLOCKED for a registration and freezes the payload
//! figures. Used at ingestion time and again by revalidation.
//!
//! Policy:
//! - clinic, provider and queue number must be present
//! - a schedule must exist after auto-fetch
//! - zero quota and a missing quota calculation are accepted; the payload
//!   then carries zeros

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tracing::debug;

use super::quota::{QuotaAggregator, QuotaInfo, estimated_service_ms};
use super::schedule_validator::{ScheduleCheck, ScheduleValidator};
use crate::domain::payload::DEFAULT_VISIT_TYPE;
use crate::domain::visit::queue_sequence;
use crate::domain::{Admission, PayloadSnapshot, ScheduleSnapshot, SyncError};

/// 受付判定に使う項目
#[derive(Debug, Clone, Copy)]
pub struct RegistrationKey<'a> {
    pub clinic_id: &'a str,
    pub provider_id: &'a str,
    pub visit_date: NaiveDate,
    pub queue_number: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub admission: Admission,
    pub schedule: Option<ScheduleSnapshot>,
    pub quota: Option<QuotaInfo>,
    pub estimated_service_ms: Option<i64>,
}

impl Assessment {
    fn blocked(reason: String) -> Self {
        Self {
            admission: Admission::Blocked(reason),
            schedule: None,
            quota: None,
            estimated_service_ms: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.admission == Admission::Ready
    }

    pub fn snapshot(
        &self,
        medical_record_no: Option<String>,
        visit_type: Option<u8>,
    ) -> PayloadSnapshot {
        let schedule = self.schedule.as_ref();
        let quota = self.quota.as_ref();
        PayloadSnapshot {
            practice_hours: quota
                .map(|q| q.practice_hours.clone())
                .or_else(|| schedule.map(ScheduleSnapshot::practice_hours)),
            capacity: quota.map_or(0, |q| q.capacity),
            remaining: quota.map_or(0, |q| q.remaining),
            non_insured_capacity: quota.map_or(0, |q| q.non_insured_capacity),
            non_insured_remaining: quota.map_or(0, |q| q.non_insured_remaining),
            estimated_service_ms: self.estimated_service_ms,
            clinic_name: schedule.and_then(|s| s.clinic_name.clone()),
            provider_name: schedule.and_then(|s| s.provider_name.clone()),
            medical_record_no,
            visit_type: visit_type.unwrap_or(DEFAULT_VISIT_TYPE),
        }
    }
}

pub struct RegistrationAdmitter {
    validator: Arc<ScheduleValidator>,
    quota: Arc<QuotaAggregator>,
    offset: FixedOffset,
    minutes_per_slot: u32,
}

impl RegistrationAdmitter {
    pub fn new(
        validator: Arc<ScheduleValidator>,
        quota: Arc<QuotaAggregator>,
        offset: FixedOffset,
        minutes_per_slot: u32,
    ) -> Self {
        Self {
            validator,
            quota,
            offset,
            minutes_per_slot,
        }
    }

    pub async fn assess(&self, key: RegistrationKey<'_>) -> Result<Assessment, SyncError> {
        let missing: Vec<&str> = [
            ("clinic", key.clinic_id),
            ("provider", key.provider_id),
            ("queue number", key.queue_number),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Ok(Assessment::blocked(format!(
                "incomplete registration: missing {}",
                missing.join(", ")
            )));
        }

        let check = self
            .validator
            .validate(key.clinic_id, key.provider_id, key.visit_date)
            .await?;
        let schedule = match check {
            ScheduleCheck::Valid(schedule) => schedule,
            ScheduleCheck::Blocked { reason } => return Ok(Assessment::blocked(reason)),
        };

        let quota = self
            .quota
            .calculate(key.clinic_id, key.provider_id, key.visit_date)
            .await?;
        if quota.is_none() {
            debug!(clinic_id = key.clinic_id, provider_id = key.provider_id, "no quota figures");
        }

        let start = quota.as_ref().map_or(schedule.start_time, |q| q.start_time);
        let estimated = estimated_service_ms(
            key.visit_date,
            start,
            queue_sequence(key.queue_number),
            self.minutes_per_slot,
            self.offset,
        );

        Ok(Assessment {
            admission: Admission::Ready,
            schedule: Some(schedule),
            quota,
            estimated_service_ms: estimated,
        })
    }
}
