//! Outbound payloads, in the authority's wire naming.

use serde::{Deserialize, Serialize};

use super::milestone::Milestone;

pub const ARRIVAL_NOTE: &str = "Harap hadir 30 menit lebih awal";
pub const DEFAULT_VISIT_TYPE: u8 = 3;

/// Body of the registration call (milestone 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub kodebooking: String,
    pub jenispasien: String,
    pub nomorkartu: String,
    pub nik: String,
    pub nohp: String,
    pub kodepoli: String,
    pub namapoli: String,
    pub pasienbaru: u8,
    pub norm: String,
    pub tanggalperiksa: String,
    pub kodedokter: u64,
    pub namadokter: String,
    pub jampraktek: String,
    pub jeniskunjungan: u8,
    pub nomorreferensi: String,
    pub nomorantrean: String,
    pub angkaantrean: u32,
    pub estimasidilayani: i64,
    pub sisakuotajkn: u32,
    pub kuotajkn: u32,
    pub sisakuotanonjkn: u32,
    pub kuotanonjkn: u32,
    pub keterangan: String,
}

/// Body of the generic "milestone reached" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneUpdatePayload {
    pub kodebooking: String,
    pub taskid: u8,
    /// Epoch milliseconds of the event.
    pub waktu: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum JobPayload {
    Registration(RegistrationPayload),
    MilestoneUpdate(MilestoneUpdatePayload),
}

impl JobPayload {
    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            JobPayload::Registration(_) => Some(Milestone::Register),
            JobPayload::MilestoneUpdate(p) => Milestone::from_id(p.taskid),
        }
    }

    pub fn booking_code(&self) -> &str {
        match self {
            JobPayload::Registration(p) => &p.kodebooking,
            JobPayload::MilestoneUpdate(p) => &p.kodebooking,
        }
    }

    /// The body exactly as sent over the wire.
    pub fn body(&self) -> serde_json::Value {
        let body = match self {
            JobPayload::Registration(p) => serde_json::to_value(p),
            JobPayload::MilestoneUpdate(p) => serde_json::to_value(p),
        };
        body.unwrap_or(serde_json::Value::Null)
    }
}
