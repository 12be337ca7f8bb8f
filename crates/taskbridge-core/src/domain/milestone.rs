//! Milestone - 受診の報告段階
//!
//! 保険者 API が受け付ける taskid と 1:1 に対応します。
//! id 2 は保険者側で予約済み（本システムでは使わない）ため、変換時に拒否します。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One reportable stage of a patient visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Milestone {
    Register,
    CheckIn,
    ServiceStart,
    ServiceFinish,
    PharmacyStart,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown milestone id {0}")]
pub struct UnknownMilestone(pub u8);

impl Milestone {
    pub const ALL: [Milestone; 6] = [
        Milestone::Register,
        Milestone::CheckIn,
        Milestone::ServiceStart,
        Milestone::ServiceFinish,
        Milestone::PharmacyStart,
        Milestone::Close,
    ];

    /// Milestones reported through the generic update endpoint.
    pub const UPDATES: [Milestone; 5] = [
        Milestone::CheckIn,
        Milestone::ServiceStart,
        Milestone::ServiceFinish,
        Milestone::PharmacyStart,
        Milestone::Close,
    ];

    pub const fn id(self) -> u8 {
        match self {
            Milestone::Register => 1,
            Milestone::CheckIn => 3,
            Milestone::ServiceStart => 4,
            Milestone::ServiceFinish => 5,
            Milestone::PharmacyStart => 6,
            Milestone::Close => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    /// Name of the source stream (and of its watermark row).
    pub const fn stream(self) -> &'static str {
        match self {
            Milestone::Register => "REGISTER",
            Milestone::CheckIn => "CHECKIN",
            Milestone::ServiceStart => "START",
            Milestone::ServiceFinish => "FINISH",
            Milestone::PharmacyStart => "PHARMACY_STARTED",
            Milestone::Close => "CLOSE",
        }
    }

    pub fn from_stream(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.stream().eq_ignore_ascii_case(name))
    }

    /// Only the registration can sit in READY/BLOCKED.
    pub const fn is_register(self) -> bool {
        matches!(self, Milestone::Register)
    }
}

impl TryFrom<u8> for Milestone {
    type Error = UnknownMilestone;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(UnknownMilestone(id))
    }
}

impl From<Milestone> for u8 {
    fn from(m: Milestone) -> Self {
        m.id()
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.stream(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::register(1, Some(Milestone::Register))]
    #[case::reserved(2, None)]
    #[case::checkin(3, Some(Milestone::CheckIn))]
    #[case::close(7, Some(Milestone::Close))]
    #[case::out_of_range(8, None)]
    fn from_id_maps_known_ids(#[case] id: u8, #[case] expected: Option<Milestone>) {
        assert_eq!(Milestone::from_id(id), expected);
    }

    #[test]
    fn reserved_id_is_rejected_when_deserializing() {
        let err = serde_json::from_str::<Milestone>("2").unwrap_err();
        assert!(err.to_string().contains("unknown milestone id 2"));
    }

    #[test]
    fn stream_names_resolve_back() {
        for m in Milestone::ALL {
            assert_eq!(Milestone::from_stream(m.stream()), Some(m));
        }
        assert_eq!(Milestone::from_stream("pharmacy_started"), Some(Milestone::PharmacyStart));
    }
}
