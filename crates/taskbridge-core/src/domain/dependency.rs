//! Dependency rules between milestones.
//!
//! A milestone may only be reported once its predecessors have been
//! accepted (SENT) by the authority. The table is static; the state it is
//! evaluated against lives in [`TaskProgress`].

use super::milestone::Milestone;
use super::progress::TaskProgress;

/// One prerequisite of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The given milestone must be SENT.
    Sent(Milestone),
    /// At least one of the given milestones must be SENT.
    AnySent(&'static [Milestone]),
}

impl Requirement {
    fn is_met(&self, progress: &TaskProgress) -> bool {
        match self {
            Requirement::Sent(m) => progress.is_sent(*m),
            Requirement::AnySent(alternatives) => alternatives.iter().any(|m| progress.is_sent(*m)),
        }
    }

    /// The predecessor reported when the requirement is not met.
    /// For alternatives the first one is named.
    fn reported(&self) -> Milestone {
        match self {
            Requirement::Sent(m) => *m,
            Requirement::AnySent(alternatives) => alternatives[0],
        }
    }
}

const CLOSE_ALTERNATIVES: &[Milestone] = &[Milestone::ServiceFinish, Milestone::PharmacyStart];

/// Requirements of a milestone, checked in order.
pub fn requirements(milestone: Milestone) -> &'static [Requirement] {
    use Milestone::*;
    match milestone {
        Register => &[],
        CheckIn => &[Requirement::Sent(Register)],
        ServiceStart => &[Requirement::Sent(Register), Requirement::Sent(CheckIn)],
        ServiceFinish => &[Requirement::Sent(Register), Requirement::Sent(ServiceStart)],
        PharmacyStart => &[Requirement::Sent(Register), Requirement::Sent(ServiceFinish)],
        Close => &[
            Requirement::Sent(Register),
            Requirement::AnySent(CLOSE_ALTERNATIVES),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCheck {
    Satisfied,
    Unsatisfied { missing: Milestone },
}

impl DependencyCheck {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, DependencyCheck::Satisfied)
    }
}

/// Evaluate the dependency table for `milestone` against `progress`.
pub fn check(progress: &TaskProgress, milestone: Milestone) -> DependencyCheck {
    requirements(milestone)
        .iter()
        .find(|req| !req.is_met(progress))
        .map(|req| DependencyCheck::Unsatisfied {
            missing: req.reported(),
        })
        .unwrap_or(DependencyCheck::Satisfied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn sent(milestones: &[Milestone]) -> TaskProgress {
        let at = Utc.with_ymd_and_hms(2026, 1, 24, 1, 0, 0).unwrap();
        TaskProgress::with_sent(milestones, at)
    }

    #[rstest]
    #[case::checkin_needs_register(Milestone::CheckIn, &[], Some(Milestone::Register))]
    #[case::checkin_ok(Milestone::CheckIn, &[Milestone::Register], None)]
    #[case::start_needs_checkin(Milestone::ServiceStart, &[Milestone::Register], Some(Milestone::CheckIn))]
    #[case::start_needs_register_first(Milestone::ServiceStart, &[Milestone::CheckIn], Some(Milestone::Register))]
    #[case::finish_needs_start(
        Milestone::ServiceFinish,
        &[Milestone::Register, Milestone::CheckIn],
        Some(Milestone::ServiceStart)
    )]
    #[case::pharmacy_needs_finish(
        Milestone::PharmacyStart,
        &[Milestone::Register, Milestone::ServiceStart],
        Some(Milestone::ServiceFinish)
    )]
    #[case::close_via_finish(Milestone::Close, &[Milestone::Register, Milestone::ServiceFinish], None)]
    #[case::close_via_pharmacy(Milestone::Close, &[Milestone::Register, Milestone::PharmacyStart], None)]
    #[case::close_without_either(
        Milestone::Close,
        &[Milestone::Register, Milestone::ServiceStart],
        Some(Milestone::ServiceFinish)
    )]
    #[case::register_has_no_prerequisite(Milestone::Register, &[], None)]
    fn dependency_table(
        #[case] milestone: Milestone,
        #[case] already_sent: &[Milestone],
        #[case] missing: Option<Milestone>,
    ) {
        let expected = match missing {
            Some(missing) => DependencyCheck::Unsatisfied { missing },
            None => DependencyCheck::Satisfied,
        };
        assert_eq!(check(&sent(already_sent), milestone), expected);
    }
}
