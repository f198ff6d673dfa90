//! Service-day eligibility: weekday mask resolution and the forward scan
//! for the next orderable date.
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calendar::ServiceCalendar;
use crate::constants::{
    BASE_OFFSET_AFTER_CUTOFF, BASE_OFFSET_BEFORE_CUTOFF, ELIGIBILITY_SCAN_DAYS,
};
use crate::roster::{Account, AccountId, Role, Roster, RosterError};
use crate::weekdays::bit_for;

/// Which rule of the resolution chain produced the effective mask.
///
/// The chain is fixed and ordered; there is no runtime discovery of mask
/// sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Per-student override, gated on its enable flag.
    StudentOverride,
    /// OR-union of the masks of all active classes the student is in.
    ClassMembership,
    /// The configured global default.
    Default,
}

impl MaskStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StudentOverride => "student_override",
            Self::ClassMembership => "class_membership",
            Self::Default => "default",
        }
    }
}

/// Effective weekday mask and the strategy that won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskResolution {
    pub mask: u8,
    pub strategy: MaskStrategy,
}

/// Resolve the weekday mask for an account.
///
/// Priority: enabled per-student override, then class membership, then
/// the global default. Staff accounts have no lunch days at all.
#[must_use]
pub fn resolve_days_mask(roster: &Roster, account: &Account, default_mask: u8) -> MaskResolution {
    if account.role != Role::Student {
        return MaskResolution {
            mask: 0,
            strategy: MaskStrategy::Default,
        };
    }
    if account.override_enabled {
        return MaskResolution {
            mask: account.override_mask,
            strategy: MaskStrategy::StudentOverride,
        };
    }
    let mut combined = 0u8;
    let mut found = false;
    for class in roster.active_classes_of(account.id) {
        combined |= class.days_mask;
        found = true;
    }
    if found {
        return MaskResolution {
            mask: combined,
            strategy: MaskStrategy::ClassMembership,
        };
    }
    MaskResolution {
        mask: default_mask,
        strategy: MaskStrategy::Default,
    }
}

/// Whether `date` is a lunch day for the account.
///
/// An extra lunch day granted to any of the student's active classes is
/// checked first and short-circuits the weekday mask. Closures are a
/// separate concern handled by the caller.
#[must_use]
pub fn is_lunch_day(roster: &Roster, account: &Account, date: NaiveDate, default_mask: u8) -> bool {
    if roster
        .active_classes_of(account.id)
        .any(|class| class.extra_days.contains(&date))
    {
        return true;
    }
    resolve_days_mask(roster, account, default_mask).mask & bit_for(date) != 0
}

/// Result of a service-day resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDayOutcome {
    pub day: NaiveDate,
    /// The forward scan found nothing within its bound and fell back to
    /// the base day. A data-quality condition, not a hard failure.
    pub exhausted: bool,
}

/// Compute the next date the account may order for.
///
/// Strictly before the cutoff the base day is tomorrow; at or after it,
/// the day after tomorrow (the kitchen gets a full day of lead time).
/// From the base day, scan forward for the first date that is a lunch
/// day and not a closure.
pub fn next_service_day(
    roster: &Roster,
    student: AccountId,
    calendar: &ServiceCalendar,
    cutoff: chrono::NaiveTime,
    default_mask: u8,
    now: NaiveDateTime,
) -> Result<ServiceDayOutcome, RosterError> {
    let account = roster.require_account(student)?;
    let base_offset = if now.time() < cutoff {
        BASE_OFFSET_BEFORE_CUTOFF
    } else {
        BASE_OFFSET_AFTER_CUTOFF
    };
    let base = now.date() + Duration::days(base_offset);

    let mut day = base;
    for _ in 0..ELIGIBILITY_SCAN_DAYS {
        if is_lunch_day(roster, account, day, default_mask) && !calendar.is_closed(day) {
            return Ok(ServiceDayOutcome {
                day,
                exhausted: false,
            });
        }
        day += Duration::days(1);
    }

    log::warn!(
        "eligibility scan exhausted for {student}: no valid service day within {ELIGIBILITY_SCAN_DAYS} days of {base}; falling back to base day"
    );
    Ok(ServiceDayOutcome {
        day: base,
        exhausted: true,
    })
}
