//! Service closures and the cached daily cutoff setting.
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::constants::{CUTOFF_CACHE_TTL_SECS, DEFAULT_CUTOFF_HOUR, DEFAULT_CUTOFF_MINUTE};

/// A date on which no lunch service happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClosure {
    pub date: NaiveDate,
    pub label: String,
    /// Matches the same month/day every year (e.g. Dec 25).
    #[serde(default)]
    pub annual: bool,
}

/// The set of declared closures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCalendar {
    closures: Vec<ServiceClosure>,
}

impl ServiceCalendar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a closure. A second closure on the same exact date replaces
    /// the first (dates are unique in the source data).
    pub fn add_closure(&mut self, closure: ServiceClosure) {
        self.closures.retain(|c| c.date != closure.date);
        self.closures.push(closure);
        self.closures.sort_by_key(|c| c.date);
    }

    pub fn remove_closure(&mut self, date: NaiveDate) {
        self.closures.retain(|c| c.date != date);
    }

    /// Whether `date` has no service: an exact-date match, or an annual
    /// closure sharing the month and day.
    #[must_use]
    pub fn is_closed(&self, date: NaiveDate) -> bool {
        self.closures.iter().any(|c| {
            c.date == date || (c.annual && c.date.month() == date.month() && c.date.day() == date.day())
        })
    }

    #[must_use]
    pub fn closures(&self) -> &[ServiceClosure] {
        &self.closures
    }
}

/// Default cutoff when no setting is stored.
#[must_use]
pub fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(DEFAULT_CUTOFF_HOUR, DEFAULT_CUTOFF_MINUTE, 0)
        .unwrap_or(NaiveTime::MIN)
}

/// TTL-cached read of the stored cutoff time.
///
/// The stored value lives in persisted state; this cache sits in front of
/// it so a hot checkout path does not re-read the setting on every call.
/// The write path must call [`CutoffCache::invalidate`].
#[derive(Debug, Clone)]
pub struct CutoffCache {
    ttl_secs: i64,
    cached: Option<(NaiveTime, NaiveDateTime)>,
}

impl Default for CutoffCache {
    fn default() -> Self {
        Self::new(CUTOFF_CACHE_TTL_SECS)
    }
}

impl CutoffCache {
    #[must_use]
    pub const fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            cached: None,
        }
    }

    /// Resolve the effective cutoff, consulting `stored` only when the
    /// cached value is missing or older than the TTL.
    pub fn get(&mut self, stored: Option<NaiveTime>, fallback: NaiveTime, now: NaiveDateTime) -> NaiveTime {
        if let Some((value, read_at)) = self.cached {
            let age = now.signed_duration_since(read_at).num_seconds();
            if (0..self.ttl_secs).contains(&age) {
                return value;
            }
        }
        let value = stored.unwrap_or(fallback);
        log::debug!("cutoff cache refresh: {value}");
        self.cached = Some((value, now));
        value
    }

    /// Drop the cached value. Called whenever the stored setting changes.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn closure(y: i32, m: u32, d: u32, annual: bool) -> ServiceClosure {
        ServiceClosure {
            date: date(y, m, d),
            label: "feriado".to_string(),
            annual,
        }
    }

    #[test]
    fn exact_closure_matches_only_its_date() {
        let mut cal = ServiceCalendar::new();
        cal.add_closure(closure(2026, 8, 7, false));
        assert!(cal.is_closed(date(2026, 8, 7)));
        assert!(!cal.is_closed(date(2027, 8, 7)));
    }

    #[test]
    fn annual_closure_matches_every_year() {
        let mut cal = ServiceCalendar::new();
        cal.add_closure(closure(2020, 12, 25, true));
        assert!(cal.is_closed(date(2026, 12, 25)));
        assert!(cal.is_closed(date(2031, 12, 25)));
        assert!(!cal.is_closed(date(2026, 12, 24)));
    }

    #[test]
    fn same_date_closure_replaces() {
        let mut cal = ServiceCalendar::new();
        cal.add_closure(closure(2026, 8, 7, false));
        cal.add_closure(closure(2026, 8, 7, true));
        assert_eq!(cal.closures().len(), 1);
        assert!(cal.closures()[0].annual);
    }

    #[test]
    fn cutoff_cache_honors_ttl_and_invalidation() {
        let mut cache = CutoffCache::new(300);
        let t0 = date(2026, 8, 4).and_hms_opt(10, 0, 0).unwrap();
        let stored = NaiveTime::from_hms_opt(14, 30, 0);

        assert_eq!(cache.get(stored, default_cutoff(), t0), stored.unwrap());

        // Within the TTL the stale stored value is not consulted.
        let changed = NaiveTime::from_hms_opt(9, 0, 0);
        assert_eq!(
            cache.get(changed, default_cutoff(), t0 + Duration::seconds(299)),
            stored.unwrap()
        );

        // Past the TTL the new value is picked up.
        assert_eq!(
            cache.get(changed, default_cutoff(), t0 + Duration::seconds(301)),
            changed.unwrap()
        );

        // Invalidation forces an immediate re-read.
        cache.invalidate();
        assert_eq!(
            cache.get(None, default_cutoff(), t0 + Duration::seconds(302)),
            default_cutoff()
        );
    }
}
