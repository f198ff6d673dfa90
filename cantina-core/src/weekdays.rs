//! Weekday bitmask helpers (Mon=bit0 .. Sun=bit6).
use chrono::{Datelike, NaiveDate};

/// Bit values for Mon..Sun.
pub const WEEKDAY_BITS: [u8; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Monday through Friday.
pub const MON_FRI_MASK: u8 = 0b0001_1111;

/// Day abbreviations used by [`human_days`].
pub const WEEKDAY_LABELS: [&str; 7] = ["Seg", "Ter", "Qua", "Qui", "Sex", "Sáb", "Dom"];

/// Placeholder shown for an empty mask.
pub const NO_DAYS_PLACEHOLDER: &str = "—";

/// Bit for the weekday of `date`.
#[must_use]
pub fn bit_for(date: NaiveDate) -> u8 {
    WEEKDAY_BITS[date.weekday().num_days_from_monday() as usize]
}

/// Build a mask from seven booleans, Monday first.
#[must_use]
pub const fn mask_from_bools(days: [bool; 7]) -> u8 {
    let mut mask = 0u8;
    let mut i = 0;
    while i < 7 {
        if days[i] {
            mask |= WEEKDAY_BITS[i];
        }
        i += 1;
    }
    mask
}

/// Expand a mask into seven booleans, Monday first.
#[must_use]
pub const fn bools_from_mask(mask: u8) -> [bool; 7] {
    let mut days = [false; 7];
    let mut i = 0;
    while i < 7 {
        days[i] = mask & WEEKDAY_BITS[i] != 0;
        i += 1;
    }
    days
}

/// Comma-joined day abbreviations, e.g. `31` → `"Seg, Ter, Qua, Qui, Sex"`.
#[must_use]
pub fn human_days(mask: u8) -> String {
    if mask == 0 {
        return NO_DAYS_PLACEHOLDER.to_string();
    }
    let parts: Vec<&str> = (0..7)
        .filter(|i| mask & WEEKDAY_BITS[*i] != 0)
        .map(|i| WEEKDAY_LABELS[i])
        .collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bit_for_matches_weekday() {
        // 2026-08-03 is a Monday.
        assert_eq!(bit_for(date(2026, 8, 3)), 1);
        assert_eq!(bit_for(date(2026, 8, 7)), 16); // Friday
        assert_eq!(bit_for(date(2026, 8, 9)), 64); // Sunday
    }

    #[test]
    fn mask_roundtrips_through_bools() {
        let bools = [true, false, true, false, true, false, false];
        let mask = mask_from_bools(bools);
        assert_eq!(mask, 1 | 4 | 16);
        assert_eq!(bools_from_mask(mask), bools);
    }

    #[test]
    fn mon_fri_mask_covers_weekdays_only() {
        assert_eq!(
            bools_from_mask(MON_FRI_MASK),
            [true, true, true, true, true, false, false]
        );
    }

    #[test]
    fn human_days_formats_and_falls_back() {
        assert_eq!(human_days(MON_FRI_MASK), "Seg, Ter, Qua, Qui, Sex");
        assert_eq!(human_days(0b110_0000), "Sáb, Dom");
        assert_eq!(human_days(0), NO_DAYS_PLACEHOLDER);
    }
}
