//! Centralized policy bounds for the Cantina engine.
//!
//! These values define the hard limits of the scheduling and token
//! machinery. Keeping them together ensures that policy can only be
//! adjusted via code changes reviewed in version control, rather than
//! through external assets.

// Scheduling ---------------------------------------------------------------

/// Upper bound on the forward scan for the next eligible service day.
/// A month of calendar covers every realistic mask/closure combination;
/// exhausting it means the configuration is degenerate.
pub const ELIGIBILITY_SCAN_DAYS: u32 = 31;

/// Base day offset before the daily cutoff (order for tomorrow).
pub const BASE_OFFSET_BEFORE_CUTOFF: i64 = 1;

/// Base day offset at or after the daily cutoff (kitchen gets a full
/// day of lead time).
pub const BASE_OFFSET_AFTER_CUTOFF: i64 = 2;

/// Fallback cutoff when no setting is stored.
pub const DEFAULT_CUTOFF_HOUR: u32 = 15;
pub const DEFAULT_CUTOFF_MINUTE: u32 = 0;

/// How long a cutoff read stays cached before the stored value is
/// consulted again.
pub const CUTOFF_CACHE_TTL_SECS: i64 = 300;

// Pickup tokens ------------------------------------------------------------

/// Total token length: 12 random digits plus the check digit.
pub const TOKEN_LEN: usize = 13;

/// Collision retries before token allocation is treated as a fatal
/// error. With a 10^12 keyspace this bound exists for correctness, not
/// because it is expected to trip.
pub const TOKEN_RETRY_LIMIT: u32 = 8;

// No-show policy -----------------------------------------------------------

/// Consecutive no-shows that trigger an automatic block.
pub const AUTO_BLOCK_THRESHOLD_DEFAULT: u32 = 3;

// Orders -------------------------------------------------------------------

/// Per-line quantity ceiling. Current policy: one unit of one item per
/// category.
pub const MAX_LINE_QTY: u32 = 1;
