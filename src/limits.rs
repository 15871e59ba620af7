//! Hard caps and policy constants. Everything tunable lives here.

use crate::model::{Cents, Ms};

/// Earliest accepted timestamp (unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted timestamp (2100-01-01).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single booking: 30 days.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// Widest open-intervals query window: 366 days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

pub const MAX_SPACES: usize = 65_536;
pub const MAX_BOOKINGS_PER_SPACE: usize = 50_000;
pub const MAX_RULES_PER_SPACE: usize = 64;
pub const MAX_EXCEPTIONS_PER_SPACE: usize = 1_024;
pub const MAX_RANGES_PER_DAY: usize = 8;
pub const MAX_NAME_LEN: usize = 256;

/// Highest accepted base price: 10_000.00 in minor units.
pub const MAX_BASE_PRICE: Cents = 1_000_000;

/// A booking may be canceled until this long before its start.
pub const CANCELLATION_WINDOW_MS: Ms = 2 * 3_600_000;

/// A pending booking the owner never answered is swept to rejected
/// after this long.
pub const CONFIRMATION_DEADLINE_MS: Ms = 24 * 3_600_000;

/// Per-attempt bound on acquiring a space's write lock.
pub const LOCK_TIMEOUT_MS: u64 = 2_000;

/// Exclusivity acquisition is retried this many times before
/// surfacing `ConcurrencyTimeout`.
pub const LOCK_ACQUIRE_RETRIES: u32 = 3;

/// Access codes are 6 decimal digits.
pub const ACCESS_CODE_MIN: u32 = 100_000;
pub const ACCESS_CODE_MAX: u32 = 999_999;
