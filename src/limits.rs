//! Hard caps that keep a single tenant from exhausting memory or disk.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ITEMS_PER_TENANT: usize = 1_000_000;
pub const MAX_REQUESTS_PER_ITEM: usize = 100_000;

/// Longest single borrow, in days (both bounds included).
pub const MAX_SPAN_DAYS: i64 = 3 * 366;

/// Dates outside this window are rejected as malformed input.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;

pub const MAX_IN_CLAUSE_IDS: usize = 1024;
