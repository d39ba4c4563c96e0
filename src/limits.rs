use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ── Pricing policy ───────────────────────────────────────────────

/// Sales tax applied on top of the subtotal (IGV).
pub const TAX_RATE: Decimal = dec!(0.18);

/// Day-use hourly rate as a fraction of the nightly base rate.
pub const HOURLY_RATE_FACTOR: Decimal = dec!(0.40);

// ── Stay policy ──────────────────────────────────────────────────

pub const MIN_NIGHTS: i64 = 1;
pub const MAX_NIGHTS: i64 = 30;

/// Day-use bounds in minutes, both inclusive (3h..=12h).
pub const MIN_DAY_USE_MINUTES: i64 = 3 * 60;
pub const MAX_DAY_USE_MINUTES: i64 = 12 * 60;
pub const MIN_DAY_USE_SECS: i64 = MIN_DAY_USE_MINUTES * 60;
pub const MAX_DAY_USE_SECS: i64 = MAX_DAY_USE_MINUTES * 60;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

// ── Input limits ─────────────────────────────────────────────────

pub const MAX_GUEST_FIELD_LEN: usize = 150;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_CANCEL_REASON_LEN: usize = 500;
pub const MAX_ROOM_CAPACITY: u32 = 64;

/// Widest window accepted by `free_nights`.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

// ── Tenant resource limits ───────────────────────────────────────

pub const MAX_ROOMS_PER_TENANT: usize = 50_000;
pub const MAX_ACTIVE_HOLDS_PER_ROOM: usize = 10_000;
pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Attempts at drawing an unused reservation code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 16;
