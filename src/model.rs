use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Position on the minute line: days since CE * 1440 + minute of day.
pub type Minute = i64;

/// Half-open interval `[start, end)` on an integer line (minutes or day numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

impl Span {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_point(&self, t: i64) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
    Inactive,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Some(RoomStatus::Available),
            "occupied" => Some(RoomStatus::Occupied),
            "maintenance" => Some(RoomStatus::Maintenance),
            "inactive" => Some(RoomStatus::Inactive),
            _ => None,
        }
    }

    /// `occupied` only describes who is in the room right now; future stays are still sold.
    pub fn accepts_bookings(self) -> bool {
        matches!(self, RoomStatus::Available | RoomStatus::Occupied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub hotel_id: Ulid,
    /// The host that owns the hotel; allowed to confirm/complete/cancel.
    pub owner_id: Ulid,
    /// Nightly base rate, currency-agnostic.
    pub base_rate: Decimal,
    pub capacity: u32,
    pub beds: u32,
    pub status: RoomStatus,
}

/// Partial update of a room. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub base_rate: Option<Decimal>,
    pub capacity: Option<u32>,
    pub beds: Option<u32>,
    pub status: Option<RoomStatus>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.base_rate.is_none()
            && self.capacity.is_none()
            && self.beds.is_none()
            && self.status.is_none()
    }
}

// ── Stays ────────────────────────────────────────────────────────

/// A reservable interval. The variant is the booking mode, so a nightly stay
/// cannot carry hours and a day-use stay cannot span dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stay {
    /// Whole nights `[check_in, check_out)`; the checkout day is not a night.
    Nightly {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    /// Same-day use `[from, to)` on `date`.
    Hourly {
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingMode {
    Nightly,
    Hourly,
}

impl BookingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingMode::Nightly => "nightly",
            BookingMode::Hourly => "hourly",
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub name: String,
    pub surname: String,
    pub document_id: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
        ReservationStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pendiente",
            ReservationStatus::Confirmed => "confirmada",
            ReservationStatus::Cancelled => "cancelada",
            ReservationStatus::Completed => "completada",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pendiente" => Some(ReservationStatus::Pending),
            "confirmada" => Some(ReservationStatus::Confirmed),
            "cancelada" => Some(ReservationStatus::Cancelled),
            "completada" => Some(ReservationStatus::Completed),
            _ => None,
        }
    }

    /// Pending or confirmed; the only states that can still be cancelled.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Completed)
    }

    /// Whether a reservation in this status keeps its stay in the room's
    /// availability index. Both terminal states free it.
    pub fn holds_room(self) -> bool {
        self.is_active()
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    /// Nights (nightly) or hours rounded to one decimal (hourly).
    pub units: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub code: String,
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    /// Account that placed the booking.
    pub guest_id: Ulid,
    pub guest: GuestInfo,
    pub stay: Stay,
    pub guest_count: u32,
    pub pricing: PricingBreakdown,
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn mode(&self) -> BookingMode {
        self.stay.mode()
    }
}

/// Incoming booking, already typed; validation happens in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub stay: Stay,
    pub guest: GuestInfo,
    pub guest_count: u32,
    pub notes: Option<String>,
}

// ── Per-room state ───────────────────────────────────────────────

/// A stay claimed on a room by a pending or confirmed reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub reservation_id: Ulid,
    pub stay: Stay,
    pub footprint: Span,
}

/// Everything the engine keeps for one room. Guarded by a single lock, so the
/// availability check and the insert of a new hold form one critical section.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: HashMap<Ulid, Reservation>,
    /// Sorted by `footprint.start`.
    pub holds: Vec<Hold>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: HashMap::new(),
            holds: Vec::new(),
        }
    }

    /// Insert hold maintaining sort order by footprint start.
    pub fn insert_hold(&mut self, reservation_id: Ulid, stay: Stay) {
        let footprint = stay.footprint();
        let pos = self
            .holds
            .partition_point(|h| h.footprint.start <= footprint.start);
        self.holds.insert(
            pos,
            Hold {
                reservation_id,
                stay,
                footprint,
            },
        );
    }

    /// Drop the hold of a reservation. Returns `false` when there was none,
    /// so releasing twice is the same as releasing once.
    pub fn release(&mut self, reservation_id: Ulid) -> bool {
        match self
            .holds
            .iter()
            .position(|h| h.reservation_id == reservation_id)
        {
            Some(pos) => {
                self.holds.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Holds whose footprint overlaps the query window.
    /// Binary search skips holds starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Hold> {
        let right_bound = self.holds.partition_point(|h| h.footprint.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.footprint.end > query.start)
    }

    /// First reservation whose stay excludes `stay`, if any.
    pub fn conflicting(&self, stay: &Stay) -> Option<Ulid> {
        self.overlapping(&stay.footprint())
            .find(|h| h.stay.overlaps(stay))
            .map(|h| h.reservation_id)
    }

    pub fn is_available(&self, stay: &Stay) -> bool {
        self.conflicting(stay).is_none()
    }

    /// The hold list is exactly the set of pending and confirmed reservations.
    pub fn holds_match_active(&self) -> bool {
        let holding = self
            .reservations
            .values()
            .filter(|r| r.status.holds_room())
            .count();
        holding == self.holds.len()
            && self.holds.iter().all(|h| {
                self.reservations
                    .get(&h.reservation_id)
                    .is_some_and(|r| r.status.holds_room() && r.stay == h.stay)
            })
            && self
                .holds
                .windows(2)
                .all(|w| w[0].footprint.start <= w[1].footprint.start)
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Guest,
    Host,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Host => "host",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "guest" => Some(Role::Guest),
            "host" => Some(Role::Host),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Caller identity as supplied by the upstream identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    /// Identity used by background tasks.
    pub const SYSTEM: Actor = Actor {
        id: Ulid(0),
        role: Role::Admin,
    };

    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types: flat, no nesting beyond the snapshots they carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    /// Also used by compaction to restore a reservation in any status.
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationConfirmed {
        id: Ulid,
        room_id: Ulid,
        at: NaiveDateTime,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
        at: NaiveDateTime,
        reason: Option<String>,
    },
    ReservationCompleted {
        id: Ulid,
        room_id: Ulid,
        at: NaiveDateTime,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => room.id,
            Event::ReservationCreated { reservation } => reservation.room_id,
            Event::ReservationConfirmed { room_id, .. }
            | Event::ReservationCancelled { room_id, .. }
            | Event::ReservationCompleted { room_id, .. } => *room_id,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    Room(Ulid),
    Guest(Ulid),
    Hotel(Ulid),
    Status(ReservationStatus),
}

/// Inclusive-exclusive date range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationStats {
    pub pending: u64,
    pub confirmed: u64,
    pub cancelled: u64,
    pub completed: u64,
    /// Sum of totals over confirmed and completed reservations.
    pub revenue: Decimal,
}

impl ReservationStats {
    pub fn total(&self) -> u64 {
        self.pending + self.confirmed + self.cancelled + self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.len(), 100);
        assert!(s.contains_point(100));
        assert!(s.contains_point(199));
        assert!(!s.contains_point(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn status_strings_round_trip() {
        for status in ReservationStatus::ALL {
            assert_eq!(ReservationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReservationStatus::parse("CONFIRMADA"), Some(ReservationStatus::Confirmed));
        assert_eq!(ReservationStatus::parse("no_show"), None);
    }

    #[test]
    fn only_pending_and_confirmed_are_active() {
        assert!(ReservationStatus::Pending.is_active());
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(!ReservationStatus::Cancelled.is_active());
        assert!(!ReservationStatus::Completed.is_active());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Completed.is_terminal());
    }

    #[test]
    fn room_status_booking_policy() {
        assert!(RoomStatus::Available.accepts_bookings());
        assert!(RoomStatus::Occupied.accepts_bookings());
        assert!(!RoomStatus::Maintenance.accepts_bookings());
        assert!(!RoomStatus::Inactive.accepts_bookings());
        assert_eq!(RoomStatus::parse("Maintenance"), Some(RoomStatus::Maintenance));
    }

    #[test]
    fn role_parsing() {
        assert_eq!(Role::parse("HOST"), Some(Role::Host));
        assert_eq!(Role::parse("owner"), None);
        assert!(Actor::SYSTEM.is_admin());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            room: Room {
                id: Ulid::new(),
                hotel_id: Ulid::new(),
                owner_id: Ulid::new(),
                base_rate: Decimal::new(12550, 2),
                capacity: 2,
                beds: 1,
                status: RoomStatus::Available,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
