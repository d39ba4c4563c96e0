use ulid::Ulid;

use crate::model::{ReservationStatus, RoomStatus};

use super::lifecycle::Transition;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed stay, guest data or room fields.
    Validation(String),
    InvalidDuration(String),
    CapacityExceeded {
        requested: u32,
        capacity: u32,
    },
    /// Lost the race for a stay; carries the reservation already holding it.
    RoomUnavailable {
        room_id: Ulid,
        conflicting: Ulid,
    },
    RoomOutOfService {
        room_id: Ulid,
        status: RoomStatus,
    },
    InvalidStateTransition {
        id: Ulid,
        from: ReservationStatus,
        transition: Transition,
    },
    PastCheckin(Ulid),
    NotFound(Ulid),
    CodeNotFound(String),
    Unauthorized {
        actor: Ulid,
        action: &'static str,
    },
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::InvalidDuration(msg) => write!(f, "invalid duration: {msg}"),
            EngineError::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "{requested} guests exceed room capacity of {capacity}"
            ),
            EngineError::RoomUnavailable {
                room_id,
                conflicting,
            } => write!(
                f,
                "room {room_id} is not available for the requested stay (held by {conflicting})"
            ),
            EngineError::RoomOutOfService { room_id, status } => {
                write!(f, "room {room_id} is not bookable while {}", status.as_str())
            }
            EngineError::InvalidStateTransition {
                id,
                from,
                transition,
            } => write!(
                f,
                "cannot {} reservation {id} in status {from}",
                transition.as_str()
            ),
            EngineError::PastCheckin(id) => {
                write!(f, "reservation {id} cannot be cancelled after check-in")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::CodeNotFound(code) => write!(f, "no reservation with code {code}"),
            EngineError::Unauthorized { actor, action } => {
                write!(f, "actor {actor} is not allowed to {action}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
