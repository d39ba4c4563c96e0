use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    match rs.conflicting(stay) {
        Some(conflicting) => Err(EngineError::RoomUnavailable {
            room_id: rs.room.id,
            conflicting,
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_bookable(room: &Room) -> Result<(), EngineError> {
    if room.status.accepts_bookings() {
        Ok(())
    } else {
        Err(EngineError::RoomOutOfService {
            room_id: room.id,
            status: room.status,
        })
    }
}

pub(crate) fn check_capacity(room: &Room, guest_count: u32) -> Result<(), EngineError> {
    if guest_count > room.capacity {
        return Err(EngineError::CapacityExceeded {
            requested: guest_count,
            capacity: room.capacity,
        });
    }
    Ok(())
}

fn required_field(name: &str, value: &str) -> Result<(), EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{name} is required")));
    }
    if trimmed.chars().count() > MAX_GUEST_FIELD_LEN {
        return Err(EngineError::Validation(format!(
            "{name} longer than {MAX_GUEST_FIELD_LEN} characters"
        )));
    }
    Ok(())
}

fn optional_text(name: &str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.chars().count() > max
    {
        return Err(EngineError::Validation(format!(
            "{name} longer than {max} characters"
        )));
    }
    Ok(())
}

/// Guest data and free-text checks; the stay is validated separately.
pub(crate) fn validate_request(req: &BookingRequest) -> Result<(), EngineError> {
    required_field("guest name", &req.guest.name)?;
    required_field("guest surname", &req.guest.surname)?;
    required_field("guest document", &req.guest.document_id)?;
    required_field("guest phone", &req.guest.phone)?;
    if req.guest_count == 0 {
        return Err(EngineError::Validation("at least one guest is required".into()));
    }
    optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)
}

pub(crate) fn validate_cancel_reason(reason: Option<&str>) -> Result<(), EngineError> {
    optional_text("cancel reason", reason, MAX_CANCEL_REASON_LEN)
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.base_rate <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "base rate must be positive, got {}",
            room.base_rate
        )));
    }
    if room.capacity == 0 || room.capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::Validation(format!(
            "capacity must be within [1, {MAX_ROOM_CAPACITY}], got {}",
            room.capacity
        )));
    }
    if room.beds == 0 {
        return Err(EngineError::Validation("a room needs at least one bed".into()));
    }
    Ok(())
}
