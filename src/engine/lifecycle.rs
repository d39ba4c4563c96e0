use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// A state-changing call on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel,
    Complete,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
        }
    }

    /// Status reached when the transition is legal.
    pub fn target(self) -> ReservationStatus {
        match self {
            Transition::Confirm => ReservationStatus::Confirmed,
            Transition::Cancel => ReservationStatus::Cancelled,
            Transition::Complete => ReservationStatus::Completed,
        }
    }
}

/// pendiente -> confirmada -> completada; pendiente|confirmada -> cancelada.
pub fn next_status(
    from: ReservationStatus,
    transition: Transition,
) -> Option<ReservationStatus> {
    use ReservationStatus::*;
    match (from, transition) {
        (Pending, Transition::Confirm) => Some(Confirmed),
        (Pending | Confirmed, Transition::Cancel) => Some(Cancelled),
        (Confirmed, Transition::Complete) => Some(Completed),
        _ => None,
    }
}

pub(crate) fn check_transition(
    reservation: &Reservation,
    transition: Transition,
) -> Result<ReservationStatus, EngineError> {
    next_status(reservation.status, transition).ok_or(EngineError::InvalidStateTransition {
        id: reservation.id,
        from: reservation.status,
        transition,
    })
}

/// Room owner (as host) or admin.
pub(crate) fn is_room_manager(actor: &Actor, room: &Room) -> bool {
    actor.is_admin() || (actor.role == Role::Host && actor.id == room.owner_id)
}

/// Confirm and complete belong to the room's host or an admin; cancel also to
/// the guest who booked. A host of some other hotel is rejected.
pub(crate) fn authorize(
    actor: &Actor,
    room: &Room,
    reservation: &Reservation,
    transition: Transition,
) -> Result<(), EngineError> {
    let allowed = match transition {
        Transition::Confirm | Transition::Complete => is_room_manager(actor, room),
        Transition::Cancel => {
            is_room_manager(actor, room) || actor.id == reservation.guest_id
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::Unauthorized {
            actor: actor.id,
            action: transition.as_str(),
        })
    }
}

/// The event recording a legal transition at `at`.
pub(crate) fn transition_event(
    reservation: &Reservation,
    transition: Transition,
    at: chrono::NaiveDateTime,
    reason: Option<String>,
) -> Event {
    let id: Ulid = reservation.id;
    let room_id = reservation.room_id;
    match transition {
        Transition::Confirm => Event::ReservationConfirmed { id, room_id, at },
        Transition::Cancel => Event::ReservationCancelled {
            id,
            room_id,
            at,
            reason,
        },
        Transition::Complete => Event::ReservationCompleted { id, room_id, at },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    #[test]
    fn legal_transitions() {
        assert_eq!(next_status(Pending, Transition::Confirm), Some(Confirmed));
        assert_eq!(next_status(Pending, Transition::Cancel), Some(Cancelled));
        assert_eq!(next_status(Confirmed, Transition::Cancel), Some(Cancelled));
        assert_eq!(next_status(Confirmed, Transition::Complete), Some(Completed));
    }

    #[test]
    fn everything_else_is_illegal() {
        let legal = [
            (Pending, Transition::Confirm),
            (Pending, Transition::Cancel),
            (Confirmed, Transition::Cancel),
            (Confirmed, Transition::Complete),
        ];
        for from in ReservationStatus::ALL {
            for t in [Transition::Confirm, Transition::Cancel, Transition::Complete] {
                if !legal.contains(&(from, t)) {
                    assert_eq!(next_status(from, t), None, "{from} -> {}", t.as_str());
                }
            }
        }
    }

    #[test]
    fn targets_match_next_status() {
        for t in [Transition::Confirm, Transition::Cancel, Transition::Complete] {
            let from = if t == Transition::Complete { Confirmed } else { Pending };
            assert_eq!(next_status(from, t), Some(t.target()));
        }
    }
}
