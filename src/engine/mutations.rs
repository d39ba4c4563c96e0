use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing;

use super::conflict::{
    check_bookable, check_capacity, check_no_conflict, validate_cancel_reason, validate_request,
    validate_room,
};
use super::lifecycle::{authorize, check_transition, is_room_manager, transition_event, Transition};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Register a room. Hosts may only register rooms they own.
    pub async fn create_room(&self, actor: &Actor, room: Room) -> Result<(), EngineError> {
        let permitted = actor.is_admin() || (actor.role == Role::Host && actor.id == room.owner_id);
        if !permitted {
            return Err(EngineError::Unauthorized {
                actor: actor.id,
                action: "create room",
            });
        }
        validate_room(&room)?;
        let _gate = self.compaction_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }

        let id = room.id;
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        info!(room_id = %id, "room created");
        Ok(())
    }

    /// Change rate, capacity, beds or status. Existing reservations keep their totals.
    pub async fn update_room(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: RoomPatch,
    ) -> Result<Room, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("nothing to update".into()));
        }
        let _gate = self.compaction_gate.read().await;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !is_room_manager(actor, &guard.room) {
            return Err(EngineError::Unauthorized {
                actor: actor.id,
                action: "update room",
            });
        }

        let mut room = guard.room.clone();
        if let Some(rate) = patch.base_rate {
            room.base_rate = rate;
        }
        if let Some(capacity) = patch.capacity {
            room.capacity = capacity;
        }
        if let Some(beds) = patch.beds {
            room.beds = beds;
        }
        if let Some(status) = patch.status {
            room.status = status;
        }
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(room_id = %id, status = room.status.as_str(), "room updated");
        Ok(room)
    }

    /// Validate, price and reserve a stay, then persist it as `pendiente`.
    ///
    /// Availability check, code claim and hold insert all happen under the
    /// room's write lock, so two overlapping requests can never both succeed.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        req: BookingRequest,
    ) -> Result<Reservation, EngineError> {
        validate_request(&req)?;
        let stay = req.stay.validate()?;
        let now = self.clock.now();
        stay.ensure_not_past(now)?;

        let _gate = self.compaction_gate.read().await;
        // Claim the id up front so a concurrent request reusing it on another
        // room fails instead of overwriting the reverse index.
        match self.reservation_to_room.entry(req.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(req.id)),
            Entry::Vacant(slot) => {
                slot.insert(req.room_id);
            }
        }
        let id = req.id;
        let result = self.reserve(actor, req, stay, now).await;
        if result.is_err() {
            self.reservation_to_room.remove(&id);
        }
        result
    }

    /// The critical section of `create_booking`, run under the room's write lock
    /// once the reservation id is claimed.
    async fn reserve(
        &self,
        actor: &Actor,
        req: BookingRequest,
        stay: Stay,
        now: chrono::NaiveDateTime,
    ) -> Result<Reservation, EngineError> {
        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;
        check_bookable(&guard.room)?;
        check_capacity(&guard.room, req.guest_count)?;
        let pricing = pricing::price(guard.room.base_rate, &stay)?;
        if guard.holds.len() >= MAX_ACTIVE_HOLDS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many active reservations on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let code = self.claim_code(req.id)?;
        let reservation = Reservation {
            id: req.id,
            code: code.clone(),
            room_id: req.room_id,
            hotel_id: guard.room.hotel_id,
            guest_id: actor.id,
            guest: trimmed_guest(req.guest),
            stay,
            guest_count: req.guest_count,
            pricing,
            status: ReservationStatus::Pending,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.codes.remove(&code);
            return Err(e);
        }

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL, "mode" => stay.mode().as_str())
            .increment(1);
        info!(
            reservation_id = %reservation.id,
            room_id = %reservation.room_id,
            code = %reservation.code,
            total = %reservation.pricing.total,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Draw `RES-XXXXXXXX` codes until one is free, and claim it for `id`.
    fn claim_code(&self, id: Ulid) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = format!("RES-{:08X}", Ulid::new().random() as u32);
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(id);
                return Ok(code);
            }
        }
        Err(EngineError::LimitExceeded("could not allocate a reservation code"))
    }

    pub async fn confirm(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(actor, id, Transition::Confirm, None).await
    }

    /// Cancel before check-in; frees the stay for new bookings.
    pub async fn cancel(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_cancel_reason(reason.as_deref())?;
        let reason = reason.filter(|r| !r.trim().is_empty());
        self.transition(actor, id, Transition::Cancel, reason).await
    }

    /// Host-triggered once the guest has left; no minimum elapsed time is enforced.
    pub async fn complete(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(actor, id, Transition::Complete, None).await
    }

    /// Every transition re-reads the reservation under its room's write lock,
    /// so a second concurrent call observes the first one's result.
    async fn transition(
        &self,
        actor: &Actor,
        id: Ulid,
        transition: Transition,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let reservation = guard
            .reservations
            .get(&id)
            .ok_or(EngineError::NotFound(id))?;
        authorize(actor, &guard.room, reservation, transition)?;
        check_transition(reservation, transition)?;

        let now = self.clock.now();
        if transition == Transition::Cancel && now >= reservation.stay.check_in_instant() {
            return Err(EngineError::PastCheckin(id));
        }

        let event = transition_event(reservation, transition, now, reason);
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => transition.as_str())
            .increment(1);
        info!(
            reservation_id = %id,
            room_id = %updated.room_id,
            actor = %actor.id,
            status = updated.status.as_str(),
            "reservation {}", transition.as_str()
        );
        Ok(updated)
    }

    /// Rewrite the WAL as one snapshot event per room and reservation.
    /// Mutations wait until the compacted file has replaced the log.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let mut events = Vec::new();

        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_arcs {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            let mut reservations: Vec<&Reservation> = guard.reservations.values().collect();
            reservations.sort_by_key(|r| r.id);
            for r in reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn trimmed_guest(guest: GuestInfo) -> GuestInfo {
    GuestInfo {
        name: guest.name.trim().to_string(),
        surname: guest.surname.trim().to_string(),
        document_id: guest.document_id.trim().to_string(),
        phone: guest.phone.trim().to_string(),
    }
}
