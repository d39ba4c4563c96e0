use chrono::{Duration, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing;

use super::availability::free_nights;
use super::{Engine, EngineError};

impl Engine {
    /// True iff no pending or confirmed reservation on the room excludes `stay`.
    pub async fn is_available(&self, room_id: Ulid, stay: &Stay) -> Result<bool, EngineError> {
        let stay = stay.validate()?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.is_available(&stay))
    }

    /// Price a stay on a room without reserving anything.
    pub async fn quote(&self, room_id: Ulid, stay: &Stay) -> Result<PricingBreakdown, EngineError> {
        let stay = stay.validate()?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        pricing::price(guard.room.base_rate, &stay)
    }

    pub async fn free_nights(
        &self,
        room_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        if range.to <= range.from {
            return Err(EngineError::Validation(format!(
                "window end {} must be after start {}",
                range.to, range.from
            )));
        }
        if (range.to - range.from).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("availability window too wide"));
        }
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_nights(&guard, range))
    }

    pub async fn get_room_info(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(room_arcs.len());
        for rs in room_arcs {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn get_reservation_by_code(&self, code: &str) -> Result<Reservation, EngineError> {
        let id = self
            .codes
            .get(code.trim())
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::CodeNotFound(code.to_string()))?;
        self.get_reservation(id).await
    }

    /// Reservations matching `filter`, newest first.
    pub async fn list_reservations(&self, filter: ReservationFilter) -> Vec<Reservation> {
        let room_arcs: Vec<_> = match filter {
            ReservationFilter::Room(room_id) => self.get_room(&room_id).into_iter().collect(),
            _ => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };

        let mut result = Vec::new();
        for rs in room_arcs {
            let guard = rs.read().await;
            if let ReservationFilter::Hotel(hotel_id) = filter
                && guard.room.hotel_id != hotel_id
            {
                continue;
            }
            result.extend(
                guard
                    .reservations
                    .values()
                    .filter(|r| matches_filter(r, filter))
                    .cloned(),
            );
        }
        sort_newest_first(&mut result);
        result
    }

    /// Pending or confirmed reservations placed by a guest.
    pub async fn active_reservations_for_guest(&self, guest_id: Ulid) -> Vec<Reservation> {
        let mut result = self.list_reservations(ReservationFilter::Guest(guest_id)).await;
        result.retain(|r| r.status.is_active());
        result
    }

    /// Counts per status and revenue over confirmed and completed reservations.
    pub async fn stats(&self, hotel_id: Option<Ulid>) -> ReservationStats {
        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut stats = ReservationStats::default();
        for rs in room_arcs {
            let guard = rs.read().await;
            if hotel_id.is_some_and(|h| h != guard.room.hotel_id) {
                continue;
            }
            for r in guard.reservations.values() {
                match r.status {
                    ReservationStatus::Pending => stats.pending += 1,
                    ReservationStatus::Confirmed => {
                        stats.confirmed += 1;
                        stats.revenue += r.pricing.total;
                    }
                    ReservationStatus::Cancelled => stats.cancelled += 1,
                    ReservationStatus::Completed => {
                        stats.completed += 1;
                        stats.revenue += r.pricing.total;
                    }
                }
            }
        }
        stats
    }

    /// Pending reservations created at or before `now - ttl`, as (id, room_id).
    pub fn collect_stale_pending(&self, now: NaiveDateTime, ttl: Duration) -> Vec<(Ulid, Ulid)> {
        let cutoff = now - ttl;
        let mut stale = Vec::new();
        for entry in self.rooms.iter() {
            let room_id = *entry.key();
            // try_read: skip rooms being written; the next sweep will see them.
            if let Ok(guard) = entry.value().try_read() {
                for r in guard.reservations.values() {
                    if r.status == ReservationStatus::Pending && r.created_at <= cutoff {
                        stale.push((r.id, room_id));
                    }
                }
            }
        }
        stale
    }
}

fn matches_filter(r: &Reservation, filter: ReservationFilter) -> bool {
    match filter {
        ReservationFilter::Room(id) => r.room_id == id,
        ReservationFilter::Guest(id) => r.guest_id == id,
        ReservationFilter::Hotel(id) => r.hotel_id == id,
        ReservationFilter::Status(status) => r.status == status,
    }
}

fn sort_newest_first(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
