mod availability;
mod clock;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{blocked_nights, free_nights, merge_overlapping, subtract_intervals};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use lifecycle::{next_status, Transition};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so a partial batch never leaks into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One tenant's reservation engine.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → room id
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Reservation code → reservation id; also the code reservation table.
    pub(super) codes: DashMap<String, Ulid>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) currency: String,
    /// Shared by every mutation from before it locks a room until its event is
    /// applied; compaction takes it exclusively so its snapshot misses nothing.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to a room's state (caller holds the lock).
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    reservation_to_room: &DashMap<Ulid, Ulid>,
    codes: &DashMap<String, Ulid>,
) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::ReservationCreated { reservation } => {
            if reservation.status.holds_room() {
                rs.insert_hold(reservation.id, reservation.stay);
            }
            reservation_to_room.insert(reservation.id, reservation.room_id);
            codes.insert(reservation.code.clone(), reservation.id);
            rs.reservations.insert(reservation.id, reservation.clone());
        }
        Event::ReservationConfirmed { id, at, .. } => {
            if let Some(r) = rs.reservations.get_mut(id) {
                r.status = ReservationStatus::Confirmed;
                r.updated_at = *at;
            }
        }
        Event::ReservationCancelled { id, at, reason, .. } => {
            if let Some(r) = rs.reservations.get_mut(id) {
                r.status = ReservationStatus::Cancelled;
                r.cancel_reason = reason.clone();
                r.cancelled_at = Some(*at);
                r.updated_at = *at;
            }
            rs.release(*id);
        }
        Event::ReservationCompleted { id, at, .. } => {
            if let Some(r) = rs.reservations.get_mut(id) {
                r.status = ReservationStatus::Completed;
                r.updated_at = *at;
            }
            rs.release(*id);
        }
        // Room creation is handled at the DashMap level, not here
        Event::RoomCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        currency: impl Into<String>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_room: DashMap::new(),
            codes: DashMap::new(),
            clock,
            currency: currency.into(),
            compaction_gate: RwLock::new(()),
        };

        // We own every Arc during replay, so try_write never contends. Never use
        // blocking_write here: replay can run inside the runtime (lazy tenant creation).
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    let Some(entry) = engine.rooms.get(&other.room_id()) else {
                        continue;
                    };
                    let rs_arc = entry.clone();
                    drop(entry);
                    let mut guard = rs_arc
                        .try_write()
                        .map_err(|_| io::Error::other("replay: room state contended"))?;
                    apply_to_room(&mut guard, other, &engine.reservation_to_room, &engine.codes);
                }
            }
        }

        tracing::debug!(
            rooms = engine.rooms.len(),
            reservations = engine.reservation_to_room.len(),
            "replayed {} WAL events",
            events.len()
        );
        Ok(engine)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room, &self.codes);
        if let Some(n) = self.notification_for(event) {
            self.notify.send(rs.room.id, n);
        }
        Ok(())
    }

    fn notification_for(&self, event: &Event) -> Option<Notification> {
        match event {
            Event::ReservationCreated { reservation } => Some(Notification::ReservationCreated {
                reservation_id: reservation.id,
                room_id: reservation.room_id,
                code: reservation.code.clone(),
                total: reservation.pricing.total,
                currency: self.currency.clone(),
            }),
            Event::ReservationConfirmed { id, room_id, .. } => {
                Some(Notification::ReservationConfirmed {
                    reservation_id: *id,
                    room_id: *room_id,
                })
            }
            Event::ReservationCancelled {
                id,
                room_id,
                reason,
                ..
            } => Some(Notification::ReservationCancelled {
                reservation_id: *id,
                room_id: *room_id,
                reason: reason.clone(),
            }),
            Event::ReservationCompleted { id, room_id, .. } => {
                Some(Notification::ReservationCompleted {
                    reservation_id: *id,
                    room_id: *room_id,
                })
            }
            Event::RoomCreated { .. } | Event::RoomUpdated { .. } => None,
        }
    }

    /// Lookup reservation → room, get room, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .room_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.write_owned().await)
    }
}
