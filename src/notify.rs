use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events handed to notification and payment collaborators.
/// Serialized as `{"event": "<name>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum Notification {
    /// A new `pendiente` reservation awaiting payment.
    ReservationCreated {
        reservation_id: Ulid,
        room_id: Ulid,
        code: String,
        total: Decimal,
        currency: String,
    },
    ReservationConfirmed {
        reservation_id: Ulid,
        room_id: Ulid,
    },
    ReservationCancelled {
        reservation_id: Ulid,
        room_id: Ulid,
        reason: Option<String>,
    },
    ReservationCompleted {
        reservation_id: Ulid,
        room_id: Ulid,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::ReservationCreated { .. } => "ReservationCreated",
            Notification::ReservationConfirmed { .. } => "ReservationConfirmed",
            Notification::ReservationCancelled { .. } => "ReservationCancelled",
            Notification::ReservationCompleted { .. } => "ReservationCompleted",
        }
    }

    pub fn reservation_id(&self) -> Ulid {
        match self {
            Notification::ReservationCreated { reservation_id, .. }
            | Notification::ReservationConfirmed { reservation_id, .. }
            | Notification::ReservationCancelled { reservation_id, .. }
            | Notification::ReservationCompleted { reservation_id, .. } => *reservation_id,
        }
    }
}

/// Fire-and-forget broadcast hub: one channel per room plus a firehose.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
    all: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notifications for one room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every room of the tenant.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; slow receivers lag.
    pub fn send(&self, room_id: Ulid, notification: Notification) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(notification.clone());
        }
        let _ = self.all.send(notification);
    }
}
