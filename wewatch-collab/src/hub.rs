use std::{collections::HashMap, sync::Arc};

use log::{info, warn};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{rooms::RoomConnectionId, PrimaryKey};

/// A serialized event, shared between every outbox it is queued on
pub type Frame = Arc<str>;

/// The receiving end of a client's outbox. Yields `None` once the client is unregistered or evicted.
pub type Outbox = mpsc::Receiver<Frame>;

/// Frames a client may have queued before it is considered too slow and evicted
pub const OUTBOX_CAPACITY: usize = 256;

struct HubClient {
    user_id: PrimaryKey,
    username: String,
    sender: mpsc::Sender<Frame>,
}

/// A client dropped from its room for falling behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedClient {
    pub connection_id: RoomConnectionId,
    pub user_id: PrimaryKey,
    pub username: String,
}

/// The outcome of a single broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Nobody has announced these departures yet
    pub evicted: Vec<EvictedClient>,
}

/// Registry of connected clients per room, fanning frames out to their outboxes.
///
/// Broadcasting never blocks: a client whose outbox is full gets evicted instead.
#[derive(Default)]
pub struct Hub {
    rooms: RwLock<HashMap<PrimaryKey, HashMap<RoomConnectionId, HubClient>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client in a room and returns its outbox.
    /// Registering the same connection again replaces its previous outbox.
    pub fn register(
        &self,
        room_id: PrimaryKey,
        connection_id: RoomConnectionId,
        user_id: PrimaryKey,
        username: &str,
    ) -> Outbox {
        let (sender, receiver) = mpsc::channel(OUTBOX_CAPACITY);

        let client = HubClient {
            user_id,
            username: username.to_string(),
            sender,
        };

        self.rooms
            .write()
            .entry(room_id)
            .or_default()
            .insert(connection_id, client);

        receiver
    }

    /// Removes a client, returning whether it was still registered
    pub fn unregister(&self, room_id: PrimaryKey, connection_id: RoomConnectionId) -> bool {
        let mut rooms = self.rooms.write();

        let Some(clients) = rooms.get_mut(&room_id) else {
            return false;
        };

        let removed = clients.remove(&connection_id).is_some();

        if clients.is_empty() {
            rooms.remove(&room_id);
        }

        removed
    }

    /// Queues a frame on every client in the room except `exclude`
    pub fn broadcast(
        &self,
        room_id: PrimaryKey,
        frame: Frame,
        exclude: Option<RoomConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut saturated = vec![];

        {
            let rooms = self.rooms.read();

            let Some(clients) = rooms.get(&room_id) else {
                return report;
            };

            for (id, client) in clients {
                if Some(*id) == exclude {
                    continue;
                }

                match client.sender.try_send(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => saturated.push((*id, "outbox is full")),
                    Err(TrySendError::Closed(_)) => saturated.push((*id, "outbox was dropped")),
                }
            }
        }

        if saturated.is_empty() {
            return report;
        }

        let mut rooms = self.rooms.write();

        if let Some(clients) = rooms.get_mut(&room_id) {
            for (id, reason) in saturated {
                // Dropping the sender closes the outbox, so the writer drains and exits
                if let Some(client) = clients.remove(&id) {
                    warn!(
                        "Evicted connection {} of {} from room {}: {}",
                        id, client.username, room_id, reason
                    );

                    report.evicted.push(EvictedClient {
                        connection_id: id,
                        user_id: client.user_id,
                        username: client.username,
                    });
                }
            }

            if clients.is_empty() {
                rooms.remove(&room_id);
            }
        }

        report
    }

    /// Drops every client of a room, returning how many there were
    pub fn close_room(&self, room_id: PrimaryKey) -> usize {
        let removed = self
            .rooms
            .write()
            .remove(&room_id)
            .map(|clients| clients.len())
            .unwrap_or_default();

        if removed > 0 {
            info!("Closed {} connection(s) in room {}", removed, room_id);
        }

        removed
    }

    pub fn connection_count(&self, room_id: PrimaryKey) -> usize {
        self.rooms
            .read()
            .get(&room_id)
            .map(|clients| clients.len())
            .unwrap_or_default()
    }

    /// Distinct users connected to a room, in ascending id order
    pub fn connected_users(&self, room_id: PrimaryKey) -> Vec<PrimaryKey> {
        let mut users: Vec<_> = self
            .rooms
            .read()
            .get(&room_id)
            .map(|clients| clients.values().map(|c| c.user_id).collect())
            .unwrap_or_default();

        users.sort_unstable();
        users.dedup();
        users
    }

    pub fn is_registered(&self, room_id: PrimaryKey, connection_id: RoomConnectionId) -> bool {
        self.rooms
            .read()
            .get(&room_id)
            .map_or(false, |clients| clients.contains_key(&connection_id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(i: usize) -> Frame {
        Arc::from(format!("{{\"n\":{i}}}"))
    }

    #[test]
    fn register_and_unregister() {
        let hub = Hub::new();
        let a = RoomConnectionId::new();
        let b = RoomConnectionId::new();

        let _outbox_a = hub.register(1, a, 10, "ten");
        let _outbox_b = hub.register(1, b, 10, "ten");

        assert_eq!(hub.connection_count(1), 2);
        assert_eq!(hub.connected_users(1), vec![10]);

        assert!(hub.unregister(1, a));
        assert!(!hub.unregister(1, a), "unregistering twice is a no-op");
        assert!(hub.unregister(1, b));
        assert_eq!(hub.connection_count(1), 0);
    }

    #[test]
    fn broadcast_is_fifo_per_client_and_respects_exclude() {
        let hub = Hub::new();
        let sender = RoomConnectionId::new();
        let receiver = RoomConnectionId::new();

        let mut sender_outbox = hub.register(1, sender, 1, "one");
        let mut receiver_outbox = hub.register(1, receiver, 2, "two");
        let mut other_room = hub.register(2, RoomConnectionId::new(), 3, "three");

        for i in 0..10 {
            hub.broadcast(1, frame(i), Some(sender));
        }

        for i in 0..10 {
            assert_eq!(receiver_outbox.try_recv().unwrap(), frame(i), "frames arrive in order");
        }

        assert!(sender_outbox.try_recv().is_err(), "excluded client gets nothing");
        assert!(other_room.try_recv().is_err(), "other rooms get nothing");
    }

    #[test]
    fn saturated_client_is_evicted() {
        let hub = Hub::new();
        let slow = RoomConnectionId::new();
        let fast = RoomConnectionId::new();

        let mut slow_outbox = hub.register(1, slow, 1, "slow");
        let mut fast_outbox = hub.register(1, fast, 2, "fast");

        let mut evicted_at = None;
        let mut evicted = vec![];
        let mut fast_received = vec![];

        for i in 0..300 {
            let report = hub.broadcast(1, frame(i), None);

            if !report.evicted.is_empty() {
                evicted_at.get_or_insert(i);
                evicted.extend(report.evicted);
            }

            while let Ok(frame) = fast_outbox.try_recv() {
                fast_received.push(frame);
            }
        }

        assert_eq!(evicted_at, Some(OUTBOX_CAPACITY), "evicted on the 257th broadcast");
        assert_eq!(
            evicted,
            vec![EvictedClient {
                connection_id: slow,
                user_id: 1,
                username: "slow".to_string(),
            }],
            "the slow client is reported once"
        );
        assert!(!hub.is_registered(1, slow));
        assert!(hub.is_registered(1, fast));

        let expected: Vec<_> = (0..300).map(frame).collect();
        assert_eq!(fast_received, expected, "the fast client got everything in order");

        let mut drained = 0;
        while let Ok(_) = slow_outbox.try_recv() {
            drained += 1;
        }

        assert_eq!(drained, OUTBOX_CAPACITY, "queued frames are still drained");
        assert!(
            matches!(
                slow_outbox.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            ),
            "the outbox is closed after eviction"
        );
    }

    #[test]
    fn close_room_drops_everyone() {
        let hub = Hub::new();
        let mut outbox = hub.register(5, RoomConnectionId::new(), 1, "one");

        assert_eq!(hub.close_room(5), 1);
        assert!(matches!(
            outbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(hub.broadcast(5, frame(0), None), BroadcastReport::default());
    }
}
