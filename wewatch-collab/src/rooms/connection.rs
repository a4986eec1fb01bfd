use log::info;

use crate::{CollabContext, CollabEvent, Id, Outbox, PresencePayload, PrimaryKey, UserData};

use super::{ClientMessage, MessageError};

pub type RoomConnectionId = Id<RoomConnection>;

/// Represents a user's live presence in a room
#[derive(Debug, Clone)]
pub struct RoomConnection {
    pub id: RoomConnectionId,
    pub room_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub username: String,
    /// Whether the user hosted the room when connecting
    pub is_host: bool,
}

/// A handle to a registered connection, which when dropped removes it from the hub
pub struct RoomConnectionHandle {
    connection: RoomConnection,
    context: CollabContext,
    outbox: Option<Outbox>,
}

impl RoomConnection {
    pub fn new(room_id: PrimaryKey, user: &UserData, is_host: bool) -> Self {
        Self {
            id: RoomConnectionId::new(),
            room_id,
            user_id: user.id,
            username: user.username.clone(),
            is_host,
        }
    }
}

impl RoomConnectionHandle {
    pub fn new(context: &CollabContext, connection: RoomConnection, outbox: Outbox) -> Self {
        Self {
            connection,
            context: context.clone(),
            outbox: Some(outbox),
        }
    }

    pub fn connection(&self) -> &RoomConnection {
        &self.connection
    }

    /// Hands the outbox over to whoever writes to the client. Only yields it once.
    pub fn take_outbox(&mut self) -> Option<Outbox> {
        self.outbox.take()
    }

    /// Handles a text frame received from the client
    pub async fn handle_text(&self, text: &str) -> Result<(), MessageError> {
        let message = ClientMessage::parse(text)?;
        message.handle(&self.context, &self.connection).await
    }
}

impl Drop for RoomConnectionHandle {
    fn drop(&mut self) {
        let RoomConnection {
            id,
            room_id,
            user_id,
            ..
        } = self.connection;

        // Evictions are announced by whoever broadcast the overflowing frame, closed rooms have nobody left
        if !self.context.hub.unregister(room_id, id) {
            return;
        }

        info!(
            "{} disconnected from room {} (connection {})",
            self.connection.username, room_id, id
        );

        self.context.emit(CollabEvent::UserDisconnected {
            room_id,
            data: PresencePayload {
                user_id,
                username: self.connection.username.clone(),
                connections: self.context.hub.connection_count(room_id),
            },
        });
    }
}
