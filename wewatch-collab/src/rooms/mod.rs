mod chat;
mod connection;
mod invites;
mod messages;
mod tv;

use log::info;
use thiserror::Error;

pub use chat::*;
pub use connection::*;
pub use invites::*;
pub use messages::*;
pub use tv::*;

use crate::{
    CollabContext, CollabEvent, Database, DatabaseError, LoopMode, LoopModePayload,
    MemberPayload, NewRoom, NewRoomMember, MemberRole, PresencePayload, PrimaryKey,
    RoomData, RoomMemberData, RoomRefPayload, RoomStatusPayload, UpdatedRoomStatus, UserData,
};

/// How many rooms the room listing returns
pub const LATEST_ROOMS_LIMIT: i64 = 10;

pub struct RoomManager {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Only the host can do this")]
    NotHost,
    #[error("User is not a member of this room")]
    NotMember,
    #[error("Room is private")]
    PrivateRoom,
    #[error("User is already a member of this room")]
    AlreadyMember,
    #[error("Invite is no longer valid")]
    InvalidInvite,
    #[error("This invite was issued to someone else")]
    NotInvitee,
    #[error("Only the author can do this")]
    NotAuthor,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Fails unless `user_id` hosts the room
pub fn require_host(room: &RoomData, user_id: PrimaryKey) -> Result<(), RoomError> {
    if room.host_id == user_id {
        Ok(())
    } else {
        Err(RoomError::NotHost)
    }
}

/// Returns the membership of `user_id`, or fails if there is none
pub async fn require_member(
    database: &dyn Database,
    room_id: PrimaryKey,
    user_id: PrimaryKey,
) -> Result<RoomMemberData, RoomError> {
    database
        .room_member(room_id, user_id)
        .await
        .map_err(|e| match e {
            DatabaseError::NotFound { .. } => RoomError::NotMember,
            e => RoomError::Db(e),
        })
}

impl RoomManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a new room hosted by `host`
    pub async fn create_room(
        &self,
        host: &UserData,
        name: String,
        description: String,
        is_public: bool,
    ) -> Result<RoomData, RoomError> {
        let room = self
            .context
            .database
            .create_room(NewRoom {
                name,
                description,
                host_id: host.id,
                is_public,
                is_temporary: false,
                created_at: self.context.clock.now(),
            })
            .await?;

        info!("{} created room {} ({})", host.username, room.name, room.id);

        Ok(room)
    }

    /// The most recently created rooms
    pub async fn latest(&self) -> Result<Vec<RoomData>, RoomError> {
        Ok(self.context.database.list_rooms(LATEST_ROOMS_LIMIT).await?)
    }

    pub async fn room(&self, room_id: PrimaryKey) -> Result<RoomData, RoomError> {
        Ok(self.context.database.room_by_id(room_id).await?)
    }

    /// Makes `user` a member of a public room
    pub async fn join(&self, room_id: PrimaryKey, user: &UserData) -> Result<RoomMemberData, RoomError> {
        let room = self.room(room_id).await?;

        if !room.is_public {
            return Err(RoomError::PrivateRoom);
        }

        let member = self
            .context
            .database
            .create_room_member(NewRoomMember {
                user_id: user.id,
                room_id,
                role: MemberRole::Member,
                joined_at: self.context.clock.now(),
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict { .. } => RoomError::AlreadyMember,
                e => RoomError::Db(e),
            })?;

        self.context.emit(CollabEvent::MemberJoined {
            room_id,
            data: MemberPayload::from(&member),
        });

        Ok(member)
    }

    /// Members of a room. Private rooms only list them to members.
    pub async fn members(&self, room_id: PrimaryKey, user: &UserData) -> Result<Vec<RoomMemberData>, RoomError> {
        let room = self.room(room_id).await?;

        if !room.is_public {
            require_member(self.context.database.as_ref(), room_id, user.id).await?;
        }

        Ok(self.context.database.room_members(room_id).await?)
    }

    /// Updates the cinema overlay of a room
    pub async fn update_status(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        mut update: UpdatedRoomStatus,
    ) -> Result<RoomData, RoomError> {
        let room = self.room(room_id).await?;
        require_host(&room, user.id)?;

        update.id = room_id;
        let room = self.context.database.update_room_status(update).await?;

        self.context.emit(CollabEvent::RoomStatusUpdated {
            room_id,
            data: RoomStatusPayload::from(&room),
        });

        Ok(room)
    }

    pub async fn update_loop_mode(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        loop_mode: LoopMode,
    ) -> Result<RoomData, RoomError> {
        let room = self.room(room_id).await?;
        require_host(&room, user.id)?;

        let room = self
            .context
            .database
            .update_loop_mode(room_id, loop_mode)
            .await?;

        self.context.emit(CollabEvent::LoopModeUpdated {
            room_id,
            data: LoopModePayload {
                room_id,
                loop_mode: room.loop_mode.as_str(),
            },
        });

        Ok(room)
    }

    /// Deletes a room with everything it owns and disconnects its clients
    pub async fn delete_room(&self, room_id: PrimaryKey, user: &UserData) -> Result<(), RoomError> {
        let database = &self.context.database;

        let room = self.room(room_id).await?;
        require_host(&room, user.id)?;

        let mut paths: Vec<String> = database
            .media_items_for_room(room_id)
            .await?
            .into_iter()
            .map(|m| m.file_path)
            .collect();

        if let Some(session) = database.active_watch_session(room_id).await? {
            let temporary = database.temporary_media_for_session(session.session_id).await?;
            paths.extend(temporary.into_iter().map(|m| m.file_path));
        }

        database.delete_room(room_id).await?;

        self.context.emit(CollabEvent::RoomDeleted {
            room_id,
            data: RoomRefPayload { room_id },
        });
        self.context.hub.close_room(room_id);

        for path in paths {
            self.context.remove_file(&path).await;
        }

        info!("{} deleted room {} ({})", user.username, room.name, room.id);

        Ok(())
    }

    /// Registers a live connection to a room. Private rooms require membership.
    pub async fn connect(&self, room_id: PrimaryKey, user: &UserData) -> Result<RoomConnectionHandle, RoomError> {
        let room = self.room(room_id).await?;

        if !room.is_public {
            require_member(self.context.database.as_ref(), room_id, user.id).await?;
        }

        let connection = RoomConnection::new(room_id, user, room.host_id == user.id);
        let outbox = self
            .context
            .hub
            .register(room_id, connection.id, user.id, &user.username);

        info!(
            "{} connected to room {} as connection {}",
            user.username, room_id, connection.id
        );

        self.context.emit_except(
            CollabEvent::UserConnected {
                room_id,
                data: PresencePayload {
                    user_id: user.id,
                    username: user.username.clone(),
                    connections: self.context.hub.connection_count(room_id),
                },
            },
            Some(connection.id),
        );

        Ok(RoomConnectionHandle::new(&self.context, connection, outbox))
    }
}

#[cfg(test)]
mod test {
    use serde_json::Value;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{test_support::TestCollab, OUTBOX_CAPACITY};

    #[tokio::test]
    async fn host_only_room_updates() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let denied = test
            .collab
            .rooms
            .update_loop_mode(room.id, &guest, LoopMode::PlaylistOnce)
            .await;
        assert!(matches!(denied, Err(RoomError::NotHost)));

        let updated = test
            .collab
            .rooms
            .update_status(
                room.id,
                &host,
                UpdatedRoomStatus {
                    currently_playing: Some("Metropolis".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.currently_playing.as_deref(), Some("Metropolis"));
        assert_eq!(updated.coming_next, None);
    }

    #[tokio::test]
    async fn joining_public_rooms() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        test.collab.rooms.join(room.id, &guest).await.unwrap();

        let again = test.collab.rooms.join(room.id, &guest).await;
        assert!(matches!(again, Err(RoomError::AlreadyMember)));

        let private = test
            .collab
            .rooms
            .create_room(&host, "Private".to_string(), String::new(), false)
            .await
            .unwrap();
        let denied = test.collab.rooms.join(private.id, &guest).await;
        assert!(matches!(denied, Err(RoomError::PrivateRoom)));
    }

    #[tokio::test]
    async fn connections_announce_presence() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let mut host_handle = test.collab.rooms.connect(room.id, &host).await.unwrap();
        let mut host_outbox = host_handle.take_outbox().unwrap();

        let guest_handle = test.collab.rooms.connect(room.id, &guest).await.unwrap();
        assert!(!guest_handle.connection().is_host);
        assert!(host_handle.connection().is_host);

        let joined = host_outbox.try_recv().unwrap();
        assert!(joined.contains("\"user_connected\""));

        drop(guest_handle);

        let left = host_outbox.try_recv().unwrap();
        assert!(left.contains("\"user_disconnected\""));
        assert_eq!(test.collab.hub().connection_count(room.id), 1);
    }

    #[tokio::test]
    async fn overrun_clients_are_announced_as_gone() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let guest = test.user("guest").await;
        let room = test.room(&host).await;

        let mut host_handle = test.collab.rooms.connect(room.id, &host).await.unwrap();
        let mut host_outbox = host_handle.take_outbox().unwrap();

        // The guest never reads its outbox
        let mut guest_handle = test.collab.rooms.connect(room.id, &guest).await.unwrap();
        let _guest_outbox = guest_handle.take_outbox().unwrap();

        let mut received: Vec<Value> = vec![];

        for i in 0..=OUTBOX_CAPACITY {
            test.collab
                .chat
                .post_room_message(room.id, &host, &format!("message {i}"))
                .await
                .unwrap();

            while let Ok(frame) = host_outbox.try_recv() {
                received.push(serde_json::from_str(&frame).unwrap());
            }
        }

        let disconnects: Vec<_> = received
            .iter()
            .filter(|v| v["type"] == "user_disconnected")
            .collect();

        assert_eq!(disconnects.len(), 1);
        assert_eq!(disconnects[0]["data"]["username"], "guest");
        assert_eq!(disconnects[0]["data"]["connections"], 1);
        assert_eq!(received.last(), Some(disconnects[0]), "announced right after the overflow");
        assert_eq!(test.collab.hub().connection_count(room.id), 1);

        drop(guest_handle);
        assert!(host_outbox.try_recv().is_err(), "the departure is not announced twice");
    }

    #[tokio::test]
    async fn deleting_a_room_closes_connections() {
        let test = TestCollab::new();
        let host = test.user("host").await;
        let room = test.room(&host).await;

        let mut handle = test.collab.rooms.connect(room.id, &host).await.unwrap();
        let mut outbox = handle.take_outbox().unwrap();

        test.collab.rooms.delete_room(room.id, &host).await.unwrap();

        let deleted = outbox.try_recv().unwrap();
        assert!(deleted.contains("\"room_deleted\""));
        assert!(matches!(outbox.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(test.collab.rooms.room(room.id).await.is_err());
    }
}
