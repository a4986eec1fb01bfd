mod broadcast;
mod media;
mod theaters;

use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;
use uuid::Uuid;

pub use broadcast::*;
pub use media::*;
pub use theaters::*;

use crate::{
    rooms::{require_host, RoomError},
    CollabContext, CollabEvent, DatabaseError, EndedSessionData, FileError, MediaRemovedPayload,
    NewRoom, NewWatchSession, PrimaryKey, RoomData, RoomRefPayload, SessionPayload, UserData,
    WatchSessionData, WatchType,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Only the host can do this")]
    NotHost,
    /// The room already has an active session, which is named here
    #[error("Room already has an active watch session: {0}")]
    AlreadyActive(String),
    #[error("Watch session has ended")]
    Ended,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Starts and ends watch sessions
pub struct SessionManager {
    context: CollabContext,
}

impl SessionManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Starts a session in a room the user hosts
    pub async fn start(
        &self,
        room_id: PrimaryKey,
        user: &UserData,
        watch_type: WatchType,
    ) -> Result<WatchSessionData, SessionError> {
        let room = self.context.database.room_by_id(room_id).await?;
        require_host(&room, user.id)?;

        let session = self
            .context
            .database
            .create_watch_session(NewWatchSession {
                session_id: Uuid::new_v4(),
                room_id,
                host_id: user.id,
                watch_type,
                started_at: self.context.clock.now(),
            })
            .await
            .map_err(already_active)?;

        info!(
            "{} started {} session {} in room {}",
            user.username, watch_type, session.session_id, room_id
        );

        self.context.emit(CollabEvent::SessionStarted {
            room_id,
            data: SessionPayload::from(&session),
        });

        Ok(session)
    }

    /// Creates a temporary public room with a session already running in it
    pub async fn instant_watch(
        &self,
        user: &UserData,
        name: Option<String>,
        watch_type: WatchType,
    ) -> Result<(RoomData, WatchSessionData), SessionError> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}'s watch party", user.username));

        let now = self.context.clock.now();
        let (room, session) = self
            .context
            .database
            .create_instant_watch(
                NewRoom {
                    name,
                    description: String::new(),
                    host_id: user.id,
                    is_public: true,
                    is_temporary: true,
                    created_at: now,
                },
                NewWatchSession {
                    session_id: Uuid::new_v4(),
                    room_id: 0,
                    host_id: user.id,
                    watch_type,
                    started_at: now,
                },
            )
            .await?;

        info!(
            "{} started instant watch {} in temporary room {}",
            user.username, session.session_id, room.id
        );

        Ok((room, session))
    }

    pub async fn active(&self, room_id: PrimaryKey) -> Result<Option<WatchSessionData>, SessionError> {
        self.context.database.room_by_id(room_id).await?;

        Ok(self.context.database.active_watch_session(room_id).await?)
    }

    pub async fn session(&self, session_id: Uuid) -> Result<WatchSessionData, SessionError> {
        Ok(self.context.database.watch_session_by_uuid(session_id).await?)
    }

    /// Ends a session on behalf of its host
    pub async fn end(&self, session_id: Uuid, user: &UserData) -> Result<EndedSessionData, SessionError> {
        let session = self.session(session_id).await?;

        if session.host_id != user.id {
            return Err(SessionError::NotHost);
        }

        if !session.is_active() {
            return Err(SessionError::Ended);
        }

        let ended = finish_session(&self.context, &session, self.context.clock.now()).await?;

        info!("{} ended session {}", user.username, session_id);

        Ok(ended)
    }
}

/// Returns the session if it is still running, and its room
pub(crate) async fn active_session(
    context: &CollabContext,
    session_id: Uuid,
) -> Result<(WatchSessionData, RoomData), SessionError> {
    let session = context.database.watch_session_by_uuid(session_id).await?;

    if !session.is_active() {
        return Err(SessionError::Ended);
    }

    let room = context.database.room_by_id(session.room_id).await?;

    Ok((session, room))
}

/// Ends a session, then announces it and removes the files it left behind.
/// Does nothing visible if the session was ended by someone else in the meantime.
pub(crate) async fn finish_session(
    context: &CollabContext,
    session: &WatchSessionData,
    at: DateTime<Utc>,
) -> Result<EndedSessionData, DatabaseError> {
    let ended = context.database.end_watch_session(session.id, at).await?;

    if !ended.ended_now {
        return Ok(ended);
    }

    let room_id = session.room_id;

    for media in &ended.removed_media {
        context.emit(CollabEvent::TemporaryMediaItemDeleted {
            room_id,
            data: MediaRemovedPayload {
                id: media.id,
                session_id: media.session_id,
            },
        });
    }

    context.emit(CollabEvent::SessionEnded {
        room_id,
        data: SessionPayload::from(&ended.session),
    });

    if ended.room_deleted {
        context.emit(CollabEvent::RoomDeleted {
            room_id,
            data: RoomRefPayload { room_id },
        });
        context.hub.close_room(room_id);
    }

    for media in &ended.removed_media {
        context.remove_file(&media.file_path).await;
    }

    Ok(ended)
}

fn already_active(error: DatabaseError) -> SessionError {
    match error {
        DatabaseError::Conflict {
            resource: "active watch session",
            value,
            ..
        } => SessionError::AlreadyActive(value),
        e => SessionError::Db(e),
    }
}
