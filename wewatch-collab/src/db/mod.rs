use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;
pub type ArcedDatabase = Arc<dyn Database>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    /// A bounded resource has no room left
    #[error("{resource} is full")]
    Full { resource: &'static str },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult<T> {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
    /// Turns a `NotFound` error into `Ok(None)`
    fn optional(self) -> Result<Option<T>>;
}

impl<T> DatabaseResult<T> for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The record store. Every method is its own transaction.
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData>;
    /// Returns the newest rooms first
    async fn list_rooms(&self, limit: i64) -> Result<Vec<RoomData>>;
    /// Creates the room together with the host's membership
    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData>;
    /// Creates a temporary room, the host's membership, and an active session at once
    async fn create_instant_watch(
        &self,
        new_room: NewRoom,
        new_session: NewWatchSession,
    ) -> Result<(RoomData, WatchSessionData)>;
    async fn update_room_status(&self, updated: UpdatedRoomStatus) -> Result<RoomData>;
    async fn update_loop_mode(&self, room_id: PrimaryKey, loop_mode: LoopMode) -> Result<RoomData>;
    async fn update_playback(
        &self,
        room_id: PrimaryKey,
        state: Option<PlaybackState>,
        time: Option<f64>,
    ) -> Result<()>;
    async fn delete_room(&self, room_id: PrimaryKey) -> Result<()>;

    async fn room_members(&self, room_id: PrimaryKey) -> Result<Vec<RoomMemberData>>;
    async fn room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<RoomMemberData>;
    async fn create_room_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData>;
    async fn delete_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<()>;

    async fn room_invite_by_token(&self, token: &str) -> Result<RoomInviteData>;
    async fn room_invites(&self, room_id: PrimaryKey) -> Result<Vec<RoomInviteData>>;
    async fn create_room_invite(&self, new_invite: NewRoomInvite) -> Result<RoomInviteData>;
    async fn set_invite_status(&self, invite_id: PrimaryKey, status: InviteStatus) -> Result<RoomInviteData>;
    /// Adds the user as a member and, if `mark_accepted` is set, flips the invite to accepted
    async fn accept_room_invite(
        &self,
        invite_id: PrimaryKey,
        user_id: PrimaryKey,
        mark_accepted: bool,
        joined_at: DateTime<Utc>,
    ) -> Result<RoomMemberData>;
    async fn delete_room_invite(&self, invite_id: PrimaryKey) -> Result<()>;

    async fn watch_session_by_id(&self, session_pk: PrimaryKey) -> Result<WatchSessionData>;
    async fn watch_session_by_uuid(&self, session_id: Uuid) -> Result<WatchSessionData>;
    async fn active_watch_session(&self, room_id: PrimaryKey) -> Result<Option<WatchSessionData>>;
    /// Fails with a conflict naming the active session if the room already has one
    async fn create_watch_session(&self, new_session: NewWatchSession) -> Result<WatchSessionData>;
    /// Ends an active session, removes its temporary media rows, and deletes the room if it is temporary
    async fn end_watch_session(
        &self,
        session_pk: PrimaryKey,
        ended_at: DateTime<Utc>,
    ) -> Result<EndedSessionData>;
    /// Active sessions in temporary rooms that started before `cutoff`
    async fn stale_temporary_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<WatchSessionData>>;

    async fn temporary_media_by_id(&self, item_id: PrimaryKey) -> Result<TemporaryMediaData>;
    async fn temporary_media_for_session(&self, session_id: Uuid) -> Result<Vec<TemporaryMediaData>>;
    /// Fails with not found unless the session is still active
    async fn create_temporary_media(&self, new_media: NewTemporaryMedia) -> Result<TemporaryMediaData>;
    async fn delete_temporary_media(&self, item_id: PrimaryKey) -> Result<()>;

    async fn media_items_for_room(&self, room_id: PrimaryKey) -> Result<Vec<MediaItemData>>;
    async fn create_media_item(&self, new_item: NewMediaItem) -> Result<MediaItemData>;

    async fn chat_message_by_id(&self, message_id: PrimaryKey) -> Result<ChatMessageData>;
    /// The latest `limit` messages of a room or session, oldest first
    async fn chat_history(
        &self,
        room_id: PrimaryKey,
        session_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessageData>>;
    async fn create_chat_message(&self, new_message: NewChatMessage) -> Result<ChatMessageData>;
    async fn update_chat_message(&self, message_id: PrimaryKey, message: String) -> Result<ChatMessageData>;
    async fn mark_chat_message_removed(&self, message_id: PrimaryKey) -> Result<ChatMessageData>;
    async fn delete_chat_message(&self, message_id: PrimaryKey) -> Result<()>;

    async fn create_reaction(&self, new_reaction: NewReaction) -> Result<ReactionData>;
    async fn reactions_for_messages(&self, message_ids: &[PrimaryKey]) -> Result<Vec<ReactionData>>;

    async fn theater_by_id(&self, theater_id: PrimaryKey) -> Result<TheaterData>;
    /// Ordered by theater number
    async fn theaters_for_session(&self, session_pk: PrimaryKey) -> Result<Vec<TheaterData>>;
    /// Creates the theater numbered one past the current count
    async fn create_next_theater(
        &self,
        session_pk: PrimaryKey,
        max_seats: i32,
        created_at: DateTime<Utc>,
    ) -> Result<TheaterData>;
    async fn rename_theater(&self, theater_id: PrimaryKey, name: Option<String>) -> Result<TheaterData>;
    async fn theater_assignments(&self, theater_id: PrimaryKey) -> Result<Vec<TheaterAssignmentData>>;
    async fn assignment_for_user(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<TheaterAssignmentData>>;
    /// Inserts or moves an assignment while keeping theater counters exact.
    /// Fails with `Full` if the target theater has no free seat and `Conflict` if the seat is taken.
    async fn assign_seat(&self, assignment: SeatAssignment) -> Result<TheaterAssignmentData>;
    async fn remove_assignment(&self, session_pk: PrimaryKey, user_id: PrimaryKey) -> Result<TheaterAssignmentData>;
    /// Deletes assignments of ended sessions and returns how many were removed
    async fn clear_ended_session_assignments(&self) -> Result<u64>;

    async fn broadcast_permission(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastPermissionData>>;
    async fn active_broadcast_permissions(&self, session_pk: PrimaryKey) -> Result<Vec<BroadcastPermissionData>>;
    async fn pending_broadcast_request(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<Option<BroadcastRequestData>>;
    async fn broadcast_request_by_id(&self, request_id: PrimaryKey) -> Result<BroadcastRequestData>;
    async fn broadcast_requests(
        &self,
        session_pk: PrimaryKey,
        status: Option<BroadcastRequestStatus>,
    ) -> Result<Vec<BroadcastRequestData>>;
    async fn create_broadcast_request(&self, new_request: NewBroadcastRequest) -> Result<BroadcastRequestData>;
    /// Activates the permission and approves any pending request for the user
    async fn grant_broadcast(&self, grant: BroadcastGrant) -> Result<BroadcastPermissionData>;
    async fn revoke_broadcast(
        &self,
        session_pk: PrimaryKey,
        user_id: PrimaryKey,
        revoked_at: DateTime<Utc>,
    ) -> Result<BroadcastPermissionData>;
    async fn respond_broadcast_request(
        &self,
        request_id: PrimaryKey,
        status: BroadcastRequestStatus,
        responded_by: PrimaryKey,
        responded_at: DateTime<Utc>,
    ) -> Result<BroadcastRequestData>;

    async fn tv_content_by_id(&self, content_id: PrimaryKey) -> Result<TvContentData>;
    /// The most recently started content that hasn't ended at `now`
    async fn active_tv_content(&self, room_id: PrimaryKey, now: DateTime<Utc>) -> Result<Option<TvContentData>>;
    async fn create_tv_content(&self, new_content: NewTvContent) -> Result<TvContentData>;
    async fn delete_tv_content(&self, content_id: PrimaryKey) -> Result<()>;
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    /// Already hashed
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: String,
    /// The host of the new room
    pub host_id: PrimaryKey,
    pub is_public: bool,
    pub is_temporary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UpdatedRoomStatus {
    pub id: PrimaryKey,
    pub currently_playing: Option<String>,
    pub coming_next: Option<String>,
    pub is_screen_sharing: Option<bool>,
}

#[derive(Debug)]
pub struct NewRoomMember {
    pub user_id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewRoomInvite {
    pub token: String,
    pub room_id: PrimaryKey,
    /// The inviter of the new room invite
    pub inviter_id: PrimaryKey,
    pub invitee_id: Option<PrimaryKey>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWatchSession {
    pub session_id: Uuid,
    /// Ignored when the session is created together with its room
    pub room_id: PrimaryKey,
    pub host_id: PrimaryKey,
    pub watch_type: WatchType,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewTemporaryMedia {
    pub session_id: Uuid,
    pub room_id: PrimaryKey,
    pub uploader_id: PrimaryKey,
    pub file_path: String,
    pub mime_type: String,
    pub size: i64,
    pub poster_url: Option<String>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewMediaItem {
    pub room_id: PrimaryKey,
    pub uploader_id: PrimaryKey,
    pub title: String,
    pub file_path: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewChatMessage {
    pub room_id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub user_id: PrimaryKey,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewReaction {
    pub user_id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SeatAssignment {
    pub session_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub theater_id: PrimaryKey,
    pub seat_row: char,
    pub seat_col: i32,
    pub seat_number: i32,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewBroadcastRequest {
    pub session_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct BroadcastGrant {
    pub session_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub granted_by: PrimaryKey,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewTvContent {
    pub room_id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub kind: TvContentKind,
    pub title: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub created_by: PrimaryKey,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
