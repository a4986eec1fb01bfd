//! All schemas that are exposed from endpoints are defined here
//! along with their [ToSerialized] impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use wewatch_collab::{
    rooms::ChatEntry,
    sessions::{Broadcaster as CollabBroadcaster, Occupancy as CollabOccupancy},
    BroadcastPermissionData, BroadcastRequestData, ChatMessageData, EndedSessionData,
    MediaItemData, MediaToken as CollabMediaToken, PrimaryKey, ReactionData, RoomData,
    RoomInviteData, RoomMemberData, TemporaryMediaData, TheaterAssignmentData, TheaterData,
    TvContentData, UserData, WatchSessionData,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct User {
    id: PrimaryKey,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResult {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Room {
    id: PrimaryKey,
    name: String,
    description: String,
    host_id: PrimaryKey,
    is_public: bool,
    is_temporary: bool,
    /// playing or paused
    playback_state: String,
    playback_time: f64,
    /// none, playlist-once or playlist-infinite
    loop_mode: String,
    currently_playing: Option<String>,
    coming_next: Option<String>,
    is_screen_sharing: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomMember {
    id: PrimaryKey,
    /// host, admin or member
    role: String,
    user: User,
    joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WatchSession {
    session_id: Uuid,
    room_id: PrimaryKey,
    host_id: PrimaryKey,
    /// video or 3d_cinema
    watch_type: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstantWatch {
    pub room: Room,
    pub session: WatchSession,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EndedSession {
    session: WatchSession,
    removed_media: usize,
    room_deleted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatMessage {
    id: PrimaryKey,
    room_id: PrimaryKey,
    session_id: Option<Uuid>,
    user_id: PrimaryKey,
    username: String,
    message: String,
    is_edited: bool,
    deleted_by_host: bool,
    created_at: DateTime<Utc>,
    reactions: Vec<Reaction>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Reaction {
    id: PrimaryKey,
    user_id: PrimaryKey,
    session_id: Option<Uuid>,
    message_id: Option<PrimaryKey>,
    emoji: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Invite {
    id: PrimaryKey,
    room_id: PrimaryKey,
    inviter_id: PrimaryKey,
    invitee_id: Option<PrimaryKey>,
    token: String,
    /// pending, accepted, declined or expired
    status: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteDetails {
    pub invite: Invite,
    pub room: Room,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TvContent {
    id: PrimaryKey,
    room_id: PrimaryKey,
    session_id: Option<Uuid>,
    /// announcement or media
    kind: String,
    title: String,
    body: Option<String>,
    media_url: Option<String>,
    created_by: PrimaryKey,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Media {
    id: PrimaryKey,
    room_id: PrimaryKey,
    /// Set for media that only lives as long as its session
    session_id: Option<Uuid>,
    uploader_id: PrimaryKey,
    title: Option<String>,
    /// Where the file is served from
    url: String,
    mime_type: String,
    size: i64,
    poster_url: Option<String>,
    duration: Option<f64>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Theater {
    id: PrimaryKey,
    theater_number: i32,
    /// The custom name, or "Theater <number>"
    name: String,
    occupied_seats: i32,
    max_seats: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Seat {
    user_id: PrimaryKey,
    theater_id: PrimaryKey,
    seat_row: String,
    seat_col: i32,
    seat_number: i32,
    assigned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Occupancy {
    theater: Theater,
    seats: Vec<Seat>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Broadcaster {
    user_id: PrimaryKey,
    is_host: bool,
    granted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcastRequest {
    id: PrimaryKey,
    user_id: PrimaryKey,
    /// pending, approved or declined
    status: String,
    message: Option<String>,
    requested_at: DateTime<Utc>,
    responded_by: Option<PrimaryKey>,
    responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcastPermission {
    user_id: PrimaryKey,
    granted_by: PrimaryKey,
    is_active: bool,
    granted_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MediaToken {
    token: String,
    url: String,
    can_publish: bool,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl<I, O> ToSerialized<Option<O>> for Option<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Option<O> {
        self.as_ref().map(|x| x.to_serialized())
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            host_id: self.host_id,
            is_public: self.is_public,
            is_temporary: self.is_temporary,
            playback_state: self.playback_state.to_string(),
            playback_time: self.playback_time,
            loop_mode: self.loop_mode.to_string(),
            currently_playing: self.currently_playing.clone(),
            coming_next: self.coming_next.clone(),
            is_screen_sharing: self.is_screen_sharing,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<RoomMember> for RoomMemberData {
    fn to_serialized(&self) -> RoomMember {
        RoomMember {
            id: self.id,
            role: self.role.to_string(),
            user: self.user.to_serialized(),
            joined_at: self.joined_at,
        }
    }
}

impl ToSerialized<WatchSession> for WatchSessionData {
    fn to_serialized(&self) -> WatchSession {
        WatchSession {
            session_id: self.session_id,
            room_id: self.room_id,
            host_id: self.host_id,
            watch_type: self.watch_type.to_string(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

impl ToSerialized<EndedSession> for EndedSessionData {
    fn to_serialized(&self) -> EndedSession {
        EndedSession {
            session: self.session.to_serialized(),
            removed_media: self.removed_media.len(),
            room_deleted: self.room_deleted,
        }
    }
}

impl ToSerialized<ChatMessage> for ChatMessageData {
    fn to_serialized(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            session_id: self.session_id,
            user_id: self.user_id,
            username: self.username.clone(),
            message: self.message.clone(),
            is_edited: self.is_edited,
            deleted_by_host: self.deleted_by_host,
            created_at: self.created_at,
            reactions: vec![],
        }
    }
}

impl ToSerialized<ChatMessage> for ChatEntry {
    fn to_serialized(&self) -> ChatMessage {
        ChatMessage {
            reactions: self.reactions.to_serialized(),
            ..self.message.to_serialized()
        }
    }
}

impl ToSerialized<Reaction> for ReactionData {
    fn to_serialized(&self) -> Reaction {
        Reaction {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            message_id: self.message_id,
            emoji: self.emoji.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Invite> for RoomInviteData {
    fn to_serialized(&self) -> Invite {
        Invite {
            id: self.id,
            room_id: self.room_id,
            inviter_id: self.inviter_id,
            invitee_id: self.invitee_id,
            token: self.token.clone(),
            status: self.status.to_string(),
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<TvContent> for TvContentData {
    fn to_serialized(&self) -> TvContent {
        TvContent {
            id: self.id,
            room_id: self.room_id,
            session_id: self.session_id,
            kind: self.kind.to_string(),
            title: self.title.clone(),
            body: self.body.clone(),
            media_url: self.media_url.clone(),
            created_by: self.created_by,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

impl ToSerialized<Media> for TemporaryMediaData {
    fn to_serialized(&self) -> Media {
        Media {
            id: self.id,
            room_id: self.room_id,
            session_id: Some(self.session_id),
            uploader_id: self.uploader_id,
            title: None,
            url: upload_url(&self.file_path),
            mime_type: self.mime_type.clone(),
            size: self.size,
            poster_url: self.poster_url.clone(),
            duration: self.duration,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Media> for MediaItemData {
    fn to_serialized(&self) -> Media {
        Media {
            id: self.id,
            room_id: self.room_id,
            session_id: None,
            uploader_id: self.uploader_id,
            title: Some(self.title.clone()),
            url: upload_url(&self.file_path),
            mime_type: self.mime_type.clone(),
            size: self.size,
            poster_url: self.poster_url.clone(),
            duration: self.duration,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Theater> for TheaterData {
    fn to_serialized(&self) -> Theater {
        Theater {
            id: self.id,
            theater_number: self.theater_number,
            name: self.display_name(),
            occupied_seats: self.occupied_seats,
            max_seats: self.max_seats,
        }
    }
}

impl ToSerialized<Seat> for TheaterAssignmentData {
    fn to_serialized(&self) -> Seat {
        Seat {
            user_id: self.user_id,
            theater_id: self.theater_id,
            seat_row: self.seat_row.to_string(),
            seat_col: self.seat_col,
            seat_number: self.seat_number,
            assigned_at: self.assigned_at,
        }
    }
}

impl ToSerialized<Occupancy> for CollabOccupancy {
    fn to_serialized(&self) -> Occupancy {
        Occupancy {
            theater: self.theater.to_serialized(),
            seats: self.assignments.to_serialized(),
        }
    }
}

impl ToSerialized<Broadcaster> for CollabBroadcaster {
    fn to_serialized(&self) -> Broadcaster {
        Broadcaster {
            user_id: self.user_id,
            is_host: self.is_host,
            granted_at: self.granted_at,
        }
    }
}

impl ToSerialized<BroadcastRequest> for BroadcastRequestData {
    fn to_serialized(&self) -> BroadcastRequest {
        BroadcastRequest {
            id: self.id,
            user_id: self.user_id,
            status: self.status.to_string(),
            message: self.message.clone(),
            requested_at: self.requested_at,
            responded_by: self.responded_by,
            responded_at: self.responded_at,
        }
    }
}

impl ToSerialized<BroadcastPermission> for BroadcastPermissionData {
    fn to_serialized(&self) -> BroadcastPermission {
        BroadcastPermission {
            user_id: self.user_id,
            granted_by: self.granted_by,
            is_active: self.is_active,
            granted_at: self.granted_at,
            revoked_at: self.revoked_at,
        }
    }
}

impl ToSerialized<MediaToken> for CollabMediaToken {
    fn to_serialized(&self) -> MediaToken {
        MediaToken {
            token: self.token.clone(),
            url: self.url.clone(),
            can_publish: self.can_publish,
        }
    }
}

fn upload_url(file_path: &str) -> String {
    format!("/uploads/{}", file_path)
}
