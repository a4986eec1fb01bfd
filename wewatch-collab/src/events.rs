use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ChatMessageData, MediaItemData, PrimaryKey, ReactionData, RoomData, RoomMemberData,
    TemporaryMediaData, TheaterAssignmentData, TheaterData, TvContentData, WatchSessionData,
};

/// Events fanned out to every client connected to a room.
///
/// On the wire an event is `{ "type": "<kind>", "data": { ... } }`, except
/// `playback_control` which carries its fields inline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollabEvent {
    PlaybackControl {
        #[serde(skip)]
        room_id: PrimaryKey,
        command: PlaybackCommand,
        /// Position in seconds at the moment the command was issued
        timestamp: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_item_id: Option<PrimaryKey>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seek_time: Option<f64>,
        user_id: PrimaryKey,
    },
    /// A session-scoped chat message
    ChatMessage {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: ChatPayload,
    },
    /// A room-scoped chat message
    RoomChat {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: ChatPayload,
    },
    RoomMessageEdited {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: ChatPayload,
    },
    RoomMessageDeleted {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: MessageRemovedPayload,
    },
    /// The host hid a message
    RoomMessageRemoved {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: MessageRemovedPayload,
    },
    Reaction {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: ReactionPayload,
    },
    SessionStarted {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: SessionPayload,
    },
    SessionEnded {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: SessionPayload,
    },
    RoomDeleted {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: RoomRefPayload,
    },
    RoomStatusUpdated {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: RoomStatusPayload,
    },
    LoopModeUpdated {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: LoopModePayload,
    },
    RoomTvContentCreated {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: TvContentPayload,
    },
    RoomTvContentRemoved {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: TvContentRemovedPayload,
    },
    TemporaryMediaItemAdded {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: MediaPayload,
    },
    TemporaryMediaItemDeleted {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: MediaRemovedPayload,
    },
    TheaterAssigned {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: SeatPayload,
    },
    TheaterLeft {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: SeatPayload,
    },
    TheaterRenamed {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: TheaterPayload,
    },
    BroadcastRequested {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: BroadcastPayload,
    },
    BroadcastGranted {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: BroadcastPayload,
    },
    BroadcastRevoked {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: BroadcastPayload,
    },
    BroadcastRequestDeclined {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: BroadcastPayload,
    },
    UserConnected {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: PresencePayload,
    },
    UserDisconnected {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: PresencePayload,
    },
    /// A user became a member of a room
    MemberJoined {
        #[serde(skip)]
        room_id: PrimaryKey,
        data: MemberPayload,
    },
}

impl CollabEvent {
    /// The room this event is fanned out to
    pub fn room_id(&self) -> PrimaryKey {
        match self {
            Self::PlaybackControl { room_id, .. }
            | Self::ChatMessage { room_id, .. }
            | Self::RoomChat { room_id, .. }
            | Self::RoomMessageEdited { room_id, .. }
            | Self::RoomMessageDeleted { room_id, .. }
            | Self::RoomMessageRemoved { room_id, .. }
            | Self::Reaction { room_id, .. }
            | Self::SessionStarted { room_id, .. }
            | Self::SessionEnded { room_id, .. }
            | Self::RoomDeleted { room_id, .. }
            | Self::RoomStatusUpdated { room_id, .. }
            | Self::LoopModeUpdated { room_id, .. }
            | Self::RoomTvContentCreated { room_id, .. }
            | Self::RoomTvContentRemoved { room_id, .. }
            | Self::TemporaryMediaItemAdded { room_id, .. }
            | Self::TemporaryMediaItemDeleted { room_id, .. }
            | Self::TheaterAssigned { room_id, .. }
            | Self::TheaterLeft { room_id, .. }
            | Self::TheaterRenamed { room_id, .. }
            | Self::BroadcastRequested { room_id, .. }
            | Self::BroadcastGranted { room_id, .. }
            | Self::BroadcastRevoked { room_id, .. }
            | Self::BroadcastRequestDeclined { room_id, .. }
            | Self::UserConnected { room_id, .. }
            | Self::UserDisconnected { room_id, .. }
            | Self::MemberJoined { room_id, .. } => *room_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Seek,
    Load,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    /// Absent for messages relayed over the socket without being stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<PrimaryKey>,
    pub room_id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub user_id: PrimaryKey,
    pub username: String,
    pub message: String,
    pub is_edited: bool,
    pub deleted_by_host: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRemovedPayload {
    pub message_id: PrimaryKey,
    pub user_id: PrimaryKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<PrimaryKey>,
    pub user_id: PrimaryKey,
    pub username: String,
    pub emoji: String,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    pub session_id: Uuid,
    pub room_id: PrimaryKey,
    pub host_id: PrimaryKey,
    pub watch_type: &'static str,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomRefPayload {
    pub room_id: PrimaryKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatusPayload {
    pub room_id: PrimaryKey,
    pub currently_playing: Option<String>,
    pub coming_next: Option<String>,
    pub is_screen_sharing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopModePayload {
    pub room_id: PrimaryKey,
    pub loop_mode: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TvContentPayload {
    pub id: PrimaryKey,
    pub kind: &'static str,
    pub title: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub session_id: Option<Uuid>,
    pub created_by: PrimaryKey,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TvContentRemovedPayload {
    pub content_id: PrimaryKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    pub id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub uploader_id: PrimaryKey,
    pub title: Option<String>,
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub poster_url: Option<String>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaRemovedPayload {
    pub id: PrimaryKey,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatPayload {
    pub user_id: PrimaryKey,
    pub session_id: Uuid,
    pub theater_id: PrimaryKey,
    pub seat_row: String,
    pub seat_col: i32,
    pub seat_number: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TheaterPayload {
    pub id: PrimaryKey,
    pub theater_number: i32,
    pub name: String,
    pub occupied_seats: i32,
    pub max_seats: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastPayload {
    pub session_id: Uuid,
    pub user_id: PrimaryKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<PrimaryKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresencePayload {
    pub user_id: PrimaryKey,
    pub username: String,
    /// Connections to the room after this change
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberPayload {
    pub user_id: PrimaryKey,
    pub username: String,
    pub role: &'static str,
}

impl From<&ChatMessageData> for ChatPayload {
    fn from(message: &ChatMessageData) -> Self {
        Self {
            id: Some(message.id),
            room_id: message.room_id,
            session_id: message.session_id,
            user_id: message.user_id,
            username: message.username.clone(),
            message: message.message.clone(),
            is_edited: message.is_edited,
            deleted_by_host: message.deleted_by_host,
            created_at: message.created_at,
        }
    }
}

impl ReactionPayload {
    pub fn from_data(reaction: &ReactionData, username: String) -> Self {
        Self {
            id: Some(reaction.id),
            user_id: reaction.user_id,
            username,
            emoji: reaction.emoji.clone(),
            session_id: reaction.session_id,
            message_id: reaction.message_id,
            created_at: reaction.created_at,
        }
    }
}

impl From<&WatchSessionData> for SessionPayload {
    fn from(session: &WatchSessionData) -> Self {
        Self {
            session_id: session.session_id,
            room_id: session.room_id,
            host_id: session.host_id,
            watch_type: session.watch_type.as_str(),
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }
}

impl From<&RoomData> for RoomStatusPayload {
    fn from(room: &RoomData) -> Self {
        Self {
            room_id: room.id,
            currently_playing: room.currently_playing.clone(),
            coming_next: room.coming_next.clone(),
            is_screen_sharing: room.is_screen_sharing,
        }
    }
}

impl From<&TvContentData> for TvContentPayload {
    fn from(content: &TvContentData) -> Self {
        Self {
            id: content.id,
            kind: content.kind.as_str(),
            title: content.title.clone(),
            body: content.body.clone(),
            media_url: content.media_url.clone(),
            session_id: content.session_id,
            created_by: content.created_by,
            starts_at: content.starts_at,
            ends_at: content.ends_at,
        }
    }
}

impl From<&TemporaryMediaData> for MediaPayload {
    fn from(media: &TemporaryMediaData) -> Self {
        Self {
            id: media.id,
            session_id: Some(media.session_id),
            uploader_id: media.uploader_id,
            title: None,
            url: format!("/uploads/{}", media.file_path),
            mime_type: media.mime_type.clone(),
            size: media.size,
            poster_url: media.poster_url.clone(),
            duration: media.duration,
            created_at: media.created_at,
        }
    }
}

impl From<&MediaItemData> for MediaPayload {
    fn from(media: &MediaItemData) -> Self {
        Self {
            id: media.id,
            session_id: None,
            uploader_id: media.uploader_id,
            title: Some(media.title.clone()),
            url: format!("/uploads/{}", media.file_path),
            mime_type: media.mime_type.clone(),
            size: media.size,
            poster_url: media.poster_url.clone(),
            duration: media.duration,
            created_at: media.created_at,
        }
    }
}

impl SeatPayload {
    pub fn new(assignment: &TheaterAssignmentData, session_id: Uuid) -> Self {
        Self {
            user_id: assignment.user_id,
            session_id,
            theater_id: assignment.theater_id,
            seat_row: assignment.seat_row.to_string(),
            seat_col: assignment.seat_col,
            seat_number: assignment.seat_number,
        }
    }
}

impl From<&TheaterData> for TheaterPayload {
    fn from(theater: &TheaterData) -> Self {
        Self {
            id: theater.id,
            theater_number: theater.theater_number,
            name: theater.display_name(),
            occupied_seats: theater.occupied_seats,
            max_seats: theater.max_seats,
        }
    }
}

impl From<&RoomMemberData> for MemberPayload {
    fn from(member: &RoomMemberData) -> Self {
        Self {
            user_id: member.user.id,
            username: member.user.username.clone(),
            role: member.role.as_str(),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn events_use_type_and_data_envelope() {
        let event = CollabEvent::RoomDeleted {
            room_id: 4,
            data: RoomRefPayload { room_id: 4 },
        };

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({ "type": "room_deleted", "data": { "room_id": 4 } }));
        assert_eq!(event.room_id(), 4);
    }

    #[test]
    fn playback_control_is_inline() {
        let event = CollabEvent::PlaybackControl {
            room_id: 1,
            command: PlaybackCommand::Seek,
            timestamp: 12.5,
            media_item_id: None,
            seek_time: Some(40.0),
            user_id: 9,
        };

        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "playback_control",
                "command": "seek",
                "timestamp": 12.5,
                "seek_time": 40.0,
                "user_id": 9,
            })
        );
    }
}
