use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// Returned when a stored value doesn't map to a known variant
#[derive(Debug, Error)]
#[error("unknown {kind} \"{value}\"")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum that is stored as text
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident as $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(PlaybackState as "playback state" {
    Playing => "playing",
    Paused => "paused",
});

text_enum!(LoopMode as "loop mode" {
    None => "none",
    PlaylistOnce => "playlist-once",
    PlaylistInfinite => "playlist-infinite",
});

text_enum!(
    /// `Admin` is accepted and stored but currently grants nothing beyond `Member`.
    MemberRole as "member role" {
        Host => "host",
        Admin => "admin",
        Member => "member",
    }
);

text_enum!(WatchType as "watch type" {
    Video => "video",
    Cinema3d => "3d_cinema",
});

text_enum!(BroadcastRequestStatus as "broadcast request status" {
    Pending => "pending",
    Approved => "approved",
    Declined => "declined",
});

text_enum!(InviteStatus as "invite status" {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    Expired => "expired",
});

text_enum!(TvContentKind as "tv content kind" {
    Announcement => "announcement",
    Media => "media",
});

/// A wewatch account
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    /// Also used as the display name
    pub username: String,
    pub email: String,
    /// The argon2 hash of the password
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// A room users gather in
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: PrimaryKey,
    pub name: String,
    pub description: String,
    pub host_id: PrimaryKey,
    pub is_public: bool,
    /// Temporary rooms are deleted together with their session
    pub is_temporary: bool,
    pub playback_state: PlaybackState,
    /// Last known playback position, in seconds
    pub playback_time: f64,
    pub loop_mode: LoopMode,
    pub currently_playing: Option<String>,
    pub coming_next: Option<String>,
    pub is_screen_sharing: bool,
    pub created_at: DateTime<Utc>,
}

/// A member of a room
#[derive(Debug, Clone)]
pub struct RoomMemberData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub role: MemberRole,
    pub user: UserData,
    pub joined_at: DateTime<Utc>,
}

/// A bounded interval of synchronized watching in a room
#[derive(Debug, Clone)]
pub struct WatchSessionData {
    pub id: PrimaryKey,
    /// The public handle of the session
    pub session_id: Uuid,
    pub room_id: PrimaryKey,
    pub host_id: PrimaryKey,
    pub watch_type: WatchType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WatchSessionData {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// The outcome of ending a session
#[derive(Debug, Clone)]
pub struct EndedSessionData {
    pub session: WatchSessionData,
    /// False if the session had already ended and nothing changed
    pub ended_now: bool,
    /// Temporary media rows that were deleted. Their files still need removing.
    pub removed_media: Vec<TemporaryMediaData>,
    /// Whether the room was temporary and got deleted
    pub room_deleted: bool,
}

/// Media uploaded for the duration of a single session
#[derive(Debug, Clone)]
pub struct TemporaryMediaData {
    pub id: PrimaryKey,
    pub session_id: Uuid,
    pub room_id: PrimaryKey,
    pub uploader_id: PrimaryKey,
    /// Path relative to the upload root
    pub file_path: String,
    pub mime_type: String,
    pub size: i64,
    pub poster_url: Option<String>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Media that belongs to a room permanently
#[derive(Debug, Clone)]
pub struct MediaItemData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub uploader_id: PrimaryKey,
    pub title: String,
    pub file_path: String,
    pub mime_type: String,
    pub size: i64,
    pub poster_url: Option<String>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChatMessageData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    /// `None` for room-scoped messages
    pub session_id: Option<Uuid>,
    pub user_id: PrimaryKey,
    pub username: String,
    pub message: String,
    pub is_edited: bool,
    pub deleted_by_host: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReactionData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A 42 seat fan-out unit inside a 3d cinema session
#[derive(Debug, Clone)]
pub struct TheaterData {
    pub id: PrimaryKey,
    /// The watch session primary key
    pub session_id: PrimaryKey,
    pub theater_number: i32,
    pub custom_name: Option<String>,
    pub occupied_seats: i32,
    pub max_seats: i32,
    pub created_at: DateTime<Utc>,
}

impl TheaterData {
    pub fn display_name(&self) -> String {
        match &self.custom_name {
            Some(name) => name.clone(),
            None => format!("Theater {}", self.theater_number),
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupied_seats >= self.max_seats
    }
}

#[derive(Debug, Clone)]
pub struct TheaterAssignmentData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub session_id: PrimaryKey,
    pub theater_id: PrimaryKey,
    /// A to G
    pub seat_row: char,
    /// 1 to 6
    pub seat_col: i32,
    pub seat_number: i32,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BroadcastPermissionData {
    pub id: PrimaryKey,
    pub session_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub granted_by: PrimaryKey,
    pub is_active: bool,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BroadcastRequestData {
    pub id: PrimaryKey,
    pub session_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub status: BroadcastRequestStatus,
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_by: Option<PrimaryKey>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// An invitation to a room
#[derive(Debug, Clone)]
pub struct RoomInviteData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub inviter_id: PrimaryKey,
    /// If set, only this user may accept the invite
    pub invitee_id: Option<PrimaryKey>,
    /// The unique token identifier of the invite
    pub token: String,
    pub status: InviteStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoomInviteData {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == InviteStatus::Pending && self.expires_at.map_or(true, |at| now < at)
    }
}

/// Content shown on the in-room TV
#[derive(Debug, Clone)]
pub struct TvContentData {
    pub id: PrimaryKey,
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

impl TvContentData {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.ends_at
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};

    use super::*;

    fn invite(status: InviteStatus, expires_in: Option<Duration>) -> RoomInviteData {
        let now = Utc::now();

        RoomInviteData {
            id: 1,
            room_id: 1,
            inviter_id: 1,
            invitee_id: None,
            token: "token".to_string(),
            status,
            expires_at: expires_in.map(|d| now + d),
            created_at: now,
        }
    }

    #[test]
    fn invite_validity() {
        let now = Utc::now();

        assert!(invite(InviteStatus::Pending, None).is_valid(now));
        assert!(invite(InviteStatus::Pending, Some(Duration::hours(1))).is_valid(now));
        assert!(
            !invite(InviteStatus::Pending, Some(Duration::hours(-1))).is_valid(now),
            "expired invites are invalid"
        );

        for status in [
            InviteStatus::Accepted,
            InviteStatus::Declined,
            InviteStatus::Expired,
        ] {
            assert!(
                !invite(status, None).is_valid(now),
                "{status} invites are invalid"
            );
        }

        let at_expiry = invite(InviteStatus::Pending, Some(Duration::zero()));
        assert!(
            !at_expiry.is_valid(at_expiry.expires_at.unwrap()),
            "an invite is invalid at the exact expiry instant"
        );
    }

    #[test]
    fn text_enums_round_trip() {
        assert_eq!("3d_cinema".parse::<WatchType>().unwrap(), WatchType::Cinema3d);
        assert_eq!(LoopMode::PlaylistInfinite.as_str(), "playlist-infinite");
        assert!("owner".parse::<MemberRole>().is_err());
    }

    #[test]
    fn theater_display_name() {
        let mut theater = TheaterData {
            id: 1,
            session_id: 1,
            theater_number: 3,
            custom_name: None,
            occupied_seats: 0,
            max_seats: 42,
            created_at: Utc::now(),
        };

        assert_eq!(theater.display_name(), "Theater 3");

        theater.custom_name = Some("Balcony".to_string());
        assert_eq!(theater.display_name(), "Balcony");
    }
}
