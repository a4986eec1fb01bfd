use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use chrono::Duration;
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;
use wewatch_collab::{
    BroadcastRequestStatus, LoopMode, PrimaryKey, TvContentKind, WatchType,
};

use crate::errors::ServerError;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginSchema {
    #[validate(length(max = 254))]
    pub email: String,
    #[validate(length(max = 128))]
    pub password: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSchema {
    #[validate(length(min = 2, max = 50))]
    pub username: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRoomSchema {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    /// Defaults to true
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
pub enum WatchTypeSchema {
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "3d_cinema")]
    Cinema3d,
}

#[derive(Debug, Default, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstantWatchSchema {
    #[validate(length(max = 100))]
    pub name: Option<String>,
    /// Defaults to video
    pub watch_type: Option<WatchTypeSchema>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewSessionSchema {
    pub watch_type: Option<WatchTypeSchema>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomStatusSchema {
    #[validate(length(max = 200))]
    pub currently_playing: Option<String>,
    #[validate(length(max = 200))]
    pub coming_next: Option<String>,
    pub is_screen_sharing: Option<bool>,
}

#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopModeSchema {
    None,
    PlaylistOnce,
    PlaylistInfinite,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopModeUpdateSchema {
    pub loop_mode: LoopModeSchema,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSchema {
    #[validate(length(min = 1, max = 1000))]
    pub message: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionSchema {
    #[validate(length(min = 1, max = 16))]
    pub emoji: String,
    pub session_id: Option<Uuid>,
    pub message_id: Option<PrimaryKey>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Only messages of this session. Room-scoped messages otherwise.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Default, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewInviteSchema {
    /// Restricts the invite to a single user
    pub invitee_id: Option<PrimaryKey>,
    #[validate(range(min = 1, max = 720))]
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeatSchema {
    pub theater_id: PrimaryKey,
    /// A to G
    #[validate(length(equal = 1))]
    pub row: String,
    /// 1 to 6
    #[validate(range(min = 1, max = 6))]
    pub col: i32,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TheaterNameSchema {
    /// Clears the custom name when absent
    #[validate(length(max = 50))]
    pub name: Option<String>,
}

#[derive(Debug, Default, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastRequestSchema {
    #[validate(length(max = 200))]
    pub message: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastTargetSchema {
    pub user_id: PrimaryKey,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastDeclineSchema {
    pub request_id: PrimaryKey,
}

#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatusSchema {
    Pending,
    Approved,
    Declined,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RequestsQuery {
    pub status: Option<RequestStatusSchema>,
}

#[derive(Debug, Clone, Copy, ToSchema, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvKindSchema {
    Announcement,
    Media,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTvContentSchema {
    pub kind: TvKindSchema,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub body: Option<String>,
    #[validate(url)]
    pub media_url: Option<String>,
    pub session_id: Option<Uuid>,
    /// How long the content stays up, starting now
    #[validate(range(min = 1, max = 1440))]
    pub duration_in_minutes: i64,
}

impl From<WatchTypeSchema> for WatchType {
    fn from(value: WatchTypeSchema) -> Self {
        match value {
            WatchTypeSchema::Video => Self::Video,
            WatchTypeSchema::Cinema3d => Self::Cinema3d,
        }
    }
}

impl From<LoopModeSchema> for LoopMode {
    fn from(value: LoopModeSchema) -> Self {
        match value {
            LoopModeSchema::None => Self::None,
            LoopModeSchema::PlaylistOnce => Self::PlaylistOnce,
            LoopModeSchema::PlaylistInfinite => Self::PlaylistInfinite,
        }
    }
}

impl From<RequestStatusSchema> for BroadcastRequestStatus {
    fn from(value: RequestStatusSchema) -> Self {
        match value {
            RequestStatusSchema::Pending => Self::Pending,
            RequestStatusSchema::Approved => Self::Approved,
            RequestStatusSchema::Declined => Self::Declined,
        }
    }
}

impl From<TvKindSchema> for TvContentKind {
    fn from(value: TvKindSchema) -> Self {
        match value {
            TvKindSchema::Announcement => Self::Announcement,
            TvKindSchema::Media => Self::Media,
        }
    }
}

impl NewInviteSchema {
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in_hours.map(Duration::hours)
    }
}

/// Json that is checked with [Validate] before it reaches the handler
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::BadRequest(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::BadRequest(format!("Request body is invalid: {e}")))?;

        Ok(Self(extracted_json.0))
    }
}
